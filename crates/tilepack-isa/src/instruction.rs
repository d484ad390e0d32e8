//! Instruction records
//!
//! Every operation is one 64-byte record whose first field is the `i32`
//! opcode. Operand locations are page offsets from the device base address.
//! Records are written field by field in little-endian order and zero-filled
//! to the full width.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::mem::size_of;
use tilepack_core::{AlignedBuffer, Element, Error, LeakyRelu, PostScale, Result};
use tilepack_sparse::SingleStageLayout;
use tracing::trace;

/// Size of every instruction record
pub const INSTRUCTION_BYTES: usize = 64;

/// Operation tags understood by the pipeline
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    Control = 0,
    Gemv = 1,
    Gemm = 2,
    Transpose = 3,
    Spmv = 4,
    Uspmv = 5,
    Result = 6,
    Fail = 7,
    Fcn = 8,
}

impl Opcode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => Self::Control,
            1 => Self::Gemv,
            2 => Self::Gemm,
            3 => Self::Transpose,
            4 => Self::Spmv,
            5 => Self::Uspmv,
            6 => Self::Result,
            7 => Self::Fail,
            8 => Self::Fcn,
            _ => return None,
        })
    }
}

/// Operand location in device pages, relative to the device base address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageOffset(pub u32);

impl PageOffset {
    /// `(address - base) / page_size`, exact or an error
    pub fn from_device_address(address: u64, base: u64, page_size: u64) -> Result<Self> {
        let misaligned = || Error::MisalignedAddress {
            address,
            base,
            page_size,
        };
        if page_size == 0 {
            return Err(misaligned());
        }
        let delta = address.checked_sub(base).ok_or_else(misaligned)?;
        if delta % page_size != 0 {
            return Err(misaligned());
        }
        let pages = delta / page_size;
        u32::try_from(pages)
            .map(Self)
            .map_err(|_| Error::overflow("page_offset", pages, u32::MAX))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn byte_offset(self, page_size: usize) -> usize {
        self.0 as usize * page_size
    }
}

/// Dense multiply dimensions and leading dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GemmShape {
    pub m: u32,
    pub k: u32,
    pub n: u32,
    pub lda: u32,
    pub ldb: u32,
    pub ldc: u32,
    pub ldx: u32,
}

impl GemmShape {
    /// Packed operands: `lda = k`, `ldb = ldc = ldx = n`
    pub fn new(m: u32, k: u32, n: u32) -> Self {
        Self {
            m,
            k,
            n,
            lda: k,
            ldb: n,
            ldc: n,
            ldx: n,
        }
    }

    pub fn with_leading_dims(mut self, lda: u32, ldb: u32, ldc: u32, ldx: u32) -> Self {
        self.lda = lda;
        self.ldb = ldb;
        self.ldc = ldc;
        self.ldx = ldx;
        self
    }
}

/// `C = post_scale(A * B + X)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GemmOp {
    pub a: PageOffset,
    pub b: PageOffset,
    pub c: PageOffset,
    /// Bias; page 0 when absent
    pub x: PageOffset,
    pub shape: GemmShape,
    pub post_scale: PostScale,
}

/// Dense multiply followed by leaky activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FcnOp {
    pub gemm: GemmOp,
    pub leaky: LeakyRelu,
}

/// Sparse matrix times dense vector block over a single-stage layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpmvOp {
    pub a: PageOffset,
    pub b: PageOffset,
    pub c: PageOffset,
    pub m: u32,
    pub k: u32,
    pub nnz: u32,
    /// Column tiles
    pub b_blocks: u32,
    /// Row tiles
    pub c_blocks: u32,
    pub desc_pages: u32,
    pub prelu: bool,
}

impl SpmvOp {
    /// Take dimensions, tile counts and descriptor pages from a built layout
    pub fn for_layout<T: Element>(
        layout: &SingleStageLayout<T>,
        a: PageOffset,
        b: PageOffset,
        c: PageOffset,
        prelu: bool,
    ) -> Result<Self> {
        let field = |name: &'static str, value: usize| {
            u32::try_from(value).map_err(|_| Error::overflow(name, value as u64, u32::MAX))
        };
        Ok(Self {
            a,
            b,
            c,
            m: field("m", layout.rows())?,
            k: field("k", layout.cols())?,
            nnz: field("nnz", layout.nnz())?,
            b_blocks: field("b_blocks", layout.n_tile_cols())?,
            c_blocks: field("c_blocks", layout.n_tile_rows())?,
            desc_pages: field("desc_pages", layout.descriptor_pages())?,
            prelu,
        })
    }
}

/// Multi-stage sparse pipeline over `num_runs` input vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UspmvOp {
    pub a: PageOffset,
    pub b: PageOffset,
    pub c: PageOffset,
    pub num_runs: u32,
}

/// One operation for the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    Gemm(GemmOp),
    Fcn(FcnOp),
    Spmv(SpmvOp),
    Uspmv(UspmvOp),
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct GemmRecord {
    op: i32,
    a: u32,
    b: u32,
    c: u32,
    x: u32,
    m: u32,
    k: u32,
    n: u32,
    lda: u32,
    ldb: u32,
    ldc: u32,
    ldx: u32,
    post_scale: i32,
    reserved: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct FcnRecord {
    op: i32,
    a: u32,
    b: u32,
    c: u32,
    x: u32,
    m: u32,
    k: u32,
    n: u32,
    lda: u32,
    ldb: u32,
    ldc: u32,
    ldx: u32,
    post_scale: i32,
    leaky: i16,
    pad: i16,
    reserved: [u32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct SpmvRecord {
    op: i32,
    a: u32,
    b: u32,
    c: u32,
    m: u32,
    k: u32,
    nnz: u32,
    b_blocks: u32,
    c_blocks: u32,
    desc_pages: u32,
    prelu: u8,
    pad: [u8; 3],
    reserved: [u32; 5],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct UspmvRecord {
    op: i32,
    a: u32,
    b: u32,
    c: u32,
    num_runs: u32,
    reserved: [u32; 11],
}

const _: () = assert!(size_of::<GemmRecord>() == INSTRUCTION_BYTES);
const _: () = assert!(size_of::<FcnRecord>() == INSTRUCTION_BYTES);
const _: () = assert!(size_of::<SpmvRecord>() == INSTRUCTION_BYTES);
const _: () = assert!(size_of::<UspmvRecord>() == INSTRUCTION_BYTES);

fn to_record_bytes<R: Pod>(record: &R) -> [u8; INSTRUCTION_BYTES] {
    let mut out = [0u8; INSTRUCTION_BYTES];
    out.copy_from_slice(bytemuck::bytes_of(record));
    out
}

fn gemm_record(op: Opcode, gemm: &GemmOp) -> Result<GemmRecord> {
    let shape = &gemm.shape;
    Ok(GemmRecord {
        op: op.code().to_le(),
        a: gemm.a.0.to_le(),
        b: gemm.b.0.to_le(),
        c: gemm.c.0.to_le(),
        x: gemm.x.0.to_le(),
        m: shape.m.to_le(),
        k: shape.k.to_le(),
        n: shape.n.to_le(),
        lda: shape.lda.to_le(),
        ldb: shape.ldb.to_le(),
        ldc: shape.ldc.to_le(),
        ldx: shape.ldx.to_le(),
        post_scale: gemm.post_scale.pack()?.to_le(),
        reserved: [0; 3],
    })
}

fn gemm_from_record(r: &GemmRecord) -> GemmOp {
    GemmOp {
        a: PageOffset(u32::from_le(r.a)),
        b: PageOffset(u32::from_le(r.b)),
        c: PageOffset(u32::from_le(r.c)),
        x: PageOffset(u32::from_le(r.x)),
        shape: GemmShape {
            m: u32::from_le(r.m),
            k: u32::from_le(r.k),
            n: u32::from_le(r.n),
            lda: u32::from_le(r.lda),
            ldb: u32::from_le(r.ldb),
            ldc: u32::from_le(r.ldc),
            ldx: u32::from_le(r.ldx),
        },
        post_scale: PostScale::unpack(i32::from_le(r.post_scale)),
    }
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Gemm(_) => Opcode::Gemm,
            Self::Fcn(_) => Opcode::Fcn,
            Self::Spmv(_) => Opcode::Spmv,
            Self::Uspmv(_) => Opcode::Uspmv,
        }
    }

    /// Encode into a 64-byte record
    ///
    /// Fails if a quantization parameter does not fit its packed field.
    pub fn encode(&self) -> Result<[u8; INSTRUCTION_BYTES]> {
        let bytes = match self {
            Self::Gemm(gemm) => to_record_bytes(&gemm_record(Opcode::Gemm, gemm)?),
            Self::Fcn(fcn) => {
                let g = gemm_record(Opcode::Fcn, &fcn.gemm)?;
                to_record_bytes(&FcnRecord {
                    op: g.op,
                    a: g.a,
                    b: g.b,
                    c: g.c,
                    x: g.x,
                    m: g.m,
                    k: g.k,
                    n: g.n,
                    lda: g.lda,
                    ldb: g.ldb,
                    ldc: g.ldc,
                    ldx: g.ldx,
                    post_scale: g.post_scale,
                    leaky: fcn.leaky.pack()?.to_le(),
                    pad: 0,
                    reserved: [0; 2],
                })
            }
            Self::Spmv(spmv) => to_record_bytes(&SpmvRecord {
                op: Opcode::Spmv.code().to_le(),
                a: spmv.a.0.to_le(),
                b: spmv.b.0.to_le(),
                c: spmv.c.0.to_le(),
                m: spmv.m.to_le(),
                k: spmv.k.to_le(),
                nnz: spmv.nnz.to_le(),
                b_blocks: spmv.b_blocks.to_le(),
                c_blocks: spmv.c_blocks.to_le(),
                desc_pages: spmv.desc_pages.to_le(),
                prelu: u8::from(spmv.prelu),
                pad: [0; 3],
                reserved: [0; 5],
            }),
            Self::Uspmv(uspmv) => to_record_bytes(&UspmvRecord {
                op: Opcode::Uspmv.code().to_le(),
                a: uspmv.a.0.to_le(),
                b: uspmv.b.0.to_le(),
                c: uspmv.c.0.to_le(),
                num_runs: uspmv.num_runs.to_le(),
                reserved: [0; 11],
            }),
        };
        Ok(bytes)
    }

    /// Decode a record produced by [`encode`](Self::encode), for program dumps
    pub fn decode(record: &[u8]) -> Result<Self> {
        if record.len() < INSTRUCTION_BYTES {
            return Err(Error::BufferTooSmall {
                required: INSTRUCTION_BYTES,
                available: record.len(),
            });
        }
        let record = &record[..INSTRUCTION_BYTES];
        let code = i32::from_le_bytes([record[0], record[1], record[2], record[3]]);
        match Opcode::from_code(code) {
            Some(Opcode::Gemm) => {
                let r: GemmRecord = bytemuck::pod_read_unaligned(record);
                Ok(Self::Gemm(gemm_from_record(&r)))
            }
            Some(Opcode::Fcn) => {
                let r: FcnRecord = bytemuck::pod_read_unaligned(record);
                let gemm = GemmRecord {
                    op: r.op,
                    a: r.a,
                    b: r.b,
                    c: r.c,
                    x: r.x,
                    m: r.m,
                    k: r.k,
                    n: r.n,
                    lda: r.lda,
                    ldb: r.ldb,
                    ldc: r.ldc,
                    ldx: r.ldx,
                    post_scale: r.post_scale,
                    reserved: [0; 3],
                };
                Ok(Self::Fcn(FcnOp {
                    gemm: gemm_from_record(&gemm),
                    leaky: LeakyRelu::unpack(i16::from_le(r.leaky)),
                }))
            }
            Some(Opcode::Spmv) => {
                let r: SpmvRecord = bytemuck::pod_read_unaligned(record);
                Ok(Self::Spmv(SpmvOp {
                    a: PageOffset(u32::from_le(r.a)),
                    b: PageOffset(u32::from_le(r.b)),
                    c: PageOffset(u32::from_le(r.c)),
                    m: u32::from_le(r.m),
                    k: u32::from_le(r.k),
                    nnz: u32::from_le(r.nnz),
                    b_blocks: u32::from_le(r.b_blocks),
                    c_blocks: u32::from_le(r.c_blocks),
                    desc_pages: u32::from_le(r.desc_pages),
                    prelu: r.prelu != 0,
                }))
            }
            Some(Opcode::Uspmv) => {
                let r: UspmvRecord = bytemuck::pod_read_unaligned(record);
                Ok(Self::Uspmv(UspmvOp {
                    a: PageOffset(u32::from_le(r.a)),
                    b: PageOffset(u32::from_le(r.b)),
                    c: PageOffset(u32::from_le(r.c)),
                    num_runs: u32::from_le(r.num_runs),
                }))
            }
            other => Err(Error::Data(format!(
                "opcode {code} ({other:?}) is not an encodable instruction"
            ))),
        }
    }
}

/// Page-aligned instruction area with an append cursor
#[derive(Debug, Clone)]
pub struct InstructionBuffer {
    bytes: AlignedBuffer<u8>,
    cursor: usize,
}

impl InstructionBuffer {
    /// A buffer of `capacity_bytes`, rounded down to whole records
    pub fn new(capacity_bytes: usize, alignment: usize) -> Result<Self> {
        if capacity_bytes < INSTRUCTION_BYTES {
            return Err(Error::Configuration(format!(
                "instruction buffer of {capacity_bytes} bytes holds no {INSTRUCTION_BYTES}-byte record"
            )));
        }
        Ok(Self {
            bytes: AlignedBuffer::zeroed(capacity_bytes, alignment)?,
            cursor: 0,
        })
    }

    /// One page of instructions
    pub fn with_page(page_size: usize) -> Result<Self> {
        Self::new(page_size, page_size)
    }

    /// Append a record, returning its index
    pub fn push(&mut self, instruction: &Instruction) -> Result<usize> {
        let end = self.cursor + INSTRUCTION_BYTES;
        if end > self.bytes.len() {
            return Err(Error::BufferTooSmall {
                required: end,
                available: self.bytes.len(),
            });
        }
        let record = instruction.encode()?;
        self.bytes.as_mut_slice()[self.cursor..end].copy_from_slice(&record);
        let index = self.cursor / INSTRUCTION_BYTES;
        self.cursor = end;
        trace!(index, opcode = ?instruction.opcode(), "appended instruction");
        Ok(index)
    }

    /// Zero the buffer and rewind the cursor
    pub fn clear(&mut self) {
        self.bytes.clear();
        self.cursor = 0;
    }

    /// The whole buffer, unused space zeroed
    pub fn as_bytes(&self) -> &[u8] {
        self.bytes.as_slice()
    }

    /// Records written so far
    pub fn len(&self) -> usize {
        self.cursor / INSTRUCTION_BYTES
    }

    pub fn is_empty(&self) -> bool {
        self.cursor == 0
    }

    /// Maximum number of records
    pub fn capacity(&self) -> usize {
        self.bytes.len() / INSTRUCTION_BYTES
    }

    pub fn record(&self, index: usize) -> Option<&[u8]> {
        if index >= self.len() {
            return None;
        }
        let at = index * INSTRUCTION_BYTES;
        Some(&self.bytes.as_slice()[at..at + INSTRUCTION_BYTES])
    }

    /// Decode every record written so far
    pub fn decode_all(&self) -> Result<Vec<Instruction>> {
        (0..self.len())
            .filter_map(|i| self.record(i))
            .map(Instruction::decode)
            .collect()
    }
}
