//! Execution context
//!
//! The context owns an [`Accelerator`] and the table of operands transferred
//! to it. Instructions name operands by [`OperandHandle`]; the context resolves
//! each handle to the page offset recorded at registration time.

use crate::instruction::{
    FcnOp, GemmOp, GemmShape, Instruction, InstructionBuffer, PageOffset, SpmvOp, UspmvOp,
};
use std::collections::HashMap;
use std::fmt;
use tilepack_core::{Element, Error, LeakyRelu, PostScale, Result};
use tilepack_sparse::SingleStageLayout;
use tracing::{debug, instrument};

/// Device-side transfer and launch
///
/// Implementations copy the bytes handed to [`transfer`](Self::transfer), so
/// callers may reuse their host buffers immediately.
pub trait Accelerator {
    /// Handle to device memory
    type Buffer: Clone + fmt::Debug;

    /// Address that page offset 0 refers to
    fn device_base_address(&self) -> u64;

    fn page_size(&self) -> usize;

    /// Copy `bytes` to a fresh device buffer
    fn transfer(&mut self, bytes: &[u8], sync: bool) -> Result<Self::Buffer>;

    fn device_address(&self, buffer: &Self::Buffer) -> Result<u64>;

    /// Copy device contents into `out`, which may be shorter than the buffer
    fn read_back(&mut self, buffer: &Self::Buffer, out: &mut [u8]) -> Result<()>;

    /// Run the instruction program held in `program`
    fn launch(&mut self, program: &Self::Buffer, sync: bool) -> Result<()>;

    /// Block until every launched program has finished
    fn wait(&mut self) -> Result<()>;
}

/// Caller-chosen operand name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperandHandle(String);

impl OperandHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OperandHandle {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for OperandHandle {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for OperandHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered operand
#[derive(Debug, Clone)]
pub struct Operand<B> {
    pub buffer: B,
    pub size_bytes: usize,
    pub page_offset: PageOffset,
}

pub struct ExecutionContext<A: Accelerator> {
    device: A,
    operands: HashMap<OperandHandle, Operand<A::Buffer>>,
    program: InstructionBuffer,
}

impl<A: Accelerator> ExecutionContext<A> {
    /// A context with one page of instruction space
    pub fn new(device: A) -> Result<Self> {
        let program = InstructionBuffer::with_page(device.page_size())?;
        Ok(Self {
            device,
            operands: HashMap::new(),
            program,
        })
    }

    /// Transfer `bytes` and record where they landed
    ///
    /// Registering an existing handle replaces its operand.
    pub fn register(&mut self, handle: impl Into<OperandHandle>, bytes: &[u8]) -> Result<PageOffset> {
        let handle = handle.into();
        let buffer = self.device.transfer(bytes, true)?;
        let address = self.device.device_address(&buffer)?;
        let page_offset = PageOffset::from_device_address(
            address,
            self.device.device_base_address(),
            self.device.page_size() as u64,
        )?;
        debug!(%handle, bytes = bytes.len(), page = page_offset.get(), "registered operand");
        self.operands.insert(
            handle,
            Operand {
                buffer,
                size_bytes: bytes.len(),
                page_offset,
            },
        );
        Ok(page_offset)
    }

    pub fn operand(&self, handle: &str) -> Result<&Operand<A::Buffer>> {
        self.operands
            .get(&OperandHandle::from(handle))
            .ok_or_else(|| Error::UnknownHandle(handle.to_string()))
    }

    pub fn page_offset(&self, handle: &str) -> Result<PageOffset> {
        Ok(self.operand(handle)?.page_offset)
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.operands.contains_key(&OperandHandle::from(handle))
    }

    fn optional_offset(&self, handle: Option<&str>) -> Result<PageOffset> {
        handle.map_or(Ok(PageOffset(0)), |h| self.page_offset(h))
    }

    /// Append an already resolved instruction
    pub fn push(&mut self, instruction: Instruction) -> Result<usize> {
        self.program.push(&instruction)
    }

    /// `c = post_scale(a * b + bias)`; no bias reads page 0
    pub fn add_gemm(
        &mut self,
        a: &str,
        b: &str,
        c: &str,
        bias: Option<&str>,
        shape: GemmShape,
        post_scale: PostScale,
    ) -> Result<usize> {
        let op = self.resolve_gemm(a, b, c, bias, shape, post_scale)?;
        self.push(Instruction::Gemm(op))
    }

    /// As [`add_gemm`](Self::add_gemm) followed by leaky activation
    #[allow(clippy::too_many_arguments)]
    pub fn add_fcn(
        &mut self,
        a: &str,
        b: &str,
        c: &str,
        bias: Option<&str>,
        shape: GemmShape,
        post_scale: PostScale,
        leaky: LeakyRelu,
    ) -> Result<usize> {
        let gemm = self.resolve_gemm(a, b, c, bias, shape, post_scale)?;
        self.push(Instruction::Fcn(FcnOp { gemm, leaky }))
    }

    /// Sparse multiply over the layout registered as `a`
    pub fn add_spmv<T: Element>(
        &mut self,
        a: &str,
        b: &str,
        c: &str,
        layout: &SingleStageLayout<T>,
        prelu: bool,
    ) -> Result<usize> {
        let op = SpmvOp::for_layout(
            layout,
            self.page_offset(a)?,
            self.page_offset(b)?,
            self.page_offset(c)?,
            prelu,
        )?;
        self.push(Instruction::Spmv(op))
    }

    /// Multi-stage sparse multiply over the layout registered as `a`
    pub fn add_uspmv(&mut self, a: &str, b: &str, c: &str, num_runs: u32) -> Result<usize> {
        let op = UspmvOp {
            a: self.page_offset(a)?,
            b: self.page_offset(b)?,
            c: self.page_offset(c)?,
            num_runs,
        };
        self.push(Instruction::Uspmv(op))
    }

    fn resolve_gemm(
        &self,
        a: &str,
        b: &str,
        c: &str,
        bias: Option<&str>,
        shape: GemmShape,
        post_scale: PostScale,
    ) -> Result<GemmOp> {
        Ok(GemmOp {
            a: self.page_offset(a)?,
            b: self.page_offset(b)?,
            c: self.page_offset(c)?,
            x: self.optional_offset(bias)?,
            shape,
            post_scale,
        })
    }

    pub fn instructions(&self) -> &InstructionBuffer {
        &self.program
    }

    pub fn clear_instructions(&mut self) {
        self.program.clear();
    }

    /// Transfer the instruction page and launch it
    ///
    /// With `sync`, returns once the device has finished.
    #[instrument(skip(self), fields(instructions = self.program.len()))]
    pub fn execute(&mut self, sync: bool) -> Result<()> {
        if self.program.is_empty() {
            return Err(Error::Configuration("no instructions to execute".to_string()));
        }
        let program = self.device.transfer(self.program.as_bytes(), true)?;
        self.device.launch(&program, sync)?;
        if sync {
            self.device.wait()?;
        }
        debug!(sync, "launched program");
        Ok(())
    }

    /// Copy an operand back from the device
    pub fn read_back(&mut self, handle: &str) -> Result<Vec<u8>> {
        let operand = self.operand(handle)?;
        let buffer = operand.buffer.clone();
        let mut out = vec![0u8; operand.size_bytes];
        self.device.read_back(&buffer, &mut out)?;
        Ok(out)
    }

    /// Copy an operand back into a typed slice
    pub fn read_back_into<T: bytemuck::Pod>(&mut self, handle: &str, out: &mut [T]) -> Result<()> {
        let buffer = self.operand(handle)?.buffer.clone();
        self.device.read_back(&buffer, bytemuck::cast_slice_mut(out))
    }

    pub fn device(&self) -> &A {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut A {
        &mut self.device
    }
}

impl<A: Accelerator + fmt::Debug> fmt::Debug for ExecutionContext<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("device", &self.device)
            .field("operands", &self.operands.len())
            .field("instructions", &self.program.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryDevice;
    use crate::instruction::Opcode;

    fn context() -> ExecutionContext<MemoryDevice> {
        ExecutionContext::new(MemoryDevice::new(0x4000_0000, 4096, 1 << 20)).unwrap()
    }

    #[test]
    fn test_register_assigns_distinct_pages() {
        let mut ctx = context();
        let a = ctx.register("a", &[1u8; 100]).unwrap();
        let b = ctx.register("b", &[2u8; 5000]).unwrap();
        let c = ctx.register("c", &[3u8; 10]).unwrap();
        // page 0 is never handed out
        assert_eq!(a, PageOffset(1));
        assert_eq!(b, PageOffset(2));
        assert_eq!(c, PageOffset(4));
        assert_eq!(ctx.page_offset("b").unwrap(), b);
    }

    #[test]
    fn test_unknown_handle() {
        let mut ctx = context();
        ctx.register("a", &[0u8; 16]).unwrap();
        let err = ctx
            .add_gemm("a", "missing", "a", None, GemmShape::new(1, 1, 1), PostScale::IDENTITY)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownHandle(ref h) if h == "missing"));
        assert!(ctx.instructions().is_empty());
    }

    #[test]
    fn test_bias_defaults_to_page_zero() {
        let mut ctx = context();
        for name in ["a", "b", "c"] {
            ctx.register(name, &[0u8; 64]).unwrap();
        }
        ctx.add_gemm("a", "b", "c", None, GemmShape::new(4, 4, 4), PostScale::IDENTITY)
            .unwrap();
        match ctx.instructions().decode_all().unwrap()[0] {
            Instruction::Gemm(op) => {
                assert_eq!(op.x, PageOffset(0));
                assert_eq!((op.a, op.b, op.c), (PageOffset(1), PageOffset(2), PageOffset(3)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_execute_and_read_back() {
        let mut ctx = context();
        ctx.register("a", &[7u8; 32]).unwrap();
        ctx.add_uspmv("a", "a", "a", 3).unwrap();
        ctx.execute(true).unwrap();

        let launched = ctx.device().launched();
        assert_eq!(launched.len(), 1);
        let first = Instruction::decode(&launched[0]).unwrap();
        assert_eq!(first.opcode(), Opcode::Uspmv);
        assert_eq!(ctx.read_back("a").unwrap(), vec![7u8; 32]);
    }

    #[test]
    fn test_execute_empty_program() {
        let mut ctx = context();
        assert!(ctx.execute(true).is_err());
    }

    #[test]
    fn test_clear_instructions() {
        let mut ctx = context();
        ctx.register("a", &[0u8; 8]).unwrap();
        ctx.add_uspmv("a", "a", "a", 1).unwrap();
        ctx.clear_instructions();
        assert!(ctx.instructions().is_empty());
    }
}
