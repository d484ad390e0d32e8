//! In-process accelerator backed by host memory
//!
//! Buffers are carved out page by page from one flat allocation. Page 0 is
//! never handed out, so a zero page offset in an instruction always means
//! "no operand". An optional kernel callback runs each launched instruction
//! against the memory, which lets tests emulate the pipeline on the host.

use crate::context::Accelerator;
use crate::instruction::{Instruction, Opcode, INSTRUCTION_BYTES};
use std::fmt;
use tilepack_core::{Error, Result};
use tracing::{debug, trace};

/// Host-side emulation of one instruction: `(instruction, device memory, page size)`
pub type Kernel = Box<dyn FnMut(&Instruction, &mut [u8], usize) -> Result<()> + Send>;

/// A buffer inside [`MemoryDevice`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBuffer {
    pub page: usize,
    pub len: usize,
}

pub struct MemoryDevice {
    base: u64,
    page_size: usize,
    memory: Vec<u8>,
    next_page: usize,
    launched: Vec<Vec<u8>>,
    pending: usize,
    kernel: Option<Kernel>,
}

impl MemoryDevice {
    pub fn new(base: u64, page_size: usize, capacity_bytes: usize) -> Self {
        Self {
            base,
            page_size,
            memory: vec![0; capacity_bytes],
            next_page: 1,
            launched: Vec::new(),
            pending: 0,
            kernel: None,
        }
    }

    /// Run `kernel` for every instruction of each launched program
    pub fn with_kernel<F>(mut self, kernel: F) -> Self
    where
        F: FnMut(&Instruction, &mut [u8], usize) -> Result<()> + Send + 'static,
    {
        self.kernel = Some(Box::new(kernel));
        self
    }

    /// Programs launched so far, as transferred
    pub fn launched(&self) -> &[Vec<u8>] {
        &self.launched
    }

    /// Launches not yet waited for
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn pages_used(&self) -> usize {
        self.next_page
    }

    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    /// Contents of a buffer, failing for buffers this device never handed out
    pub fn buffer_bytes(&self, buffer: &MemoryBuffer) -> Result<&[u8]> {
        let range = self.range(buffer)?;
        Ok(&self.memory[range])
    }

    fn range(&self, buffer: &MemoryBuffer) -> Result<std::ops::Range<usize>> {
        let span = buffer
            .page
            .checked_mul(self.page_size)
            .and_then(|at| Some((at, at.checked_add(buffer.len)?)));
        let Some((at, end)) = span.filter(|&(_, end)| buffer.page != 0 && end <= self.memory.len())
        else {
            return Err(Error::Device(format!(
                "buffer at page {} ({} bytes) is outside device memory",
                buffer.page, buffer.len
            )));
        };
        Ok(at..end)
    }
}

impl Accelerator for MemoryDevice {
    type Buffer = MemoryBuffer;

    fn device_base_address(&self) -> u64 {
        self.base
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn transfer(&mut self, bytes: &[u8], _sync: bool) -> Result<MemoryBuffer> {
        let pages = bytes.len().div_ceil(self.page_size).max(1);
        let at = self.next_page * self.page_size;
        let end = at + pages * self.page_size;
        if end > self.memory.len() {
            return Err(Error::Device(format!(
                "out of device memory: {} bytes requested, {} free",
                bytes.len(),
                self.memory.len().saturating_sub(at)
            )));
        }
        self.memory[at..at + bytes.len()].copy_from_slice(bytes);
        let buffer = MemoryBuffer {
            page: self.next_page,
            len: bytes.len(),
        };
        self.next_page += pages;
        trace!(page = buffer.page, pages, "transferred buffer");
        Ok(buffer)
    }

    fn device_address(&self, buffer: &MemoryBuffer) -> Result<u64> {
        Ok(self.base + (buffer.page * self.page_size) as u64)
    }

    fn read_back(&mut self, buffer: &MemoryBuffer, out: &mut [u8]) -> Result<()> {
        if out.len() > buffer.len {
            return Err(Error::BufferTooSmall {
                required: out.len(),
                available: buffer.len,
            });
        }
        let range = self.range(buffer)?;
        out.copy_from_slice(&self.memory[range.start..range.start + out.len()]);
        Ok(())
    }

    fn launch(&mut self, program: &MemoryBuffer, sync: bool) -> Result<()> {
        let range = self.range(program)?;
        let bytes = self.memory[range].to_vec();

        if let Some(kernel) = self.kernel.as_mut() {
            for record in bytes.chunks_exact(INSTRUCTION_BYTES) {
                let code = i32::from_le_bytes([record[0], record[1], record[2], record[3]]);
                if code == Opcode::Control.code() {
                    break;
                }
                let instruction = Instruction::decode(record)?;
                kernel(&instruction, self.memory.as_mut_slice(), self.page_size)?;
            }
        }

        debug!(page = program.page, bytes = bytes.len(), sync, "launched program");
        self.launched.push(bytes);
        if !sync {
            self.pending += 1;
        }
        Ok(())
    }

    fn wait(&mut self) -> Result<()> {
        self.pending = 0;
        Ok(())
    }
}

impl fmt::Debug for MemoryDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDevice")
            .field("base", &format_args!("{:#x}", self.base))
            .field("page_size", &self.page_size)
            .field("capacity", &self.memory.len())
            .field("pages_used", &self.next_page)
            .field("launched", &self.launched.len())
            .field("kernel", &self.kernel.is_some())
            .finish()
    }
}
