//! Instruction encoding and execution for tilepack
//!
//! - [`instruction`]: 64-byte instruction records and the instruction buffer
//! - [`context`]: the [`Accelerator`] interface and the operand table that
//!   turns named operands into page offsets
//! - [`device`]: an in-memory accelerator for tests and host-side emulation
//!
//! # Example
//!
//! ```rust
//! use tilepack_core::PostScale;
//! use tilepack_isa::{ExecutionContext, GemmShape, MemoryDevice};
//!
//! let device = MemoryDevice::new(0x8000_0000, 4096, 1 << 20);
//! let mut ctx = ExecutionContext::new(device).unwrap();
//! for name in ["a", "b", "c"] {
//!     ctx.register(name, &[0u8; 256]).unwrap();
//! }
//! ctx.add_gemm("a", "b", "c", None, GemmShape::new(8, 8, 8), PostScale::IDENTITY)
//!     .unwrap();
//! ctx.execute(true).unwrap();
//! assert_eq!(ctx.device().launched().len(), 1);
//! ```

pub mod context;
pub mod device;
pub mod instruction;

pub use context::{Accelerator, ExecutionContext, Operand, OperandHandle};
pub use device::{Kernel, MemoryBuffer, MemoryDevice};
pub use instruction::{
    FcnOp, GemmOp, GemmShape, Instruction, InstructionBuffer, Opcode, PageOffset, SpmvOp,
    UspmvOp, INSTRUCTION_BYTES,
};
