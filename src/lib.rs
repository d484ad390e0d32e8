//! Matrix-to-hardware layout codec
//!
//! `tilepack` prepares dense and sparse matrices for a fixed-function
//! GEMM/SpMV pipeline and encodes the operations to run against them:
//!
//! - [`tilepack_core`]: configuration, errors, the dense view and the bit-exact
//!   reference arithmetic
//! - [`sparse`]: tile partitioning and the sparse buffer layouts
//! - [`isa`]: instruction records and the execution context
//!
//! # Example
//!
//! ```rust
//! use tilepack::prelude::*;
//!
//! let config = HardwareConfig::default().with_tile_capacity(128, 128);
//! let triplets = TripletSet::diagonal_fill(256, 256, 64, 0.0, 100.0).unwrap();
//! let layout = SingleStageLayout::<f32>::from_triplets(&triplets, &config).unwrap();
//!
//! let mut ctx = ExecutionContext::new(MemoryDevice::new(0x8000_0000, 4096, 1 << 22)).unwrap();
//! ctx.register("A", layout.as_bytes()).unwrap();
//! ctx.register("x", &[0u8; 256 * 4]).unwrap();
//! ctx.register("y", &[0u8; 256 * 4]).unwrap();
//! ctx.add_spmv("A", "x", "y", &layout, false).unwrap();
//! assert_eq!(ctx.instructions().len(), 1);
//! ```

pub use tilepack_core;
pub use tilepack_isa as isa;
pub use tilepack_sparse as sparse;

pub mod prelude {
    pub use tilepack_core::{
        AlignedBuffer, CompareReport, DenseMatrix, Element, Error, HardwareConfig, LeakyRelu,
        OwnedMatrix, PostScale, Quantized, Result, Triplet, TripletSet,
    };

    pub use tilepack_sparse::{
        MultiStageLayout, PartitionedMatrix, SingleStageLayout, StageInput, TileDescriptor,
    };

    pub use tilepack_isa::{
        Accelerator, ExecutionContext, GemmShape, Instruction, InstructionBuffer, MemoryDevice,
        Opcode, PageOffset,
    };
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
