//! Core types for the tilepack matrix-to-hardware layout codec
//!
//! This crate holds everything the sparse layouts and the instruction encoder
//! share:
//!
//! - [`error`]: the workspace-wide error taxonomy
//! - [`config`]: hardware capacities and scheduling constants
//! - [`numeric`]: element types that can live in device buffers
//! - [`buffer`]: page-aligned host allocations
//! - [`dense`]: the dense matrix view and bit-exact reference arithmetic
//! - [`quant`]: packed post-scale and leaky-activation parameters
//! - [`compare`]: verification reports
//! - [`triplet`]: coordinate triplets and deterministic generators
//!
//! # Example
//!
//! ```rust
//! use tilepack_core::{DenseMatrix, LeakyRelu, PostScale};
//!
//! let a = DenseMatrix::<i32>::from_row_major(2, 2, &[1, 2, 3, 4]).unwrap();
//! let b = DenseMatrix::<i32>::from_row_major(2, 2, &[5, 6, 7, 8]).unwrap();
//! let x = DenseMatrix::<i32>::new(2, 2).unwrap();
//!
//! let mut c = DenseMatrix::<i32>::new(2, 2).unwrap();
//! c.multiply_with_scale_and_leaky_activation(
//!     &a,
//!     &b,
//!     &x,
//!     PostScale::IDENTITY.pack().unwrap(),
//!     LeakyRelu::IDENTITY.pack().unwrap(),
//! )
//! .unwrap();
//! assert_eq!(c.as_slice(), &[19, 22, 43, 50]);
//! ```

pub mod buffer;
pub mod compare;
pub mod config;
pub mod dense;
pub mod error;
pub mod numeric;
pub mod quant;
pub mod triplet;

pub use buffer::AlignedBuffer;
pub use compare::{compare_values, CellMismatch, CompareReport, Verdict};
pub use config::{HardwareConfig, DESCRIPTOR_BYTES, INDEX_FIELD_BITS};
pub use dense::{DenseMatrix, OwnedMatrix, HOST_ALIGNMENT};
pub use error::{Error, Result};
pub use numeric::{Element, Quantized};
pub use quant::{LeakyRelu, PostScale};
pub use triplet::{Triplet, TripletSet};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
