//! Sparse layouts for tilepack
//!
//! Turns a [`TripletSet`](tilepack_core::TripletSet) into the byte buffers the
//! streaming sparse pipeline reads:
//!
//! - [`tiled`]: capacity-bounded tiles with row-unit interleaving
//! - [`layout`]: descriptor table plus page-aligned tile data
//! - [`multistage`]: several chained stages in one buffer
//!
//! # Example
//!
//! ```rust
//! use tilepack_core::{HardwareConfig, Triplet, TripletSet};
//! use tilepack_sparse::SingleStageLayout;
//!
//! let config = HardwareConfig::default()
//!     .with_tile_capacity(128, 128)
//!     .with_alignment_width(4);
//! let triplets = TripletSet::new(
//!     256,
//!     256,
//!     vec![
//!         Triplet::new(0, 0, 1.0),
//!         Triplet::new(1, 5, 2.0),
//!         Triplet::new(7, 3, 3.0),
//!         Triplet::new(100, 127, 4.0),
//!     ],
//! )
//! .unwrap();
//!
//! let layout = SingleStageLayout::<f32>::from_triplets(&triplets, &config).unwrap();
//! assert_eq!(layout.tile_count(), 4);
//! assert_eq!(layout.descriptor(0).unwrap().nnz, 4);
//! assert_eq!(layout.descriptor(1).unwrap().nnz, 0);
//! ```

pub mod layout;
pub mod multistage;
pub mod tiled;

pub use layout::{entry_bytes, SingleStageLayout, SparseEntry, TileDescriptor};
pub use multistage::{MultiStageLayout, StageInput};
pub use tiled::{
    schedule_round_robin, PackedIndex, PartitionedMatrix, PartitionedTile, TileEntry, TileStats,
};
