//! Shared utilities for integration tests

#![allow(dead_code)]

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tilepack_core::{HardwareConfig, Triplet, TripletSet};

/// Small tiles so a few hundred rows already span a grid
pub fn small_config() -> HardwareConfig {
    HardwareConfig::default()
        .with_tile_capacity(128, 128)
        .with_alignment_width(4)
        .with_interleave(8, 4)
        .with_max_tiles(64)
}

/// Deterministic random matrix with non-zero values
pub fn random_triplets(rows: usize, cols: usize, nnz: usize, seed: u64) -> TripletSet {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    TripletSet::random(rows, cols, nnz, &mut rng).unwrap()
}

/// Entries sorted by (row, col) for multiset comparison
pub fn sorted(entries: impl IntoIterator<Item = Triplet>) -> Vec<Triplet> {
    let mut entries: Vec<Triplet> = entries.into_iter().collect();
    entries.sort_by(Triplet::by_row);
    entries
}
