//! Tile partitioning of sparse coordinate matrices
//!
//! A matrix is split into a grid of `rows_per_tile x cols_per_tile` tiles.
//! Tiles are addressed by a flattened index `tile_col * n_tile_rows + tile_row`
//! (column-tile major), which is the order the streaming consumer walks the
//! descriptor table in.
//!
//! Within each tile the entries are padded to the transfer width and then
//! scheduled: entries are queued per row unit (`global_row % row_units`) and
//! emitted round-robin, at most `chain_depth` from one unit before moving on.
//! This bounds how long any single row unit can starve the others.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tilepack_core::{Element, Error, HardwareConfig, Result, TripletSet, INDEX_FIELD_BITS};
use tracing::{debug, instrument, trace};

/// Compacted index fields of a sparse entry record
///
/// `col` holds the low 16 bits of the local column; the column bits above 16
/// are folded into the top `overflow_bits` of `row`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct PackedIndex {
    pub col: u16,
    pub row: u16,
}

impl PackedIndex {
    /// Pack local coordinates, failing if either exceeds the bit budget
    pub fn pack(local_row: u32, local_col: u32, overflow_bits: u32) -> Result<Self> {
        let row_bits = INDEX_FIELD_BITS - overflow_bits;
        let col_bits = INDEX_FIELD_BITS + overflow_bits;
        if u64::from(local_row) >= 1u64 << row_bits {
            return Err(Error::overflow("local_row", local_row, 1u64 << row_bits));
        }
        if u64::from(local_col) >= 1u64 << col_bits {
            return Err(Error::overflow("local_col", local_col, 1u64 << col_bits));
        }
        Ok(Self {
            col: (local_col & 0xFFFF) as u16,
            row: (local_row | ((local_col >> INDEX_FIELD_BITS) << row_bits)) as u16,
        })
    }

    /// Recover `(local_row, local_col)`
    pub fn unpack(&self, overflow_bits: u32) -> (u32, u32) {
        let row_bits = INDEX_FIELD_BITS - overflow_bits;
        let row_mask = (1u32 << row_bits) - 1;
        let row = u32::from(self.row);
        (
            row & row_mask,
            u32::from(self.col) | ((row >> row_bits) << INDEX_FIELD_BITS),
        )
    }
}

/// A single entry in a partitioned tile
///
/// Uses local coordinates within the tile.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileEntry<T: Element> {
    /// Local row within tile (0..rows_per_tile)
    pub local_row: u32,
    /// Local column within tile (0..cols_per_tile)
    pub local_col: u32,
    pub value: T,
    /// Placeholder appended to reach the transfer width
    pub is_padding: bool,
}

impl<T: Element> TileEntry<T> {
    fn padding() -> Self {
        Self {
            local_row: 0,
            local_col: 0,
            value: T::zero(),
            is_padding: true,
        }
    }

    pub fn packed_index(&self, overflow_bits: u32) -> Result<PackedIndex> {
        PackedIndex::pack(self.local_row, self.local_col, overflow_bits)
    }
}

/// One tile of the grid, entries in scheduled order
#[derive(Clone, Debug)]
pub struct PartitionedTile<T: Element> {
    /// Flattened index: `tile_col * n_tile_rows + tile_row`
    pub index: usize,
    /// Row-tile coordinate
    pub tile_row: usize,
    /// Column-tile coordinate
    pub tile_col: usize,
    /// The actual bounds of this tile in the original matrix
    pub row_start: usize,
    pub row_end: usize,
    pub col_start: usize,
    pub col_end: usize,
    real_nnz: usize,
    entries: Vec<TileEntry<T>>,
}

impl<T: Element> PartitionedTile<T> {
    /// Entries including padding, in emission order
    pub fn entries(&self) -> &[TileEntry<T>] {
        &self.entries
    }

    /// Padded entry count, as recorded in the descriptor
    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    /// Entries that came from the input
    pub fn real_nnz(&self) -> usize {
        self.real_nnz
    }

    pub fn padding(&self) -> usize {
        self.entries.len() - self.real_nnz
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.row_end - self.row_start, self.col_end - self.col_start)
    }

    /// Check if a global coordinate falls within this tile
    pub fn contains(&self, row: usize, col: usize) -> bool {
        row >= self.row_start && row < self.row_end && col >= self.col_start && col < self.col_end
    }

    /// Convert global coordinates to local tile coordinates
    pub fn global_to_local(&self, row: usize, col: usize) -> Option<(u32, u32)> {
        if self.contains(row, col) {
            Some(((row - self.row_start) as u32, (col - self.col_start) as u32))
        } else {
            None
        }
    }

    /// Convert local tile coordinates to global coordinates
    pub fn local_to_global(&self, local_row: u32, local_col: u32) -> (usize, usize) {
        (
            self.row_start + local_row as usize,
            self.col_start + local_col as usize,
        )
    }
}

/// A sparse matrix split into a full grid of tiles
///
/// Every grid position has a tile, empty or not, so `tiles[i].index == i`.
#[derive(Clone, Debug)]
pub struct PartitionedMatrix<T: Element> {
    pub tiles: Vec<PartitionedTile<T>>,
    /// Row tiles (`ceil(rows / rows_per_tile)`)
    pub n_tile_rows: usize,
    /// Column tiles (`ceil(cols / cols_per_tile)`)
    pub n_tile_cols: usize,
    pub tile_row_size: usize,
    pub tile_col_size: usize,
    /// Original matrix dimensions
    pub n_rows: usize,
    pub n_cols: usize,
    /// Overflow bits the entries were validated against
    pub col_overflow_bits: u32,
}

/// Emit items round-robin across `row_units` queues, `chain_depth` at a time
///
/// `items` pairs each value with its queue key; keys are reduced modulo
/// `row_units`. Order within a queue is preserved.
pub fn schedule_round_robin<E>(
    items: impl IntoIterator<Item = (usize, E)>,
    row_units: usize,
    chain_depth: usize,
) -> Vec<E> {
    let units = row_units.max(1);
    let depth = chain_depth.max(1);
    let mut queues: Vec<VecDeque<E>> = (0..units).map(|_| VecDeque::new()).collect();
    let mut total = 0;
    for (key, item) in items {
        queues[key % units].push_back(item);
        total += 1;
    }

    let mut scheduled = Vec::with_capacity(total);
    while scheduled.len() < total {
        for queue in queues.iter_mut() {
            for _ in 0..depth {
                match queue.pop_front() {
                    Some(item) => scheduled.push(item),
                    None => break,
                }
            }
        }
    }
    scheduled
}

impl<T: Element> PartitionedMatrix<T> {
    /// Partition triplets according to the hardware configuration
    ///
    /// Fails if the configuration is invalid or the grid needs more tiles
    /// than the descriptor table has slots.
    #[instrument(skip(triplets, config), fields(rows = triplets.rows(), cols = triplets.cols(), nnz = triplets.nnz()))]
    pub fn from_triplets(triplets: &TripletSet, config: &HardwareConfig) -> Result<Self> {
        config.validate()?;

        let n_rows = triplets.rows();
        let n_cols = triplets.cols();
        let tile_row_size = config.rows_per_tile;
        let tile_col_size = config.cols_per_tile;
        let (n_tile_rows, n_tile_cols) = config.tile_grid(n_rows, n_cols);
        let total_tiles = n_tile_rows * n_tile_cols;

        if total_tiles > config.max_tiles {
            return Err(Error::Configuration(format!(
                "{n_rows}x{n_cols} matrix needs {total_tiles} tiles of {tile_row_size}x{tile_col_size}, \
                 descriptor table holds {}",
                config.max_tiles
            )));
        }

        // Bucket by flattened tile index, remembering each entry's row unit
        let mut buckets: Vec<Vec<(usize, TileEntry<T>)>> = vec![Vec::new(); total_tiles];
        for t in triplets {
            let (row, col) = (t.row as usize, t.col as usize);
            let tile_row = row / tile_row_size;
            let tile_col = col / tile_col_size;
            let value = T::try_from_f64(t.value).map_err(|_| {
                Error::Data(format!(
                    "entry ({row}, {col}) value {} does not fit {}",
                    t.value,
                    T::NAME
                ))
            })?;
            let entry = TileEntry {
                local_row: (row % tile_row_size) as u32,
                local_col: (col % tile_col_size) as u32,
                value,
                is_padding: false,
            };
            buckets[tile_col * n_tile_rows + tile_row].push((row % config.row_units, entry));
        }

        let mut tiles = Vec::with_capacity(total_tiles);
        for (index, mut bucket) in buckets.into_iter().enumerate() {
            let tile_row = index % n_tile_rows;
            let tile_col = index / n_tile_rows;
            let real_nnz = bucket.len();

            if real_nnz > 0 {
                let aligned = real_nnz.next_multiple_of(config.alignment_width);
                bucket.resize(aligned, (0, TileEntry::padding()));
            }

            if u32::try_from(bucket.len()).is_err() {
                return Err(Error::overflow("tile_nnz", bucket.len() as u64, u32::MAX));
            }

            let entries = schedule_round_robin(bucket, config.row_units, config.chain_depth);
            trace!(index, real_nnz, padded = entries.len(), "scheduled tile");

            tiles.push(PartitionedTile {
                index,
                tile_row,
                tile_col,
                row_start: tile_row * tile_row_size,
                row_end: ((tile_row + 1) * tile_row_size).min(n_rows),
                col_start: tile_col * tile_col_size,
                col_end: ((tile_col + 1) * tile_col_size).min(n_cols),
                real_nnz,
                entries,
            });
        }

        let matrix = Self {
            tiles,
            n_tile_rows,
            n_tile_cols,
            tile_row_size,
            tile_col_size,
            n_rows,
            n_cols,
            col_overflow_bits: config.col_overflow_bits,
        };
        debug!(
            tiles = total_tiles,
            padded_nnz = matrix.padded_nnz(),
            "partitioned sparse matrix"
        );
        Ok(matrix)
    }

    /// Tile by flattened index
    pub fn tile(&self, index: usize) -> Option<&PartitionedTile<T>> {
        self.tiles.get(index)
    }

    /// Tile by grid coordinate
    pub fn tile_at(&self, tile_row: usize, tile_col: usize) -> Option<&PartitionedTile<T>> {
        if tile_row >= self.n_tile_rows || tile_col >= self.n_tile_cols {
            return None;
        }
        self.tiles.get(tile_col * self.n_tile_rows + tile_row)
    }

    /// Tile containing a global coordinate
    pub fn tile_for(&self, row: usize, col: usize) -> Option<&PartitionedTile<T>> {
        self.tile_at(row / self.tile_row_size, col / self.tile_col_size)
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// Entries that came from the input
    pub fn nnz(&self) -> usize {
        self.tiles.iter().map(|t| t.real_nnz).sum()
    }

    /// Entries including padding
    pub fn padded_nnz(&self) -> usize {
        self.tiles.iter().map(|t| t.nnz()).sum()
    }

    /// Real entries back in global coordinates, tile by tile
    pub fn global_entries(&self) -> impl Iterator<Item = (usize, usize, T)> + '_ {
        self.tiles.iter().flat_map(|tile| {
            tile.entries
                .iter()
                .filter(|e| !e.is_padding)
                .map(move |e| {
                    let (row, col) = tile.local_to_global(e.local_row, e.local_col);
                    (row, col, e.value)
                })
        })
    }

    /// Get statistics about tile distribution
    pub fn tile_stats(&self) -> TileStats {
        let occupied: Vec<&PartitionedTile<T>> = self.tiles.iter().filter(|t| !t.is_empty()).collect();
        let n_tiles = occupied.len();
        let padded: usize = occupied.iter().map(|t| t.nnz()).sum();
        let padding: usize = occupied.iter().map(|t| t.padding()).sum();

        TileStats {
            n_tiles,
            n_empty_tiles: self.tiles.len() - n_tiles,
            avg_entries_per_tile: if n_tiles == 0 {
                0.0
            } else {
                padded as f64 / n_tiles as f64
            },
            min_entries_per_tile: occupied.iter().map(|t| t.nnz()).min().unwrap_or(0),
            max_entries_per_tile: occupied.iter().map(|t| t.nnz()).max().unwrap_or(0),
            padding_entries: padding,
        }
    }
}

/// Statistics about tile distribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileStats {
    pub n_tiles: usize,
    pub n_empty_tiles: usize,
    pub avg_entries_per_tile: f64,
    pub min_entries_per_tile: usize,
    pub max_entries_per_tile: usize,
    pub padding_entries: usize,
}
