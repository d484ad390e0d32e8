//! Single-stage sparse buffer layout
//!
//! ```text
//! +------------------------------+ 0
//! | descriptor table             |  max_tiles x {nnz: u32, offset_pages: u32}
//! | (rounded up to whole pages)  |
//! +------------------------------+ data_start = descriptor_pages * page_size
//! | tile 0 entries               |  {value: T, col: u16, row: u16} ...
//! | padding to page boundary     |
//! +------------------------------+ data_start + offset_1 * page_size
//! | tile 1 entries               |
//! | ...                          |
//! +------------------------------+
//! ```
//!
//! All fields are little-endian. Element values are written with their host
//! byte representation, so the host must be little-endian like the device.

use crate::tiled::{PackedIndex, PartitionedMatrix};
use bytemuck::{Pod, Zeroable};
use std::marker::PhantomData;
use std::mem::size_of;
use tilepack_core::{
    AlignedBuffer, Element, Error, HardwareConfig, Result, Triplet, TripletSet, DESCRIPTOR_BYTES,
};
use tracing::{debug, instrument};

/// Locates one tile's entries in the data region
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct TileDescriptor {
    /// Padded entry count
    pub nnz: u32,
    /// Start of the tile in pages, relative to the data region
    pub offset_pages: u32,
}

/// A decoded sparse entry record
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SparseEntry<T: Element> {
    pub value: T,
    pub index: PackedIndex,
}

impl<T: Element> SparseEntry<T> {
    /// Tile-local `(row, col)`
    pub fn local(&self, overflow_bits: u32) -> (u32, u32) {
        self.index.unpack(overflow_bits)
    }
}

/// Byte width of one `{value, col, row}` record for element `T`
pub const fn entry_bytes<T: Element>() -> usize {
    size_of::<T>() + 2 * size_of::<u16>()
}

fn entries_per_page<T: Element>(config: &HardwareConfig) -> Result<usize> {
    let width = entry_bytes::<T>();
    if config.page_size % width != 0 {
        return Err(Error::Configuration(format!(
            "page_size {} is not a whole number of {}-byte {} entries",
            config.page_size,
            width,
            T::NAME
        )));
    }
    Ok(config.page_size / width)
}

/// Place tiles back to back, each starting on a page boundary
///
/// Returns the descriptors and the data region length in entry slots.
fn plan_descriptors(
    tile_sizes: impl IntoIterator<Item = usize>,
    per_page: usize,
) -> Result<(Vec<TileDescriptor>, usize)> {
    let mut cursor = 0usize;
    let mut descriptors = Vec::new();
    for nnz in tile_sizes {
        let offset_pages = cursor / per_page;
        descriptors.push(TileDescriptor {
            nnz: u32::try_from(nnz).map_err(|_| Error::overflow("tile_nnz", nnz as u64, u32::MAX))?,
            offset_pages: u32::try_from(offset_pages)
                .map_err(|_| Error::overflow("offset_pages", offset_pages as u64, u32::MAX))?,
        });
        cursor = (cursor + nnz).next_multiple_of(per_page);
    }
    Ok((descriptors, cursor))
}

/// Descriptor table plus page-aligned tile data in one buffer
#[derive(Clone, Debug)]
pub struct SingleStageLayout<T: Element> {
    buffer: AlignedBuffer<u8>,
    config: HardwareConfig,
    rows: usize,
    cols: usize,
    n_tile_rows: usize,
    n_tile_cols: usize,
    nnz: usize,
    padded_nnz: usize,
    _marker: PhantomData<T>,
}

impl<T: Element> SingleStageLayout<T> {
    /// Exact buffer size for a partitioned matrix
    pub fn exact_size_bytes(partition: &PartitionedMatrix<T>, config: &HardwareConfig) -> Result<usize> {
        config.validate()?;
        let per_page = entries_per_page::<T>(config)?;
        let (_, slots) = plan_descriptors(partition.tiles.iter().map(|t| t.nnz()), per_page)?;
        Ok(config.descriptor_pages() * config.page_size + slots * entry_bytes::<T>())
    }

    /// Upper bound on the buffer size, usable before partitioning
    pub fn max_size_bytes(config: &HardwareConfig, rows: usize, cols: usize, nnz: usize) -> Result<usize> {
        config.validate()?;
        entries_per_page::<T>(config)?;
        let (tile_rows, tile_cols) = config.tile_grid(rows, cols);
        let tiles = tile_rows * tile_cols;
        Ok(config.descriptor_pages() * config.page_size
            + (nnz + tiles * (config.alignment_width - 1)) * entry_bytes::<T>()
            + tiles * config.page_size)
    }

    /// Serialize a partition into `out`, returning the bytes written
    ///
    /// Nothing is written unless the whole layout fits.
    pub fn write_into(
        partition: &PartitionedMatrix<T>,
        config: &HardwareConfig,
        out: &mut [u8],
    ) -> Result<usize> {
        config.validate()?;
        let per_page = entries_per_page::<T>(config)?;

        if partition.tile_row_size != config.rows_per_tile
            || partition.tile_col_size != config.cols_per_tile
            || partition.col_overflow_bits != config.col_overflow_bits
        {
            return Err(Error::Configuration(format!(
                "partition uses {}x{} tiles with {} overflow bits, config expects {}x{} with {}",
                partition.tile_row_size,
                partition.tile_col_size,
                partition.col_overflow_bits,
                config.rows_per_tile,
                config.cols_per_tile,
                config.col_overflow_bits
            )));
        }
        if partition.tile_count() > config.max_tiles {
            return Err(Error::Configuration(format!(
                "{} tiles do not fit {} descriptor slots",
                partition.tile_count(),
                config.max_tiles
            )));
        }

        let (descriptors, slots) =
            plan_descriptors(partition.tiles.iter().map(|t| t.nnz()), per_page)?;
        let data_start = config.descriptor_pages() * config.page_size;
        let width = entry_bytes::<T>();
        let required = data_start + slots * width;
        if out.len() < required {
            return Err(Error::BufferTooSmall {
                required,
                available: out.len(),
            });
        }

        // Encode indices up front so an overflow leaves `out` untouched
        let mut packed = Vec::with_capacity(partition.padded_nnz());
        for tile in &partition.tiles {
            for entry in tile.entries() {
                packed.push(entry.packed_index(config.col_overflow_bits)?);
            }
        }

        let out = &mut out[..required];
        out.fill(0);

        for (i, descriptor) in descriptors.iter().enumerate() {
            let at = i * DESCRIPTOR_BYTES;
            out[at..at + DESCRIPTOR_BYTES].copy_from_slice(bytemuck::bytes_of(descriptor));
        }

        let mut packed = packed.into_iter();
        for (tile, descriptor) in partition.tiles.iter().zip(&descriptors) {
            let base = data_start + descriptor.offset_pages as usize * config.page_size;
            for (k, (entry, index)) in tile.entries().iter().zip(packed.by_ref()).enumerate() {
                write_entry(&mut out[base + k * width..base + (k + 1) * width], entry.value, index);
            }
        }

        Ok(required)
    }

    /// Lay out an already partitioned matrix in a fresh page-aligned buffer
    #[instrument(skip_all, fields(tiles = partition.tile_count(), nnz = partition.nnz()))]
    pub fn build(partition: &PartitionedMatrix<T>, config: &HardwareConfig) -> Result<Self> {
        let size = Self::exact_size_bytes(partition, config)?;
        let mut buffer = AlignedBuffer::<u8>::zeroed(size, config.page_size)?;
        Self::write_into(partition, config, buffer.as_bytes_mut())?;
        debug!(
            bytes = size,
            descriptor_pages = config.descriptor_pages(),
            element = T::NAME,
            "built single-stage layout"
        );

        Ok(Self {
            buffer,
            config: *config,
            rows: partition.n_rows,
            cols: partition.n_cols,
            n_tile_rows: partition.n_tile_rows,
            n_tile_cols: partition.n_tile_cols,
            nnz: partition.nnz(),
            padded_nnz: partition.padded_nnz(),
            _marker: PhantomData,
        })
    }

    /// Partition and lay out in one step
    pub fn from_triplets(triplets: &TripletSet, config: &HardwareConfig) -> Result<Self> {
        let partition = PartitionedMatrix::from_triplets(triplets, config)?;
        Self::build(&partition, config)
    }

    /// Adopt an existing layout buffer, checking every descriptor
    pub fn from_bytes(bytes: &[u8], rows: usize, cols: usize, config: &HardwareConfig) -> Result<Self> {
        config.validate()?;
        entries_per_page::<T>(config)?;
        if rows == 0 || cols == 0 {
            return Err(Error::Configuration(format!(
                "layout dimensions must be positive, got {rows}x{cols}"
            )));
        }
        let (n_tile_rows, n_tile_cols) = config.tile_grid(rows, cols);
        if n_tile_rows * n_tile_cols > config.max_tiles {
            return Err(Error::Configuration(format!(
                "{rows}x{cols} needs {} tiles, descriptor table holds {}",
                n_tile_rows * n_tile_cols,
                config.max_tiles
            )));
        }
        let data_start = config.descriptor_pages() * config.page_size;
        if bytes.len() < data_start {
            return Err(Error::BufferTooSmall {
                required: data_start,
                available: bytes.len(),
            });
        }

        let mut layout = Self {
            buffer: AlignedBuffer::from_slice(bytes, config.page_size)?,
            config: *config,
            rows,
            cols,
            n_tile_rows,
            n_tile_cols,
            nnz: 0,
            padded_nnz: 0,
            _marker: PhantomData,
        };

        let mut padded = 0usize;
        let mut nnz = 0usize;
        for t in 0..layout.tile_count() {
            let descriptor = layout.descriptor(t)?;
            let end = layout.data_start()
                + descriptor.offset_pages as usize * config.page_size
                + descriptor.nnz as usize * entry_bytes::<T>();
            if end > bytes.len() {
                return Err(Error::Data(format!(
                    "tile {t} ({} entries at page {}) runs past the {}-byte buffer",
                    descriptor.nnz,
                    descriptor.offset_pages,
                    bytes.len()
                )));
            }
            padded += descriptor.nnz as usize;
            nnz += layout
                .tile_entries(t)?
                .iter()
                .filter(|e| !e.value.is_zero())
                .count();
        }
        layout.padded_nnz = padded;
        layout.nnz = nnz;
        Ok(layout)
    }

    /// Descriptor of a tile by flattened index
    pub fn descriptor(&self, tile_index: usize) -> Result<TileDescriptor> {
        if tile_index >= self.config.max_tiles {
            return Err(Error::overflow(
                "tile_index",
                tile_index as u64,
                self.config.max_tiles as u64,
            ));
        }
        let at = tile_index * DESCRIPTOR_BYTES;
        Ok(bytemuck::pod_read_unaligned(
            &self.buffer.as_slice()[at..at + DESCRIPTOR_BYTES],
        ))
    }

    /// Descriptors of every tile in the grid
    pub fn descriptors(&self) -> Result<Vec<TileDescriptor>> {
        (0..self.tile_count()).map(|t| self.descriptor(t)).collect()
    }

    /// Entry record at `slot`, counted from the data region start
    pub fn entry(&self, slot: usize) -> Result<SparseEntry<T>> {
        let width = entry_bytes::<T>();
        let bytes = self.buffer.as_slice();
        let slots = (bytes.len() - self.data_start()) / width;
        if slot >= slots {
            return Err(Error::overflow("entry_slot", slot as u64, slots as u64));
        }
        let at = self.data_start() + slot * width;
        Ok(read_entry(&bytes[at..at + width]))
    }

    /// Entry records of one tile, padding included, in stored order
    pub fn tile_entries(&self, tile_index: usize) -> Result<Vec<SparseEntry<T>>> {
        let descriptor = self.descriptor(tile_index)?;
        let first = descriptor.offset_pages as usize * entries_per_page::<T>(&self.config)?;
        (first..first + descriptor.nnz as usize)
            .map(|slot| self.entry(slot))
            .collect()
    }

    /// Rebuild the triplets, dropping zero-valued entries
    #[instrument(skip(self), fields(tiles = self.tile_count()))]
    pub fn decode(&self) -> Result<TripletSet> {
        let mut entries = Vec::with_capacity(self.nnz);
        for t in 0..self.tile_count() {
            let tile_row = t % self.n_tile_rows;
            let tile_col = t / self.n_tile_rows;
            for entry in self.tile_entries(t)? {
                if entry.value.is_zero() {
                    continue;
                }
                let (local_row, local_col) = entry.local(self.config.col_overflow_bits);
                let row = tile_row * self.config.rows_per_tile + local_row as usize;
                let col = tile_col * self.config.cols_per_tile + local_col as usize;
                entries.push(Triplet::new(row as u32, col as u32, entry.value.as_f64()));
            }
        }
        debug!(entries = entries.len(), "decoded single-stage layout");
        TripletSet::new(self.rows, self.cols, entries)
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    pub fn size_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn descriptor_pages(&self) -> usize {
        self.config.descriptor_pages()
    }

    /// Byte offset of the data region
    pub fn data_start(&self) -> usize {
        self.config.descriptor_pages() * self.config.page_size
    }

    /// Row tiles (Cblocks)
    pub fn n_tile_rows(&self) -> usize {
        self.n_tile_rows
    }

    /// Column tiles (Bblocks)
    pub fn n_tile_cols(&self) -> usize {
        self.n_tile_cols
    }

    pub fn tile_count(&self) -> usize {
        self.n_tile_rows * self.n_tile_cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Non-zero entries stored
    pub fn nnz(&self) -> usize {
        self.nnz
    }

    /// Entries stored, padding included
    pub fn padded_nnz(&self) -> usize {
        self.padded_nnz
    }

    pub fn config(&self) -> &HardwareConfig {
        &self.config
    }
}

fn write_entry<T: Element>(out: &mut [u8], value: T, index: PackedIndex) {
    let value_bytes = size_of::<T>();
    out[..value_bytes].copy_from_slice(bytemuck::bytes_of(&value));
    out[value_bytes..value_bytes + 2].copy_from_slice(&index.col.to_le_bytes());
    out[value_bytes + 2..value_bytes + 4].copy_from_slice(&index.row.to_le_bytes());
}

fn read_entry<T: Element>(bytes: &[u8]) -> SparseEntry<T> {
    let value_bytes = size_of::<T>();
    SparseEntry {
        value: bytemuck::pod_read_unaligned(&bytes[..value_bytes]),
        index: PackedIndex {
            col: u16::from_le_bytes([bytes[value_bytes], bytes[value_bytes + 1]]),
            row: u16::from_le_bytes([bytes[value_bytes + 2], bytes[value_bytes + 3]]),
        },
    }
}
