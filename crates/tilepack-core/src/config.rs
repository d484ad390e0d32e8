//! Hardware configuration
//!
//! Every capacity the layouts depend on is a parameter here rather than a
//! compile-time constant. The defaults describe the reference pipeline
//! generation (8-wide sparse lanes, 12 MAC groups, 512-bit memory beats);
//! other targets should load their published capacities with
//! [`HardwareConfig::from_json`] or the `with_*` builders.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Bits available in each compacted index field of a sparse entry record
pub const INDEX_FIELD_BITS: u32 = 16;

/// Size of one tile descriptor (`nnz: u32`, `offset: u32`)
pub const DESCRIPTOR_BYTES: usize = 8;

/// Capacities and scheduling constants of the target pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// Alignment unit of every device-addressable offset, in bytes
    pub page_size: usize,
    /// Entries moved per transfer beat (W); tile entry counts are padded to it
    pub alignment_width: usize,
    /// Parallel row-processing units (R)
    pub row_units: usize,
    /// Longest run one row unit may emit before yielding (B)
    pub chain_depth: usize,
    /// Rows covered by one tile
    pub rows_per_tile: usize,
    /// Columns covered by one tile
    pub cols_per_tile: usize,
    /// High column bits folded into the row index field
    pub col_overflow_bits: u32,
    /// Descriptor slots reserved at the head of a single-stage layout
    pub max_tiles: usize,
    /// 4-byte words per memory beat, sizes the multi-stage metadata block
    pub ddr_width: usize,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            page_size: 4096,
            alignment_width: 8,
            row_units: 8 * 12,
            chain_depth: 16,
            rows_per_tile: 4096,
            cols_per_tile: 8192,
            col_overflow_bits: 2,
            max_tiles: 1024,
            ddr_width: 16,
        }
    }
}

impl HardwareConfig {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_alignment_width(mut self, width: usize) -> Self {
        self.alignment_width = width;
        self
    }

    /// Set the row-interleave fan-out (R) and run length (B)
    pub fn with_interleave(mut self, row_units: usize, chain_depth: usize) -> Self {
        self.row_units = row_units;
        self.chain_depth = chain_depth;
        self
    }

    pub fn with_tile_capacity(mut self, rows_per_tile: usize, cols_per_tile: usize) -> Self {
        self.rows_per_tile = rows_per_tile;
        self.cols_per_tile = cols_per_tile;
        self
    }

    pub fn with_col_overflow_bits(mut self, bits: u32) -> Self {
        self.col_overflow_bits = bits;
        self
    }

    pub fn with_max_tiles(mut self, max_tiles: usize) -> Self {
        self.max_tiles = max_tiles;
        self
    }

    pub fn with_ddr_width(mut self, ddr_width: usize) -> Self {
        self.ddr_width = ddr_width;
        self
    }

    /// Exclusive upper bound on a tile-local row index
    pub fn max_local_rows(&self) -> usize {
        1usize << INDEX_FIELD_BITS.saturating_sub(self.col_overflow_bits)
    }

    /// Exclusive upper bound on a tile-local column index
    pub fn max_local_cols(&self) -> usize {
        1usize << (INDEX_FIELD_BITS + self.col_overflow_bits.min(INDEX_FIELD_BITS - 1))
    }

    /// Tile descriptors that fit in one page
    pub fn descriptors_per_page(&self) -> usize {
        self.page_size / DESCRIPTOR_BYTES
    }

    /// Whole pages reserved for the descriptor table
    pub fn descriptor_pages(&self) -> usize {
        self.max_tiles.div_ceil(self.descriptors_per_page())
    }

    /// Tile grid for an `rows x cols` matrix: (row tiles, column tiles)
    pub fn tile_grid(&self, rows: usize, cols: usize) -> (usize, usize) {
        (
            rows.div_ceil(self.rows_per_tile),
            cols.div_ceil(self.cols_per_tile),
        )
    }

    /// Check the configuration against the record format
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("page_size", self.page_size),
            ("alignment_width", self.alignment_width),
            ("row_units", self.row_units),
            ("chain_depth", self.chain_depth),
            ("rows_per_tile", self.rows_per_tile),
            ("cols_per_tile", self.cols_per_tile),
            ("max_tiles", self.max_tiles),
            ("ddr_width", self.ddr_width),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Error::Configuration(format!("{name} must be positive")));
            }
        }

        if !self.page_size.is_power_of_two() || self.page_size % DESCRIPTOR_BYTES != 0 {
            return Err(Error::Configuration(format!(
                "page_size {} must be a power of two holding whole descriptors",
                self.page_size
            )));
        }

        if self.col_overflow_bits >= INDEX_FIELD_BITS {
            return Err(Error::Configuration(format!(
                "col_overflow_bits {} leaves no room for row indices",
                self.col_overflow_bits
            )));
        }

        if self.rows_per_tile > self.max_local_rows() {
            return Err(Error::Configuration(format!(
                "rows_per_tile {} exceeds the {} rows addressable with {} overflow bits",
                self.rows_per_tile,
                self.max_local_rows(),
                self.col_overflow_bits
            )));
        }

        if self.cols_per_tile > self.max_local_cols() {
            return Err(Error::Configuration(format!(
                "cols_per_tile {} exceeds the {} columns addressable with {} overflow bits",
                self.cols_per_tile,
                self.max_local_cols(),
                self.col_overflow_bits
            )));
        }

        Ok(())
    }

    /// Parse and validate a JSON configuration; missing fields take defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Configuration(format!("Invalid hardware config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::Configuration(format!("Cannot serialize hardware config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = HardwareConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.row_units, 96);
        assert_eq!(config.descriptors_per_page(), 512);
        assert_eq!(config.descriptor_pages(), 2);
    }

    #[test]
    fn test_index_budget() {
        let config = HardwareConfig::default();
        assert_eq!(config.max_local_rows(), 1 << 14);
        assert_eq!(config.max_local_cols(), 1 << 18);

        let config = config.with_col_overflow_bits(0);
        assert_eq!(config.max_local_rows(), 1 << 16);
        assert_eq!(config.max_local_cols(), 1 << 16);
    }

    #[test]
    fn test_capacity_beyond_index_budget() {
        let config = HardwareConfig::default().with_tile_capacity(1 << 15, 128);
        let err = config.validate().unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("rows_per_tile"));

        let config = HardwareConfig::default().with_tile_capacity(128, (1 << 18) + 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_parameters_rejected() {
        assert!(HardwareConfig::default().with_interleave(0, 16).validate().is_err());
        assert!(HardwareConfig::default().with_interleave(96, 0).validate().is_err());
        assert!(HardwareConfig::default().with_alignment_width(0).validate().is_err());
        assert!(HardwareConfig::default().with_page_size(3000).validate().is_err());
        assert!(HardwareConfig::default().with_col_overflow_bits(16).validate().is_err());
    }

    #[test]
    fn test_tile_grid() {
        let config = HardwareConfig::default().with_tile_capacity(128, 128);
        assert_eq!(config.tile_grid(256, 256), (2, 2));
        assert_eq!(config.tile_grid(257, 1), (3, 1));
    }

    #[test]
    fn test_json_round_trip() {
        let config = HardwareConfig::default()
            .with_interleave(32, 8)
            .with_tile_capacity(512, 1024);
        let json = config.to_json().unwrap();
        let parsed = HardwareConfig::from_json(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_json_partial_uses_defaults() {
        let parsed = HardwareConfig::from_json(r#"{ "row_units": 48 }"#).unwrap();
        assert_eq!(parsed.row_units, 48);
        assert_eq!(parsed.chain_depth, 16);
        assert_eq!(parsed.page_size, 4096);
    }

    #[test]
    fn test_json_invalid_rejected() {
        assert!(HardwareConfig::from_json("{ not json").is_err());
        assert!(HardwareConfig::from_json(r#"{ "chain_depth": 0 }"#).is_err());
    }
}
