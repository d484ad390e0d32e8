//! Error types for the tilepack codec
//!
//! Provides a unified error type for all tilepack crates. Errors fall into two
//! families: configuration errors (the hardware contract cannot be met with the
//! chosen parameters) and data errors (malformed input rejected at ingestion).
//! Verification mismatches are not errors; see [`crate::compare::CompareReport`].

use thiserror::Error;

/// Core error type for codec operations
#[derive(Error, Debug)]
pub enum Error {
    /// Capacity, shape or parameter choice incompatible with the hardware layout
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A value does not fit the fixed-width field it must be encoded into
    #[error("Index overflow: {field} = {value} exceeds limit {limit}")]
    IndexOverflow {
        field: &'static str,
        value: u64,
        limit: u64,
    },

    /// Destination buffer cannot hold the computed layout
    #[error("Buffer too small: layout needs {required} bytes, buffer has {available}")]
    BufferTooSmall { required: usize, available: usize },

    /// Device address below the base address or not on a page boundary
    #[error("Misaligned address: {address:#x} is not a page-aligned offset from base {base:#x} (page size {page_size})")]
    MisalignedAddress {
        address: u64,
        base: u64,
        page_size: u64,
    },

    /// An instruction referenced an operand that was never registered
    #[error("Unknown operand handle: {0}")]
    UnknownHandle(String),

    /// Malformed input triplet or matrix data
    #[error("Data error: {0}")]
    Data(String),

    /// Failure reported by the accelerator execution interface
    #[error("Device error: {0}")]
    Device(String),

    /// Other errors
    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an error for mismatched matrix shapes
    pub fn shape_mismatch(
        expected: (usize, usize),
        actual: (usize, usize),
        context: &str,
    ) -> Self {
        Self::Configuration(format!(
            "Shape mismatch in {context}: expected {}x{}, got {}x{}",
            expected.0, expected.1, actual.0, actual.1
        ))
    }

    /// Create an error for a triplet coordinate outside the declared dimensions
    pub fn out_of_range(row: i64, col: i64, rows: usize, cols: usize) -> Self {
        Self::Data(format!(
            "Entry ({row}, {col}) outside matrix of {rows}x{cols}"
        ))
    }

    /// Create an overflow error, widening the operands
    pub fn overflow(field: &'static str, value: impl Into<u64>, limit: impl Into<u64>) -> Self {
        Self::IndexOverflow {
            field,
            value: value.into(),
            limit: limit.into(),
        }
    }

    /// True for errors caused by parameter or capacity choices
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::IndexOverflow { .. }
                | Self::BufferTooSmall { .. }
                | Self::MisalignedAddress { .. }
                | Self::UnknownHandle(_)
        )
    }

    /// True for errors caused by malformed input data
    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Configuration("rows_per_tile must be positive".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: rows_per_tile must be positive"
        );

        let err = Error::IndexOverflow {
            field: "local_row",
            value: 20000,
            limit: 16384,
        };
        assert_eq!(
            err.to_string(),
            "Index overflow: local_row = 20000 exceeds limit 16384"
        );

        let err = Error::BufferTooSmall {
            required: 8192,
            available: 4096,
        };
        assert_eq!(
            err.to_string(),
            "Buffer too small: layout needs 8192 bytes, buffer has 4096"
        );

        let err = Error::MisalignedAddress {
            address: 0x1010,
            base: 0x1000,
            page_size: 4096,
        };
        assert_eq!(
            err.to_string(),
            "Misaligned address: 0x1010 is not a page-aligned offset from base 0x1000 (page size 4096)"
        );

        let err = Error::UnknownHandle("weights".to_string());
        assert_eq!(err.to_string(), "Unknown operand handle: weights");

        let err = Error::Data("row index 0 in 1-based input".to_string());
        assert_eq!(err.to_string(), "Data error: row index 0 in 1-based input");
    }

    #[test]
    fn test_error_helper_functions() {
        let err = Error::shape_mismatch((2, 3), (3, 2), "multiply");
        assert_eq!(
            err.to_string(),
            "Configuration error: Shape mismatch in multiply: expected 2x3, got 3x2"
        );

        let err = Error::out_of_range(5, -1, 4, 4);
        assert_eq!(err.to_string(), "Data error: Entry (5, -1) outside matrix of 4x4");

        let err = Error::overflow("nnz", 70000u32, u16::MAX);
        match err {
            Error::IndexOverflow { field, value, limit } => {
                assert_eq!(field, "nnz");
                assert_eq!(value, 70000);
                assert_eq!(limit, 65535);
            }
            _ => panic!("Wrong error type"),
        }
    }

    #[test]
    fn test_error_classification() {
        assert!(Error::Configuration(String::new()).is_configuration());
        assert!(Error::overflow("col", 1u32, 0u32).is_configuration());
        assert!(Error::BufferTooSmall { required: 1, available: 0 }.is_configuration());
        assert!(Error::UnknownHandle("x".into()).is_configuration());
        assert!(!Error::Data(String::new()).is_configuration());

        assert!(Error::Data(String::new()).is_data());
        assert!(!Error::Device("timeout".into()).is_data());
    }

    #[test]
    fn test_error_from_anyhow() {
        let anyhow_err = anyhow::anyhow!("driver went away");
        let err: Error = anyhow_err.into();

        match err {
            Error::Other(_) => {
                assert!(err.to_string().contains("driver went away"));
            }
            _ => panic!("Wrong error type"),
        }
    }

    #[test]
    fn test_error_chaining() {
        fn inner() -> Result<()> {
            Err(Error::Configuration("inner".to_string()))
        }

        fn outer() -> Result<()> {
            inner().map_err(|e| Error::Device(format!("launch aborted: {e}")))
        }

        let err = outer().unwrap_err();
        assert!(err.to_string().contains("launch aborted"));
        assert!(err.to_string().contains("inner"));
    }
}
