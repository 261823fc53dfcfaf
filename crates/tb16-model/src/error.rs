//! Error types for weight-set operations

use thiserror::Error;

/// Result type alias for weight-set operations
pub type Result<T> = std::result::Result<T, ModelError>;

/// Errors that can occur while packing or unpacking weight sets
#[derive(Debug, Error)]
pub enum ModelError {
    /// Blob shorter than its declared contents
    #[error("Weight blob too short: {got} bytes, need {expected}")]
    BlobTooShort {
        /// Bytes present
        got: usize,
        /// Bytes the header implies
        expected: usize,
    },

    /// Blob does not open with the TB16 magic
    #[error("Bad weight blob magic: {found:02x?}")]
    BadMagic {
        /// The four bytes found instead
        found: [u8; 4],
    },

    /// Format version not understood by this crate
    #[error("Unsupported weight blob version: {version}")]
    UnsupportedVersion {
        /// Version from the header
        version: u16,
    },

    /// Matrix dimension outside the supported sizes
    #[error("Unsupported matrix dimension: {dim}")]
    UnsupportedDimension {
        /// Dimension from the header
        dim: usize,
    },
}
