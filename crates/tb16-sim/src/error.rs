//! Error types for simulator operations

use thiserror::Error;

/// Result type alias for simulator operations
pub type Result<T> = std::result::Result<T, TbError>;

/// Errors that can occur while driving the simulated device
#[derive(Debug, Error)]
pub enum TbError {
    /// Operation not legal in the current state
    #[error("Device in invalid state: {state}")]
    InvalidState {
        /// Current state description
        state: String,
    },

    /// A completion event arrived in a phase with no transition for it
    #[error("Phase hazard: no transition from {phase} on {event}")]
    PhaseHazard {
        /// Phase the controller was in
        phase: &'static str,
        /// Event that had no table entry
        event: &'static str,
    },

    /// The block did not finish within the cycle budget
    #[error("Computation timeout after {cycles} cycles")]
    Timeout {
        /// Cycles elapsed before giving up
        cycles: u64,
    },

    /// Matrix or vector dimension mismatch
    #[error("Dimension mismatch: got {got}, expected {expected}")]
    DimensionMismatch {
        /// Dimension supplied
        got: usize,
        /// Dimension required
        expected: usize,
    },

    /// Row index outside the matrix
    #[error("Row {row} out of range (matrix has {rows} rows)")]
    RowOutOfRange {
        /// Requested row
        row: usize,
        /// Row count
        rows: usize,
    },
}

impl TbError {
    /// Create an invalid state error
    pub fn invalid_state(state: impl Into<String>) -> Self {
        Self::InvalidState {
            state: state.into(),
        }
    }
}
