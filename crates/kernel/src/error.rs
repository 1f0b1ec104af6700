//! Error type for per-rank numerics.

use thiserror::Error;

/// Failures raised by field, transfer and body operations on a single rank.
#[derive(Error, Debug)]
pub enum KernelError {
    /// A buffer handed to a field operation has the wrong length.
    #[error("field '{field}': expected {expected} values, got {actual}")]
    BufferSize {
        /// Field name
        field: String,
        /// Expected number of values
        expected: usize,
        /// Number of values received
        actual: usize,
    },

    /// A field has a different arity than the operation requires.
    #[error("field '{field}' has {actual} components, expected {expected}")]
    ComponentMismatch {
        /// Field name
        field: String,
        /// Required component count
        expected: usize,
        /// Actual component count
        actual: usize,
    },

    /// A marker's kernel footprint leaves the domain through a non-periodic face.
    #[error("kernel footprint at {position:?} leaves the domain along axis {axis}")]
    OutOfDomain {
        /// Marker position
        position: [f64; 3],
        /// Offending axis (0 = x)
        axis: usize,
    },

    /// A marker's kernel footprint is not covered by the local interior plus halo.
    #[error("kernel footprint at {position:?} exceeds halo width {halo} on rank {rank}")]
    FootprintExceedsHalo {
        /// Marker position
        position: [f64; 3],
        /// Rank doing the transfer
        rank: usize,
        /// Configured halo width
        halo: usize,
    },

    /// Structural state and forcing grid disagree, or a body is malformed.
    #[error("body {body}: {reason}")]
    InvalidBody {
        /// Body id
        body: u32,
        /// What is wrong
        reason: String,
    },
}

/// Result alias for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;
