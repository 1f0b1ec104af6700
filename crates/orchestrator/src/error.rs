//! Error type for the distributed coupling engine.

use kernel::{KernelError, MarkerId};
use thiserror::Error;

/// Everything that can stop a coupled run.
///
/// Only numerical instability is ever recovered from, and only inside the
/// stepper; every variant that reaches a caller is fatal.
#[derive(Error, Debug)]
pub enum CouplingError {
    /// Invalid or unsupported configuration, detected at startup.
    #[error("configuration error in '{parameter}': {reason}")]
    Configuration {
        /// Offending parameter
        parameter: String,
        /// What is wrong with it
        reason: String,
    },

    /// A peer did not answer in time, hung up, or aborted.
    #[error("communication failure during {phase}: unreachable ranks {ranks:?}")]
    CommunicationFailure {
        /// Protocol phase that was waiting
        phase: String,
        /// Ranks that failed to deliver
        ranks: Vec<usize>,
    },

    /// Sanity bounds were exceeded for too many consecutive steps.
    #[error("numerical instability at step {step} after {consecutive} consecutive warnings: {detail}")]
    NumericalInstability {
        /// Step at which the run gave up
        step: u64,
        /// Consecutive flagged steps
        consecutive: u32,
        /// Last violation
        detail: String,
    },

    /// A marker was owned by zero or several ranks at a synchronization point.
    #[error("marker ownership violated at step {step}: marker {marker:#x} claimed by ranks {claimants:?}")]
    MigrationConsistency {
        /// Step of the violation
        step: u64,
        /// Marker id
        marker: MarkerId,
        /// Ranks claiming it
        claimants: Vec<usize>,
    },

    /// A marker's kernel footprint left the domain through a non-periodic face.
    #[error("marker {marker:#x} left the domain at step {step}")]
    MarkerOutOfDomain {
        /// Step at which it was detected
        step: u64,
        /// Marker id
        marker: MarkerId,
    },

    /// Checkpoint files are missing or inconsistent with the run.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Failure inside a per-rank kernel.
    #[error(transparent)]
    Kernel(#[from] KernelError),

    /// File system failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CouplingError {
    /// Shorthand for [`CouplingError::Configuration`].
    pub fn config(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        CouplingError::Configuration {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`CouplingError::CommunicationFailure`].
    pub fn comm(phase: impl Into<String>, ranks: Vec<usize>) -> Self {
        CouplingError::CommunicationFailure {
            phase: phase.into(),
            ranks,
        }
    }

    /// True for failures reported by a rank because a peer failed first.
    pub fn is_secondary(&self) -> bool {
        matches!(self, CouplingError::CommunicationFailure { .. })
    }
}

/// Result alias for coupling operations.
pub type CouplingResult<T> = Result<T, CouplingError>;
