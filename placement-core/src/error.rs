//! Error types for the placement model
//!
//! Malformed-but-recoverable input never surfaces here; these variants cover
//! inputs that cannot form a snapshot and internal invariant faults.

use thiserror::Error;

/// Result type alias for placement model operations
pub type Result<T> = std::result::Result<T, PlacementError>;

/// Unified error type for the placement model
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlacementError {
    // ===== Input Errors =====
    #[error("Region listed more than once: {0}")]
    DuplicateRegion(String),

    #[error("Unknown region index: {index} (regions: {count})")]
    UnknownRegion { index: usize, count: usize },

    #[error("Unknown server index: {index} (servers: {count})")]
    UnknownServer { index: usize, count: usize },

    // ===== Invariant Errors =====
    #[error("Snapshot invariant violated: {0}")]
    InvariantViolation(String),
}
