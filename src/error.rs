//! Unified error type for the indexing and search engine.
//!
//! Error codes follow the pattern `VTX-XXX` so that log lines and client
//! responses can carry a stable, greppable identifier independent of the
//! variant's `Display` text.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the indexing and search engine.
///
/// Variants map onto the taxonomy in the specification: validation failures
/// (`InvalidInput`), missing entities (`NotFound`), calls made before a
/// prerequisite build/insert (`NotReady`), operations the engine
/// deliberately does not implement (`Unsupported`), deadline expiry
/// (`Timeout`), and everything else (`Internal`).
#[derive(Error, Debug)]
pub enum Error {
    /// Empty vector, dimension mismatch, k <= 0, unknown filter operator, etc.
    #[error("[VTX-001] invalid input: {0}")]
    InvalidInput(String),

    /// Vector dimension did not match the namespace's established dimension.
    #[error("[VTX-002] dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension fixed at first insert for the namespace.
        expected: usize,
        /// Dimension of the vector supplied with this call.
        actual: usize,
    },

    /// Id not present in the index, or namespace absent on explicit lookup.
    #[error("[VTX-003] not found: {0}")]
    NotFound(String),

    /// Operation requires a prerequisite (build, non-empty index) not yet met.
    #[error("[VTX-004] not ready: {0}")]
    NotReady(String),

    /// Operation intentionally not implemented for this index/mode.
    #[error("[VTX-005] unsupported: {0}")]
    Unsupported(String),

    /// Caller-supplied deadline elapsed before the operation completed.
    #[error("[VTX-006] timed out: {0}")]
    Timeout(String),

    /// I/O failure on the disk-resident graph codec.
    #[error("[VTX-007] io error: {0}")]
    Io(#[from] std::io::Error),

    /// Corrupted on-disk or in-memory index state.
    #[error("[VTX-008] corrupted state: {0}")]
    Corrupted(String),

    /// Configuration could not be loaded or failed validation.
    #[error("[VTX-009] configuration error: {0}")]
    Config(String),

    /// Anything else: should be rare and always logged with context.
    #[error("[VTX-010] internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the stable error code (e.g. `"VTX-001"`).
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "VTX-001",
            Self::DimensionMismatch { .. } => "VTX-002",
            Self::NotFound(_) => "VTX-003",
            Self::NotReady(_) => "VTX-004",
            Self::Unsupported(_) => "VTX-005",
            Self::Timeout(_) => "VTX-006",
            Self::Io(_) => "VTX-007",
            Self::Corrupted(_) => "VTX-008",
            Self::Config(_) => "VTX-009",
            Self::Internal(_) => "VTX-010",
        }
    }

    /// True for errors a caller could plausibly retry or correct and resubmit.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Corrupted(_) | Self::Internal(_))
    }
}

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::InvalidInput("x".into()).code(), "VTX-001");
        assert_eq!(
            Error::DimensionMismatch {
                expected: 3,
                actual: 4
            }
            .code(),
            "VTX-002"
        );
        assert_eq!(Error::NotReady("x".into()).code(), "VTX-004");
    }

    #[test]
    fn corrupted_and_internal_are_non_recoverable() {
        assert!(!Error::Corrupted("x".into()).is_recoverable());
        assert!(!Error::Internal("x".into()).is_recoverable());
        assert!(Error::NotFound("x".into()).is_recoverable());
    }
}
