//! Error types for the header-chain organizer.

use std::io;
use thiserror::Error;

/// Outcome of a single organize call. `Ok(())` means the header was
/// integrated into the candidate chain; every other outcome is a variant
/// here. Only `StoreCorrupted` is fatal.
#[derive(Debug, Error)]
pub enum OrganizeError {
    /// Header already known to the pool or the index.
    #[error("duplicate header")]
    DuplicateHeader,

    /// Branch could not be anchored to an indexed ancestor; the header was
    /// retained in the pool.
    #[error("orphan header")]
    OrphanHeader,

    /// The branch is valid but does not carry more work than the candidate
    /// segment it would replace.
    #[error("insufficient work")]
    InsufficientWork,

    /// Context-free or context-dependent rejection.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Index read failure during work accounting; retryable if transient.
    #[error("chain operation failed: {0}")]
    OperationFailed(#[source] ChainError),

    /// The organizer was stopped while the call was in flight.
    #[error("service stopped")]
    Stopped,

    /// Reorganization failed mid-write; the candidate index may be
    /// inconsistent and the caller must halt and request repair.
    #[error("store corrupted during reorganization: {0}")]
    StoreCorrupted(#[source] ChainError),
}

impl OrganizeError {
    /// Whether the failure leaves the process unable to continue safely.
    pub fn is_fatal(&self) -> bool {
        matches!(self, OrganizeError::StoreCorrupted(_))
    }
}

/// Header validation errors, both context-free and contextual.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid proof of work")]
    InvalidProofOfWork,

    #[error("timestamp {timestamp} exceeds limit {limit}")]
    TimestampTooFar { timestamp: u32, limit: u32 },

    #[error("timestamp {timestamp} not past median time {median}")]
    TimestampNotPastMedian { timestamp: u32, median: u32 },

    #[error("compact bits {got:#010x} outside proof-of-work limit")]
    BitsOutOfRange { got: u32 },

    #[error("compact bits {got:#010x} do not match required {required:#010x}")]
    IncorrectBits { got: u32, required: u32 },

    #[error("version {got} below minimum {minimum}")]
    InvalidVersion { got: i32, minimum: i32 },

    #[error("header at height {height} does not match checkpoint")]
    CheckpointMismatch { height: u32 },

    #[error("previous hash is null for non-genesis header")]
    NullPreviousHash,

    #[error("chain state unavailable: {0}")]
    Populate(String),
}

/// Chain index access errors.
#[derive(Debug, Error, Clone)]
pub enum ChainError {
    #[error("no indexed header at height {height}")]
    NotFound { height: u32 },

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("corruption detected: {0}")]
    Corruption(String),

    #[error("inconsistent state: {0}")]
    InconsistentState(String),
}

/// Logging setup errors.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("log rotation failed: {0}")]
    RotationFailed(String),

    #[error("subscriber initialization failed: {0}")]
    SubscriberInit(String),
}

/// Type alias for organize results.
pub type OrganizeResult<T> = std::result::Result<T, OrganizeError>;

/// Type alias for validation results.
pub type ValidationResult<T> = std::result::Result<T, ValidationError>;

/// Type alias for chain index results.
pub type ChainResult<T> = std::result::Result<T, ChainError>;

/// Type alias for logging results.
pub type LoggingResult<T> = std::result::Result<T, LoggingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_store_corruption_is_fatal() {
        assert!(OrganizeError::StoreCorrupted(ChainError::WriteFailed("disk".into())).is_fatal());
        assert!(!OrganizeError::DuplicateHeader.is_fatal());
        assert!(!OrganizeError::OrphanHeader.is_fatal());
        assert!(!OrganizeError::InsufficientWork.is_fatal());
        assert!(!OrganizeError::Stopped.is_fatal());
        assert!(!OrganizeError::Validation(ValidationError::InvalidProofOfWork).is_fatal());
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::IncorrectBits {
            got: 0x1d00ffff,
            required: 0x207fffff,
        };
        assert!(err.to_string().contains("0x1d00ffff"));
        assert!(err.to_string().contains("0x207fffff"));
    }
}
