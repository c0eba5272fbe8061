//! Store error types
//!
//! Failure taxonomy for building, loading, and querying fingerprint stores.
//! Malformed or truncated store files are fatal with a precise diagnostic;
//! partial records are never silently skipped. The "no candidate matched"
//! case is not an error at all — it surfaces as `Option::None` from the
//! query paths.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while building or querying a fingerprint store
#[derive(Debug)]
pub enum StoreError {
    /// I/O error reading or writing a store, split, or manifest file.
    /// Fatal for the whole run; no degraded mode is defined.
    Io(io::Error),

    /// Store file does not decompose into whole records
    ///
    /// Raised when the file length is not a multiple of the variant's
    /// record length, or a read lands on a partial record.
    MalformedStore { path: PathBuf, reason: String },

    /// Split-hyperplane file has the wrong size or cannot be decoded
    MalformedSplits { path: PathBuf, reason: String },

    /// Manifest is inconsistent with the store it describes
    ///
    /// # Common Causes
    /// - Store rebuilt without rewriting the manifest
    /// - Manifest for a different variant
    ManifestMismatch { reason: String },

    /// Corpus too short to produce any record
    ///
    /// One record is emitted per corpus position except the last, so at
    /// least two bytes are required.
    CorpusTooShort { len: usize, min: usize },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "I/O error: {}", e),
            StoreError::MalformedStore { path, reason } => {
                write!(f, "Malformed store {:?}: {}", path, reason)
            }
            StoreError::MalformedSplits { path, reason } => {
                write!(f, "Malformed split file {:?}: {}", path, reason)
            }
            StoreError::ManifestMismatch { reason } => {
                write!(f, "Manifest mismatch: {}", reason)
            }
            StoreError::CorpusTooShort { len, min } => {
                write!(f, "Corpus of {} bytes is too short (minimum {})", len, min)
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        StoreError::Io(err)
    }
}
