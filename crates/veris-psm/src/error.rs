//! Storage error types.

use thiserror::Error;
use veris_types::{ErrorCode, StateKey};

/// Errors from PSM and representation storage.
///
/// A write failure is fatal to the in-flight transition: the store is
/// assumed inconsistent for that key and no compensating entry is written.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record exists for the key.
    #[error("no record for {0}")]
    NotFound(StateKey),

    /// I/O failure while reading or writing a record.
    #[error("storage I/O: {0}")]
    Io(#[from] std::io::Error),

    /// A record failed to (de)serialize.
    #[error("storage serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store directory could not be created.
    #[error("cannot create store directory {path}")]
    DirectoryCreation {
        /// The directory that failed.
        path: std::path::PathBuf,
        /// Underlying cause.
        #[source]
        source: std::io::Error,
    },
}

impl ErrorCode for StoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "PSM_NOT_FOUND",
            Self::Io(_) => "PSM_IO",
            Self::Serialization(_) => "PSM_SERIALIZATION",
            Self::DirectoryCreation { .. } => "PSM_DIRECTORY_CREATION",
        }
    }

    fn is_recoverable(&self) -> bool {
        // NotFound is an expected lookup miss; everything else means the
        // store is suspect for the key and needs operator attention.
        matches!(self, Self::NotFound(_))
    }
}
