//! Error types for the memory subsystem.
//!
//! Most of these never reach callers of `MemoryStore`: corruption, I/O and
//! model failures are logged and absorbed so the host stays responsive.
//! They surface from the lower-level components (codec, storage, embedders)
//! where callers may want to react to them.
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MemoryError {
    /// Reading or writing the filesystem failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Converting a record or index to/from JSON failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted file could not be decompressed or parsed
    #[error("Corrupt storage at {}: {reason}", path.display())]
    Corrupt {
        /// The offending file
        path: PathBuf,
        /// What went wrong while reading it
        reason: String,
    },

    /// The embedding model could not be loaded
    #[error("Embedding model unavailable: {0}")]
    ModelUnavailable(String),

    /// A loaded model failed to embed text
    #[error("Embedding failed: {0}")]
    Embedding(String),

    /// Caller supplied a value the store refuses to persist
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The configuration file is malformed
    #[error("Config error: {0}")]
    Config(String),
}

pub type MemoryResult<T> = Result<T, MemoryError>;
