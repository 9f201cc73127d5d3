//! Error types for the remap core library.

use crate::models::SymbolKey;

/// Top-level error enum for the remap core library.
#[derive(Debug, thiserror::Error)]
pub enum RemapError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Mapping conflict: cannot map {old} -> {new}, conflicts with {existing}")]
    Conflict {
        old: SymbolKey,
        new: SymbolKey,
        existing: SymbolKey,
    },

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type RemapResult<T> = Result<T, RemapError>;
