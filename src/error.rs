//! Typed error kinds shared by every component.
//!
//! Replaces loose error-string matching (e.g. scanning a message for "API key")
//! with a closed enum the CLI layer can match on to decide presentation.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchgrepError {
    /// Embedder or chat capability invoked without the credentials it needs.
    #[error("{capability} is not configured: {detail}")]
    ConfigMissing { capability: &'static str, detail: String },

    /// Network, model load, or dimension-mismatch failure from an EmbedderPort.
    #[error("embedding failed: {0}")]
    EmbedderFailure(#[source] anyhow::Error),

    /// Chat completion failure from a ChatPort.
    #[error("chat completion failed: {0}")]
    ChatFailure(#[source] anyhow::Error),

    /// Store file was unreadable or failed to parse, or carries an unsupported
    /// schema version. Callers should treat this as an empty store and continue.
    #[error("vector store at {path} is corrupt: {detail}")]
    StoreCorrupt { path: PathBuf, detail: String },

    /// Store write failed; in-memory state is left consistent with the last
    /// successful write.
    #[error("failed to persist vector store at {path}: {source}")]
    StoreIOFailure { path: PathBuf, #[source] source: std::io::Error },

    /// A file was skipped because it exceeded a size/count bound. Non-fatal;
    /// callers log this and continue.
    #[error("skipped {path}: {reason}")]
    IgnoredFile { path: PathBuf, reason: &'static str },

    /// The platform filesystem event source failed. Non-fatal where possible.
    #[error("watcher failure: {0}")]
    WatcherFailure(#[source] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SearchgrepError>;
