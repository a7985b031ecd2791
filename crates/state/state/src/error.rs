use thiserror::Error;

/// Errors surfaced by a [`crate::KvStore`] backend.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("kv store backend error: {0}")]
    Backend(String),
    #[error("kv store operation timed out")]
    Timeout,
    #[error("kv store value was not valid utf-8 or the expected shape: {0}")]
    Serialization(String),
}
