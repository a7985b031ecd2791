use thiserror::Error;

/// Errors surfaced by a [`crate::RecordStore`] backend.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("record store backend error: {0}")]
    Backend(String),
    #[error("record not found")]
    NotFound,
}
