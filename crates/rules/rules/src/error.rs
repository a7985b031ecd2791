use thiserror::Error;

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("failed to load policy rules: {0}")]
    Load(#[from] warden_audit::AuditError),
}
