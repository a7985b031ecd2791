use warden_audit::AuditError;
use warden_core::GatewayError;
use warden_provider::ProviderError;
use warden_rules::RulesError;
use warden_state::StateError;

/// Errors the pipeline's own collaborators can raise. A [`PipelineError`] is
/// always the thing `fail_trace` receives; converting it to the caller-facing
/// [`GatewayError`] (with its stable wire code) happens once, at the pipeline
/// boundary (§7).
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// An admission check produced a structured denial. Not an
    /// infrastructure failure — carries its own `GatewayError` verbatim.
    #[error(transparent)]
    Denied(#[from] GatewayError),

    #[error("kv store unavailable: {0}")]
    State(#[from] StateError),

    #[error("record store unavailable: {0}")]
    Audit(#[from] AuditError),

    #[error("provider dispatch failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("policy evaluation failed: {0}")]
    Rules(#[from] RulesError),

    #[error("credential decryption failed: {0}")]
    Crypto(#[from] warden_crypto::CryptoError),
}

impl PipelineError {
    /// Collapse any collaborator failure to the stable wire error it should
    /// surface as. Infrastructure failures (KV/record-store unreachable,
    /// unexpected provider error) become `INTERNAL`/`UPSTREAM_FAILED`;
    /// admission denials pass their own code through unchanged.
    #[must_use]
    pub fn into_gateway_error(self) -> GatewayError {
        match self {
            Self::Denied(err) => err,
            Self::State(err) => {
                GatewayError::new(warden_core::ErrorCode::Internal, err.to_string())
            }
            Self::Audit(err) => {
                GatewayError::new(warden_core::ErrorCode::Internal, err.to_string())
            }
            Self::Provider(err) => {
                GatewayError::new(warden_core::ErrorCode::UpstreamFailed, err.to_string())
            }
            Self::Rules(err) => {
                GatewayError::new(warden_core::ErrorCode::Internal, err.to_string())
            }
            Self::Crypto(err) => {
                GatewayError::new(warden_core::ErrorCode::Internal, err.to_string())
            }
        }
    }
}
