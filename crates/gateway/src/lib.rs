//! Orchestration crate for the LLM policy-enforcing gateway (§2, §4.11).
//!
//! Ties together the Credential Resolver, Input Validator, Abuse Detector,
//! Feature Registry, Budget Ledger, Security Plugin Host, and Provider
//! Router behind [`pipeline::RequestPipeline`], the fixed-order admission
//! and dispatch sequence described in §4.11. Everything here is
//! transport-agnostic: the `server` crate owns the HTTP surface and wires
//! one [`pipeline::PipelineDeps`] per process.

pub mod abuse;
pub mod budget;
pub mod clock;
pub mod credential;
pub mod error;
pub mod feature_registry;
pub mod input_validator;
pub mod pipeline;
pub mod router;
pub mod security;

pub use abuse::{AbuseDetector, AbuseThresholds};
pub use budget::{BudgetLedger, ReservationHandle};
pub use clock::{Clock, ManualClock, SystemClock};
pub use credential::{CredentialResolver, Identity};
pub use error::PipelineError;
pub use feature_registry::FeatureRegistry;
pub use input_validator::{InputValidator, MessageRole, RawMessage, ValidatedMessage, ValidationOutcome};
pub use pipeline::{
    ChatCompletionOutcome, ChatCompletionRequest, ChatStreamOutcome, EmbeddingCallOutcome, EmbeddingCallRequest,
    PipelineDeps, RequestPipeline, RouteTable,
};
pub use router::{Endpoint, LoadBalancingStrategy, ProviderRouter, RetryConfig, RouterError};
pub use security::{Finding, RiskLevel, SecurityCheckResult, SecurityPlugin, SecurityPluginHost, Severity};
