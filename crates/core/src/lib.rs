pub mod budget;
pub mod context;
pub mod endpoint;
pub mod error;
pub mod feature;
pub mod identity;
pub mod model;
pub mod outcome;
pub mod policy;
pub mod signature;
pub mod trace;
pub mod types;
pub mod usage;

pub use budget::{
    Budget, BudgetPeriod, BudgetScope, ReservationOutcome, budget_counter_key,
    fixed_point_to_usd, period_boundaries, usd_to_fixed_point,
};
pub use context::RequestContext;
pub use endpoint::{CircuitBreakerConfig, CircuitState, EndpointHealth};
pub use error::{ErrorCode, GatewayError};
pub use feature::{FeatureDenialReason, FeatureDescriptor};
pub use identity::{ApiKeyRecord, Application, EnvironmentConfig, Identity, SecurityScanLevel};
pub use model::{ModelDescriptor, ModelLimits, ModelPricing, ModelStatus, ProviderKind};
pub use outcome::{Decision, Outcome, Status, decision_and_status};
pub use policy::{Condition, PolicyDecision, PolicyRule, RuleAction, ordering_key};
pub use signature::{AbuseCheckResult, AbuseType, RequestSignature, hash_messages, request_signature};
pub use trace::{PipelineStep, SpanStatus, Trace, TraceSpan};
pub use types::{AppId, Environment, FeatureId, ModelId, RequestId, TraceId};
pub use usage::{AuditEntry, UsageRecord};
