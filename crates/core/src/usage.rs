use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AppId, FeatureId, ModelId, RequestId};

/// Billing artifact produced once per completed (non-dry-run) request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub request_id: RequestId,
    pub app_id: AppId,
    pub feature_id: FeatureId,
    pub model_id: ModelId,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Structured, append-only audit event. Distinct from a `Trace`: a trace
/// tracks one request's pipeline execution, an audit entry is a durable
/// business-event log entry (e.g. "request admitted", "budget exceeded").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub request_id: RequestId,
    pub app_id: AppId,
    pub event_type: String,
    pub recorded_at: DateTime<Utc>,
    #[serde(default)]
    pub detail: serde_json::Value,
}
