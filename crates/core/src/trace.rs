use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::outcome::{Decision, Status};
use crate::types::{AppId, FeatureId, ModelId, RequestId, TraceId};

/// One step of the request pipeline, in the fixed order it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    CredentialResolution,
    EnvironmentBind,
    InputValidation,
    AbuseDetection,
    ModelResolution,
    FeatureCheck,
    PolicyEvaluation,
    TokenEstimate,
    BudgetReserve,
    SecurityScan,
    ProviderDispatch,
    BudgetCommit,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    Ok,
    Error,
}

/// One recorded step in a trace's span tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceSpan {
    pub step: PipelineStep,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: Option<SpanStatus>,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub error: Option<String>,
}

impl TraceSpan {
    #[must_use]
    pub fn duration_ms(&self) -> Option<i64> {
        self.ended_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

/// Top-level per-request record, finalized exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub trace_id: TraceId,
    pub request_id: RequestId,
    pub app_id: AppId,
    pub feature_id: FeatureId,
    pub model_id: Option<ModelId>,
    pub org_id: Option<String>,
    pub user_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub decision: Option<Decision>,
    pub status: Option<Status>,
    pub outcome_detail: Option<String>,
    pub spans: Vec<TraceSpan>,
    pub reasons: Vec<String>,
    pub dry_run: bool,
    pub estimated_cost_usd: Option<f64>,
    pub actual_cost_usd: Option<f64>,
    /// Populated only on BLOCK: the cost that would have been incurred had
    /// the request been allowed through, for reporting "cost avoided".
    pub estimated_cost_avoided_usd: Option<f64>,
}

impl Trace {
    #[must_use]
    pub fn start(
        request_id: RequestId,
        app_id: AppId,
        feature_id: FeatureId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            trace_id: TraceId(request_id.0.clone()),
            request_id,
            app_id,
            feature_id,
            model_id: None,
            org_id: None,
            user_id: None,
            started_at: now,
            ended_at: None,
            decision: None,
            status: None,
            outcome_detail: None,
            spans: Vec::new(),
            reasons: Vec::new(),
            dry_run: false,
            estimated_cost_usd: None,
            actual_cost_usd: None,
            estimated_cost_avoided_usd: None,
        }
    }

    pub fn start_span(&mut self, step: PipelineStep, now: DateTime<Utc>) {
        self.spans.push(TraceSpan {
            step,
            started_at: now,
            ended_at: None,
            status: None,
            data: serde_json::Value::Null,
            error: None,
        });
    }

    pub fn end_span(&mut self, step: PipelineStep, now: DateTime<Utc>, status: SpanStatus) {
        if let Some(span) = self
            .spans
            .iter_mut()
            .rev()
            .find(|s| s.step == step && s.ended_at.is_none())
        {
            span.ended_at = Some(now);
            span.status = Some(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_span_then_end_span_records_duration() {
        let mut trace = Trace::start(
            RequestId::from("r1"),
            AppId::from("acme"),
            FeatureId::from("chat"),
            Utc::now(),
        );
        let t0 = Utc::now();
        trace.start_span(PipelineStep::InputValidation, t0);
        let t1 = t0 + chrono::Duration::milliseconds(5);
        trace.end_span(PipelineStep::InputValidation, t1, SpanStatus::Ok);
        assert_eq!(trace.spans.len(), 1);
        assert_eq!(trace.spans[0].duration_ms(), Some(5));
    }
}
