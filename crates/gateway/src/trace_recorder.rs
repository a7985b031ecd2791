use std::sync::Arc;

use chrono::{DateTime, Utc};
use warden_audit::RecordStore;
use warden_core::{
    AppId, FeatureId, ModelId, Outcome, PipelineStep, RequestId, SpanStatus, Trace, UsageRecord,
    decision_and_status,
};

use crate::clock::Clock;

/// Implements §4.10: owns one [`Trace`]'s in-memory lifecycle for the
/// duration of a request and performs the single durable write on
/// completion. A trace is finalized exactly once, via either
/// [`Self::complete`] or [`Self::fail`].
pub struct TraceRecorder {
    clock: Arc<dyn Clock>,
    records: Arc<dyn RecordStore>,
    trace: Trace,
}

impl TraceRecorder {
    #[must_use]
    pub fn start(
        clock: Arc<dyn Clock>,
        records: Arc<dyn RecordStore>,
        request_id: RequestId,
        app_id: AppId,
        feature_id: FeatureId,
    ) -> Self {
        let now = clock.now();
        Self {
            trace: Trace::start(request_id, app_id, feature_id, now),
            clock,
            records,
        }
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn set_model(&mut self, model_id: ModelId) {
        self.trace.model_id = Some(model_id);
    }

    pub fn set_org_and_user(&mut self, org_id: Option<String>, user_id: Option<String>) {
        self.trace.org_id = org_id;
        self.trace.user_id = user_id;
    }

    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.trace.dry_run = dry_run;
    }

    pub fn start_span(&mut self, step: PipelineStep) {
        let now = self.clock.now();
        self.trace.start_span(step, now);
    }

    pub fn end_span_ok(&mut self, step: PipelineStep) {
        let now = self.clock.now();
        self.trace.end_span(step, now, SpanStatus::Ok);
    }

    pub fn end_span_error(&mut self, step: PipelineStep, error: &str) {
        let now = self.clock.now();
        self.trace.end_span(step, now, SpanStatus::Error);
        if let Some(span) = self.trace.spans.iter_mut().rev().find(|s| s.step == step) {
            span.error = Some(error.to_owned());
        }
    }

    pub fn set_estimated_cost(&mut self, estimated_usd: f64) {
        self.trace.estimated_cost_usd = Some(estimated_usd);
    }

    /// Finalize a successful (or warned) request, optionally persisting a
    /// billing artifact alongside the trace. `actual_usd` reconciles the
    /// estimate against the provider's reported token usage.
    pub async fn complete(
        mut self,
        outcome: Outcome,
        actual_usd: Option<f64>,
        usage: Option<(u64, u64)>,
    ) {
        debug_assert!(matches!(outcome, Outcome::Allowed | Outcome::Warned));
        let now = self.clock.now();
        self.trace.ended_at = Some(now);
        let (decision, status) = decision_and_status(outcome);
        self.trace.decision = Some(decision);
        self.trace.status = Some(status);
        self.trace.actual_cost_usd = actual_usd;

        if !self.trace.dry_run
            && let (Some(cost_usd), Some((input_tokens, output_tokens)), Some(model_id)) =
                (actual_usd, usage, self.trace.model_id.clone())
        {
            let _ = self
                .records
                .write_usage(&UsageRecord {
                    request_id: self.trace.request_id.clone(),
                    app_id: self.trace.app_id.clone(),
                    feature_id: self.trace.feature_id.clone(),
                    model_id,
                    input_tokens,
                    output_tokens,
                    cost_usd,
                    recorded_at: now,
                })
                .await;
        }

        let _ = self.records.write_trace(&self.trace).await;
    }

    /// Finalize a denied or errored request. `reasons` is attached verbatim
    /// so the audit trail carries the specific rule/abuse/budget detail that
    /// produced the denial.
    pub async fn fail(mut self, outcome: Outcome, reasons: Vec<String>, outcome_detail: Option<String>) {
        debug_assert!(!matches!(outcome, Outcome::Allowed | Outcome::Warned));
        let now = self.clock.now();
        self.trace.ended_at = Some(now);
        let (decision, status) = decision_and_status(outcome);
        self.trace.decision = Some(decision);
        self.trace.status = Some(status);
        self.trace.reasons = reasons;
        self.trace.outcome_detail = outcome_detail;

        if let Some(estimated) = self.trace.estimated_cost_usd {
            self.trace.estimated_cost_avoided_usd = Some(estimated);
        }

        let _ = self.records.write_trace(&self.trace).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use warden_audit_memory::InMemoryRecordStore;
    use warden_core::{AppId, FeatureId, ModelId, RequestId};

    use super::*;
    use crate::clock::ManualClock;

    fn recorder(records: Arc<InMemoryRecordStore>) -> TraceRecorder {
        TraceRecorder::start(
            Arc::new(ManualClock::new(Utc::now())),
            records,
            RequestId::from("r1"),
            AppId::from("acme"),
            FeatureId::from("chat"),
        )
    }

    #[tokio::test]
    async fn completed_trace_is_allow_success() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mut recorder = recorder(store.clone());
        recorder.set_model(ModelId::from("gpt-4o"));
        recorder.start_span(PipelineStep::ProviderDispatch);
        recorder.end_span_ok(PipelineStep::ProviderDispatch);
        recorder.complete(Outcome::Allowed, Some(0.01), Some((10, 5))).await;

        let traces = store.traces();
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].decision, Some(warden_core::Decision::Allow));
        assert_eq!(traces[0].status, Some(warden_core::Status::Success));
        assert_eq!(store.usage_records().len(), 1);
    }

    #[tokio::test]
    async fn dry_run_completion_writes_no_usage_record() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mut recorder = recorder(store.clone());
        recorder.set_model(ModelId::from("gpt-4o"));
        recorder.set_dry_run(true);
        recorder.complete(Outcome::Allowed, Some(0.01), Some((10, 5))).await;
        assert!(store.usage_records().is_empty());
        assert_eq!(store.traces().len(), 1);
    }

    #[tokio::test]
    async fn failed_trace_blocks_with_error_status_and_records_avoided_cost() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mut recorder = recorder(store.clone());
        recorder.set_estimated_cost(0.05);
        recorder
            .fail(
                Outcome::DeniedBudget,
                vec!["budget_hard_exceeded".into()],
                Some("hard limit exceeded".into()),
            )
            .await;

        let traces = store.traces();
        assert_eq!(traces[0].decision, Some(warden_core::Decision::Block));
        assert_eq!(traces[0].status, Some(warden_core::Status::Error));
        assert_eq!(traces[0].estimated_cost_avoided_usd, Some(0.05));
    }
}
