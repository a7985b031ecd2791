use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use warden_audit::RecordStore;
use warden_core::{
    BudgetPeriod, BudgetScope, ErrorCode, GatewayError, ReservationOutcome, budget_counter_key,
    fixed_point_to_usd, usd_to_fixed_point,
};
use warden_state::KvStore;

/// Implements §4.6: a two-phase reserve/commit/release ledger. Spend is
/// tracked in the KV store as a fixed-point integer counter; the record
/// store holds the authoritative soft/hard limits.
pub struct BudgetLedger {
    kv: Arc<dyn KvStore>,
    records: Arc<dyn RecordStore>,
}

/// Outcome of reserving against every scope that applies to a request.
/// Holds enough to commit or release the same set later.
pub struct ReservationHandle {
    pub scopes: Vec<(BudgetScope, BudgetPeriod, i64)>,
    pub warnings: Vec<String>,
}

impl BudgetLedger {
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>, records: Arc<dyn RecordStore>) -> Self {
        Self { kv, records }
    }

    /// Reserve `estimated_usd` against every scope in `scopes` for the
    /// budget period each one is configured with. All-or-nothing: a hard
    /// denial on any scope releases every scope already reserved in this
    /// call (§4.6 "Scope resolution order").
    ///
    /// # Errors
    /// `budget_hard_exceeded` naming the first scope that failed.
    pub async fn reserve(
        &self,
        scopes: &[BudgetScope],
        environment: Option<warden_core::Environment>,
        estimated_usd: f64,
        now: DateTime<Utc>,
    ) -> Result<ReservationHandle, GatewayError> {
        let estimated_units = usd_to_fixed_point(estimated_usd);
        let mut reserved: Vec<(BudgetScope, BudgetPeriod, i64)> = Vec::with_capacity(scopes.len());
        let mut warnings = Vec::new();

        for scope in scopes {
            let Some(budget) = self
                .records
                .get_budget(scope, environment, BudgetPeriod::Daily)
                .await
                .map_err(|err| GatewayError::new(ErrorCode::Internal, err.to_string()))?
            else {
                // No configured budget for this scope: nothing to enforce.
                continue;
            };

            let key = budget_counter_key(scope, budget.period, now);
            let ttl = Duration::from_secs(budget.period.duration_seconds() as u64);
            let total_units = self
                .kv
                .incr_by(&key, estimated_units, Some(ttl))
                .await
                .map_err(|err| GatewayError::new(ErrorCode::Internal, err.to_string()))?;
            let total_usd = fixed_point_to_usd(total_units);

            if total_usd > budget.hard_limit_usd {
                self.kv
                    .incr_by(&key, -estimated_units, None)
                    .await
                    .map_err(|err| GatewayError::new(ErrorCode::Internal, err.to_string()))?;
                // Release every scope already reserved in this call.
                self.release_reserved(&reserved).await;
                return Err(GatewayError::new(
                    ErrorCode::BudgetExceeded,
                    format!(
                        "budget_hard_exceeded: scope {} at {total_usd:.4} exceeds hard limit {:.4}",
                        scope.key_component(),
                        budget.hard_limit_usd
                    ),
                ));
            }

            if total_usd > budget.soft_limit_usd {
                warnings.push(format!(
                    "scope {} at {total_usd:.4} exceeds soft limit {:.4}",
                    scope.key_component(),
                    budget.soft_limit_usd
                ));
            }

            reserved.push((scope.clone(), budget.period, estimated_units));
        }

        Ok(ReservationHandle {
            scopes: reserved,
            warnings,
        })
    }

    /// Reconcile a reservation against the actual cost once the provider
    /// response reports real token usage. Increments by `actual - estimated`
    /// so the counter lands exactly on the real spend.
    pub async fn commit(&self, handle: &ReservationHandle, actual_usd: f64, now: DateTime<Utc>) {
        let actual_units = usd_to_fixed_point(actual_usd);
        for (scope, period, estimated_units) in &handle.scopes {
            let key = budget_counter_key(scope, *period, now);
            let delta = actual_units - estimated_units;
            if delta != 0 {
                let _ = self.kv.incr_by(&key, delta, None).await;
            }
        }
    }

    /// Release a reservation in full, e.g. when a later pipeline step denies
    /// the request after budget was already reserved.
    pub async fn release(&self, handle: &ReservationHandle, now: DateTime<Utc>) {
        for (scope, period, estimated_units) in &handle.scopes {
            let key = budget_counter_key(scope, *period, now);
            let _ = self.kv.incr_by(&key, -estimated_units, None).await;
        }
    }

    async fn release_reserved(&self, reserved: &[(BudgetScope, BudgetPeriod, i64)]) {
        for (scope, period, estimated_units) in reserved {
            let key = budget_counter_key(scope, *period, Utc::now());
            let _ = self.kv.incr_by(&key, -estimated_units, None).await;
        }
    }

    /// Inspect current spend for one scope without reserving anything.
    ///
    /// # Errors
    /// Propagates record-store and KV failures as `Internal`.
    pub async fn current_spend(
        &self,
        scope: &BudgetScope,
        environment: Option<warden_core::Environment>,
        now: DateTime<Utc>,
    ) -> Result<Option<ReservationOutcome>, GatewayError> {
        let Some(budget) = self
            .records
            .get_budget(scope, environment, BudgetPeriod::Daily)
            .await
            .map_err(|err| GatewayError::new(ErrorCode::Internal, err.to_string()))?
        else {
            return Ok(None);
        };
        let key = budget_counter_key(scope, budget.period, now);
        let current_units = self
            .kv
            .incr_by(&key, 0, None)
            .await
            .map_err(|err| GatewayError::new(ErrorCode::Internal, err.to_string()))?;
        let current_usd = fixed_point_to_usd(current_units);
        Ok(Some(ReservationOutcome {
            scope: scope.clone(),
            ok: current_usd <= budget.hard_limit_usd,
            current_usd,
            hard_limit_usd: budget.hard_limit_usd,
            soft_limit_exceeded: current_usd > budget.soft_limit_usd,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use warden_audit_memory::InMemoryRecordStore;
    use warden_core::{Budget, Environment};
    use warden_state_memory::MemoryKvStore;

    use super::*;

    fn ledger_with_budget(hard: f64, soft: f64) -> (BudgetLedger, BudgetScope) {
        let scope = BudgetScope::Application {
            app_id: warden_core::AppId::from("acme"),
        };
        let store = Arc::new(InMemoryRecordStore::new());
        store.seed_budget(Budget {
            scope: scope.clone(),
            environment: None,
            period: BudgetPeriod::Daily,
            soft_limit_usd: soft,
            hard_limit_usd: hard,
        });
        let ledger = BudgetLedger::new(Arc::new(MemoryKvStore::new()), store);
        (ledger, scope)
    }

    #[tokio::test]
    async fn reservation_under_hard_limit_succeeds() {
        let (ledger, scope) = ledger_with_budget(10.0, 5.0);
        let handle = ledger
            .reserve(&[scope], None, 1.0, Utc::now())
            .await
            .unwrap();
        assert!(handle.warnings.is_empty());
    }

    #[tokio::test]
    async fn reservation_past_hard_limit_fails_and_releases() {
        let (ledger, scope) = ledger_with_budget(1.0, 0.5);
        let err = ledger
            .reserve(&[scope.clone()], None, 2.0, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::BudgetExceeded);

        let spend = ledger
            .current_spend(&scope, None, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert!((spend.current_usd).abs() < 1e-9);
    }

    #[tokio::test]
    async fn reservation_past_soft_limit_warns_but_succeeds() {
        let (ledger, scope) = ledger_with_budget(10.0, 1.0);
        let handle = ledger
            .reserve(&[scope], None, 2.0, Utc::now())
            .await
            .unwrap();
        assert_eq!(handle.warnings.len(), 1);
    }

    #[tokio::test]
    async fn commit_reconciles_to_actual_cost() {
        let (ledger, scope) = ledger_with_budget(10.0, 5.0);
        let now = Utc::now();
        let handle = ledger.reserve(&[scope.clone()], None, 2.0, now).await.unwrap();
        ledger.commit(&handle, 0.5, now).await;
        let spend = ledger.current_spend(&scope, None, now).await.unwrap().unwrap();
        assert!((spend.current_usd - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn scope_with_no_configured_budget_is_a_no_op() {
        let scope = BudgetScope::User {
            user_id: "u1".into(),
        };
        let ledger = BudgetLedger::new(
            Arc::new(MemoryKvStore::new()),
            Arc::new(InMemoryRecordStore::new()),
        );
        let handle = ledger.reserve(&[scope], None, 5.0, Utc::now()).await.unwrap();
        assert!(handle.scopes.is_empty());
    }

    #[test]
    fn environment_param_accepted() {
        let _ = Environment::Production;
    }
}
