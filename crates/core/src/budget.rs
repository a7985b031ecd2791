use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AppId, Environment, FeatureId};

/// Period over which a budget's spend counter accumulates before resetting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPeriod {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl BudgetPeriod {
    #[must_use]
    pub fn duration_seconds(self) -> i64 {
        match self {
            Self::Hourly => 3_600,
            Self::Daily => 86_400,
            Self::Weekly => 604_800,
            Self::Monthly => 2_592_000,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

/// Dimension along which a budget applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BudgetScope {
    Organization { org_id: String },
    Application { app_id: AppId },
    User { user_id: String },
    Feature { app_id: AppId, feature_id: FeatureId },
}

impl BudgetScope {
    /// Stable key component used in both the KV counter key and the
    /// authoritative RDBMS row lookup.
    #[must_use]
    pub fn key_component(&self) -> String {
        match self {
            Self::Organization { org_id } => format!("org:{org_id}"),
            Self::Application { app_id } => format!("app:{app_id}"),
            Self::User { user_id } => format!("user:{user_id}"),
            Self::Feature { app_id, feature_id } => format!("feature:{app_id}:{feature_id}"),
        }
    }
}

/// A configured budget limit for one scope/environment/period combination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Budget {
    pub scope: BudgetScope,
    pub environment: Option<Environment>,
    pub period: BudgetPeriod,
    /// Soft limit in USD; crossing it still admits the request but warns.
    pub soft_limit_usd: f64,
    /// Hard limit in USD; crossing it denies the reservation.
    pub hard_limit_usd: f64,
}

/// Fixed-point cents-times-100 amount, matching the KV counter's integer
/// representation so no floating point rounding crosses the wire.
#[must_use]
pub fn usd_to_fixed_point(usd: f64) -> i64 {
    (usd * 10_000.0).round() as i64
}

#[must_use]
pub fn fixed_point_to_usd(units: i64) -> f64 {
    units as f64 / 10_000.0
}

/// Compute the epoch-aligned `[start, end)` boundaries of the budget period
/// containing `now`, so every process agrees on the same bucket regardless
/// of when it started observing.
#[must_use]
pub fn period_boundaries(period: BudgetPeriod, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let secs = period.duration_seconds();
    let epoch = DateTime::UNIX_EPOCH;
    let elapsed = now.signed_duration_since(epoch).num_seconds();
    let window_index = elapsed.div_euclid(secs);
    let start = epoch + chrono::Duration::seconds(window_index * secs);
    let end = start + chrono::Duration::seconds(secs);
    (start, end)
}

/// Build the KV counter key for `budget:{scope}:{period}`, bucketed to the
/// current period index so the key's TTL naturally expires the old bucket.
#[must_use]
pub fn budget_counter_key(scope: &BudgetScope, period: BudgetPeriod, now: DateTime<Utc>) -> String {
    let secs = period.duration_seconds();
    let epoch = DateTime::UNIX_EPOCH;
    let elapsed = now.signed_duration_since(epoch).num_seconds();
    let window_index = elapsed.div_euclid(secs);
    format!(
        "budget:{}:{}:{window_index}",
        scope.key_component(),
        period.label()
    )
}

/// Result of reserving against a single budget scope.
#[derive(Debug, Clone)]
pub struct ReservationOutcome {
    pub scope: BudgetScope,
    pub ok: bool,
    pub current_usd: f64,
    pub hard_limit_usd: f64,
    pub soft_limit_exceeded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_point_roundtrips() {
        let units = usd_to_fixed_point(9.99);
        assert_eq!(units, 99_900);
        assert!((fixed_point_to_usd(units) - 9.99).abs() < 1e-9);
    }

    #[test]
    fn period_boundaries_are_hour_aligned() {
        let now = DateTime::parse_from_rfc3339("2026-02-10T14:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let (start, end) = period_boundaries(BudgetPeriod::Hourly, now);
        assert_eq!(start.format("%H:%M:%S").to_string(), "14:00:00");
        assert_eq!(end.format("%H:%M:%S").to_string(), "15:00:00");
    }

    #[test]
    fn counter_key_stable_for_same_bucket() {
        let now = Utc::now();
        let scope = BudgetScope::Application {
            app_id: AppId::from("acme"),
        };
        let a = budget_counter_key(&scope, BudgetPeriod::Daily, now);
        let b = budget_counter_key(&scope, BudgetPeriod::Daily, now);
        assert_eq!(a, b);
        assert!(a.starts_with("budget:app:acme:daily:"));
    }

    #[test]
    fn different_scopes_yield_different_keys() {
        let now = Utc::now();
        let app = BudgetScope::Application {
            app_id: AppId::from("acme"),
        };
        let org = BudgetScope::Organization {
            org_id: "acme".into(),
        };
        assert_ne!(
            budget_counter_key(&app, BudgetPeriod::Daily, now),
            budget_counter_key(&org, BudgetPeriod::Daily, now)
        );
    }
}
