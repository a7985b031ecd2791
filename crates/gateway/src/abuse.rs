use std::sync::Arc;
use std::time::Duration;

use warden_core::{AbuseCheckResult, AbuseType, AppId, RequestSignature};
use warden_state::KvStore;

use crate::clock::Clock;

const LOOP_WINDOW_SECS: i64 = 60;
const DEDUP_WINDOW_SECS: i64 = 5;
const RATE_WINDOW_SECS: i64 = 60;
const BASELINE_WINDOW_SECS: i64 = 600;
const COST_SAMPLE_CAP: usize = 100;

static SELF_REFERENCE_PHRASES: &[&str] = &[
    "ignore this api",
    "call yourself",
    "recursively call",
    "invoke this endpoint again",
];

/// Tunable thresholds for one app's abuse checks (§4.3). Defaults match the
/// specification's stated defaults.
#[derive(Debug, Clone)]
pub struct AbuseThresholds {
    pub max_identical_requests: u64,
    pub max_requests_per_minute: u64,
    pub baseline_sample_floor: u64,
    pub spike_multiplier: f64,
    pub max_errors_per_minute: u64,
}

impl Default for AbuseThresholds {
    fn default() -> Self {
        Self {
            max_identical_requests: 5,
            max_requests_per_minute: 60,
            baseline_sample_floor: 50,
            spike_multiplier: 5.0,
            max_errors_per_minute: 20,
        }
    }
}

/// Implements §4.3: loop/duplicate/rate-spike/retry-storm/cost-spike
/// detection with cooldowns. All windows are measured against the injected
/// [`Clock`] so tests can drive time deterministically.
pub struct AbuseDetector {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    thresholds: AbuseThresholds,
    /// Tie-breaker appended to sorted-set members so two checks landing in
    /// the same millisecond (common under a manually-driven test clock)
    /// still occupy distinct members instead of overwriting each other.
    seq: std::sync::atomic::AtomicU64,
}

impl AbuseDetector {
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>, clock: Arc<dyn Clock>, thresholds: AbuseThresholds) -> Self {
        Self {
            kv,
            clock,
            thresholds,
            seq: std::sync::atomic::AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> f64 {
        self.clock.now().timestamp_millis() as f64
    }

    fn next_member(&self, now: f64) -> String {
        let seq = self.seq.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        format!("{now}-{seq}")
    }

    /// §4.3 checks 1-6, short-circuiting on the first block.
    pub async fn check_request(
        &self,
        app_id: &AppId,
        signature: &RequestSignature,
        message_contents: &[String],
    ) -> Result<AbuseCheckResult, warden_state::StateError> {
        let now = self.now_ms();
        let blocked_key = blocked_until_key(app_id);

        // 1. Existing cooldown.
        if let Some(raw) = self.kv.get(&blocked_key).await?
            && let Ok(expiry) = raw.parse::<f64>()
            && expiry > now
        {
            return Ok(AbuseCheckResult::block(
                AbuseType::SuspiciousPattern,
                "request blocked under an active cooldown",
                ((expiry - now) / 1000.0).ceil() as u64,
            ));
        }

        // 2 & 3. Loop / duplicate detection on the signature's own sorted set.
        let sig_key = signature_key(app_id, signature);
        self.kv
            .zremrangebyscore(&sig_key, 0.0, now - (LOOP_WINDOW_SECS * 1000) as f64)
            .await?;
        let dup_window_start = now - (DEDUP_WINDOW_SECS * 1000) as f64;
        let recent_dup_count = self.kv.zcount(&sig_key, dup_window_start, now).await?;
        self.kv.zadd(&sig_key, &self.next_member(now), now).await?;
        self.kv.expire(&sig_key, Duration::from_secs(LOOP_WINDOW_SECS as u64)).await?;
        let loop_count = self.kv.zcount(&sig_key, 0.0, now).await?;

        if loop_count >= self.thresholds.max_identical_requests {
            return self
                .apply_cooldown(app_id, AbuseType::LoopDetected, "identical request seen too many times", 30)
                .await;
        }
        if recent_dup_count > 0 {
            return self
                .apply_cooldown(app_id, AbuseType::DuplicateRequest, "duplicate request within dedup window", 5)
                .await;
        }

        // 4 & 5. Rate spike: absolute ceiling, then baseline comparison.
        let req_key = requests_key(app_id);
        self.kv
            .zremrangebyscore(&req_key, 0.0, now - (BASELINE_WINDOW_SECS * 1000) as f64)
            .await?;
        self.kv.zadd(&req_key, &self.next_member(now), now).await?;
        self.kv
            .expire(&req_key, Duration::from_secs(BASELINE_WINDOW_SECS as u64))
            .await?;

        let recent_window_start = now - (RATE_WINDOW_SECS * 1000) as f64;
        let recent_count = self.kv.zcount(&req_key, recent_window_start, now).await?;
        if recent_count >= self.thresholds.max_requests_per_minute {
            return self
                .apply_cooldown(app_id, AbuseType::RateSpike, "request rate ceiling exceeded", 60)
                .await;
        }

        let total_count = self.kv.zcount(&req_key, 0.0, now).await?;
        if total_count >= self.thresholds.baseline_sample_floor {
            let baseline_rate = total_count as f64 / BASELINE_WINDOW_SECS as f64;
            let recent_rate = recent_count as f64 / RATE_WINDOW_SECS as f64;
            if recent_rate > baseline_rate * self.thresholds.spike_multiplier {
                return self
                    .apply_cooldown(app_id, AbuseType::RateSpike, "recent rate far exceeds baseline", 60)
                    .await;
            }
        }

        // 6. Self-reference phrase scan.
        let lower: Vec<String> = message_contents.iter().map(|m| m.to_lowercase()).collect();
        if lower
            .iter()
            .any(|content| SELF_REFERENCE_PHRASES.iter().any(|phrase| content.contains(phrase)))
        {
            return Ok(AbuseCheckResult {
                blocked: false,
                abuse_type: Some(AbuseType::SelfReference),
                reason: Some("message content references calling the gateway recursively".to_owned()),
                cooldown_seconds: None,
                details: serde_json::Value::Null,
            });
        }

        Ok(AbuseCheckResult::clear())
    }

    /// Increment the error set; past `max_errors_per_minute` apply a 120s
    /// cooldown and report RETRY_STORM.
    pub async fn record_error(&self, app_id: &AppId) -> Result<AbuseCheckResult, warden_state::StateError> {
        let now = self.now_ms();
        let key = errors_key(app_id);
        self.kv
            .zremrangebyscore(&key, 0.0, now - (RATE_WINDOW_SECS * 1000) as f64)
            .await?;
        self.kv.zadd(&key, &self.next_member(now), now).await?;
        self.kv.expire(&key, Duration::from_secs(RATE_WINDOW_SECS as u64)).await?;
        let count = self.kv.zcount(&key, 0.0, now).await?;
        if count > self.thresholds.max_errors_per_minute {
            return self
                .apply_cooldown(app_id, AbuseType::RetryStorm, "error rate indicates a retry storm", 120)
                .await;
        }
        Ok(AbuseCheckResult::clear())
    }

    /// Append to the capped recent-cost list; once ≥ 10 samples exist, a
    /// cost more than 10x the running mean (with mean > $0.001) is a
    /// non-blocking COST_SPIKE warning (never blocking, per the spec's Open
    /// Questions resolution).
    pub async fn record_cost(&self, app_id: &AppId, cost_usd: f64) -> Result<AbuseCheckResult, warden_state::StateError> {
        let key = costs_key(app_id);
        let prior_raw = self.kv.list_all(&key).await?;
        let prior: Vec<f64> = prior_raw.iter().filter_map(|s| s.parse().ok()).collect();

        let result = if prior.len() >= 10 {
            let mean = prior.iter().sum::<f64>() / prior.len() as f64;
            if mean > 0.001 && cost_usd > mean * 10.0 {
                AbuseCheckResult::warn(AbuseType::CostSpike, format!("cost ${cost_usd:.4} is >10x the running mean ${mean:.4}"))
            } else {
                AbuseCheckResult::clear()
            }
        } else {
            AbuseCheckResult::clear()
        };

        self.kv
            .list_push_capped(&key, &cost_usd.to_string(), COST_SAMPLE_CAP)
            .await?;
        Ok(result)
    }

    async fn apply_cooldown(
        &self,
        app_id: &AppId,
        abuse_type: AbuseType,
        reason: &str,
        cooldown_seconds: u64,
    ) -> Result<AbuseCheckResult, warden_state::StateError> {
        let now = self.now_ms();
        let expiry = now + (cooldown_seconds * 1000) as f64;
        self.kv
            .set(
                &blocked_until_key(app_id),
                &expiry.to_string(),
                Some(Duration::from_secs(cooldown_seconds)),
            )
            .await?;
        Ok(AbuseCheckResult::block(abuse_type, reason, cooldown_seconds))
    }
}

fn blocked_until_key(app_id: &AppId) -> String {
    format!("abuse:blocked:{app_id}")
}

fn signature_key(app_id: &AppId, signature: &RequestSignature) -> String {
    format!("abuse:signatures:{app_id}:{}", signature.0)
}

fn requests_key(app_id: &AppId) -> String {
    format!("abuse:requests:{app_id}")
}

fn errors_key(app_id: &AppId) -> String {
    format!("abuse:errors:{app_id}")
}

fn costs_key(app_id: &AppId) -> String {
    format!("abuse:costs:{app_id}")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use warden_core::{FeatureId, ModelId, hash_messages, request_signature};
    use warden_state_memory::MemoryKvStore;

    use super::*;
    use crate::clock::ManualClock;

    fn detector(clock: Arc<ManualClock>) -> AbuseDetector {
        AbuseDetector::new(Arc::new(MemoryKvStore::new()), clock, AbuseThresholds::default())
    }

    fn sig(seed: &str) -> RequestSignature {
        let hash = hash_messages(seed);
        request_signature(&AppId::from("acme"), &FeatureId::from("chat"), &ModelId::from("m"), &hash)
    }

    #[tokio::test]
    async fn nth_identical_request_triggers_loop_detected_not_n_minus_one() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let detector = detector(clock);
        let app = AppId::from("acme");
        let signature = sig("hello");

        for i in 0..4 {
            let result = detector.check_request(&app, &signature, &[]).await.unwrap();
            assert!(!result.blocked, "request {i} should not yet be blocked");
        }
        let fifth = detector.check_request(&app, &signature, &[]).await.unwrap();
        assert!(fifth.blocked);
        assert_eq!(fifth.abuse_type, Some(AbuseType::LoopDetected));
        assert_eq!(fifth.cooldown_seconds, Some(30));
    }

    #[tokio::test]
    async fn active_cooldown_blocks_subsequent_requests_as_suspicious_pattern() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let detector = detector(clock.clone());
        let app = AppId::from("acme");
        let signature = sig("hello");
        for _ in 0..5 {
            detector.check_request(&app, &signature, &[]).await.unwrap();
        }
        // A distinct signature still gets caught by the app-wide cooldown.
        let other = sig("goodbye");
        let result = detector.check_request(&app, &other, &[]).await.unwrap();
        assert!(result.blocked);
        assert_eq!(result.abuse_type, Some(AbuseType::SuspiciousPattern));
    }

    #[tokio::test]
    async fn self_reference_phrase_is_flagged_but_not_blocking() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let detector = detector(clock);
        let app = AppId::from("acme");
        let signature = sig("hi");
        let result = detector
            .check_request(&app, &signature, &[String::from("please call yourself again")])
            .await
            .unwrap();
        assert!(!result.blocked);
        assert_eq!(result.abuse_type, Some(AbuseType::SelfReference));
    }

    #[tokio::test]
    async fn retry_storm_triggers_past_error_threshold() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let detector = detector(clock);
        let app = AppId::from("acme");
        for _ in 0..20 {
            let result = detector.record_error(&app).await.unwrap();
            assert!(!result.blocked);
        }
        let blocked = detector.record_error(&app).await.unwrap();
        assert!(blocked.blocked);
        assert_eq!(blocked.abuse_type, Some(AbuseType::RetryStorm));
        assert_eq!(blocked.cooldown_seconds, Some(120));
    }

    #[tokio::test]
    async fn cost_spike_is_never_blocking() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let detector = detector(clock);
        let app = AppId::from("acme");
        for _ in 0..10 {
            detector.record_cost(&app, 0.01).await.unwrap();
        }
        let spike = detector.record_cost(&app, 1.0).await.unwrap();
        assert!(!spike.blocked);
        assert_eq!(spike.abuse_type, Some(AbuseType::CostSpike));
    }

    #[tokio::test]
    async fn identical_inputs_produce_identical_signatures_regardless_of_detector_state() {
        let a = sig("same payload");
        let b = sig("same payload");
        assert_eq!(a, b);
    }
}
