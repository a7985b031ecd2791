use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Three-state circuit breaker, one instance per provider endpoint. State
/// is owned and mutated exclusively by the Provider Router; no distributed
/// coordination is required (endpoint health is process-local).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

/// Runtime health of one provider endpoint. Latency is tracked as a
/// rolling mean so outliers decay rather than swinging the average.
#[derive(Debug, Clone)]
pub struct EndpointHealth {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<Instant>,
    pub rolling_mean_latency_ms: f64,
    pub success_count: u64,
    config: CircuitBreakerConfig,
}

impl EndpointHealth {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            rolling_mean_latency_ms: 0.0,
            success_count: 0,
            config,
        }
    }

    /// Whether this endpoint should currently be offered to the load
    /// balancer. The open-to-half-open transition is evaluated lazily
    /// here, matching the original router's "check on call" semantics
    /// rather than a background timer.
    #[must_use]
    pub fn is_healthy(&mut self, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed_since_failure = self
                    .last_failure_at
                    .map(|t| now.duration_since(t))
                    .unwrap_or(Duration::MAX);
                if elapsed_since_failure >= self.config.recovery_timeout {
                    self.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&mut self, latency_ms: f64) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.success_count += 1;
        let n = self.success_count as f64;
        self.rolling_mean_latency_ms += (latency_ms - self.rolling_mean_latency_ms) / n;
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.consecutive_failures += 1;
        self.last_failure_at = Some(now);
        if self.state == CircuitState::HalfOpen
            || self.consecutive_failures >= self.config.failure_threshold
        {
            self.state = CircuitState::Open;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_at_exactly_the_failure_threshold() {
        let mut health = EndpointHealth::new(CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
        });
        let now = Instant::now();
        health.record_failure(now);
        health.record_failure(now);
        assert_eq!(health.state, CircuitState::Closed, "N-1th failure must not open");
        health.record_failure(now);
        assert_eq!(health.state, CircuitState::Open, "Nth failure must open");
    }

    #[test]
    fn half_open_probe_failure_reopens() {
        let mut health = EndpointHealth::new(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_millis(1),
        });
        let t0 = Instant::now();
        health.record_failure(t0);
        assert_eq!(health.state, CircuitState::Open);
        std::thread::sleep(Duration::from_millis(5));
        assert!(health.is_healthy(Instant::now()));
        assert_eq!(health.state, CircuitState::HalfOpen);
        health.record_failure(Instant::now());
        assert_eq!(health.state, CircuitState::Open);
    }

    #[test]
    fn half_open_probe_success_closes_and_resets_counter() {
        let mut health = EndpointHealth::new(CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_millis(1),
        });
        health.record_failure(Instant::now());
        health.record_failure(Instant::now());
        std::thread::sleep(Duration::from_millis(5));
        assert!(health.is_healthy(Instant::now()));
        health.record_success(120.0);
        assert_eq!(health.state, CircuitState::Closed);
        assert_eq!(health.consecutive_failures, 0);
    }

    #[test]
    fn rolling_mean_updates_incrementally() {
        let mut health = EndpointHealth::new(CircuitBreakerConfig::default());
        health.record_success(100.0);
        health.record_success(200.0);
        assert!((health.rolling_mean_latency_ms - 150.0).abs() < 1e-9);
    }
}
