use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use secrecy::SecretString;
use warden_core::{CircuitBreakerConfig, EndpointHealth};
use futures::stream::BoxStream;
use warden_provider::{
    ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, ProviderAdapter, ProviderError, StreamChunk,
};

/// One entry in a model's route table: an adapter instance plus the
/// load-balancing weight/priority and optional endpoint override (§4.9).
pub struct Endpoint {
    pub id: String,
    pub adapter: Arc<dyn ProviderAdapter>,
    pub weight: f64,
    pub priority: u32,
    pub base_url: Option<String>,
    health: Mutex<EndpointHealth>,
}

impl Endpoint {
    #[must_use]
    pub fn new(id: impl Into<String>, adapter: Arc<dyn ProviderAdapter>) -> Self {
        Self {
            id: id.into(),
            adapter,
            weight: 1.0,
            priority: 0,
            base_url: None,
            health: Mutex::new(EndpointHealth::new(CircuitBreakerConfig::default())),
        }
    }

    #[must_use]
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

/// Load-balancing strategy over the currently healthy endpoint set (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadBalancingStrategy {
    RoundRobin,
    WeightedRandom,
    LeastLatency,
    Random,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub base_delay: Duration,
    pub exponential_base: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            exponential_base: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: 3,
        }
    }
}

/// Every error observed across a dispatch's retry/failover attempts.
#[derive(Debug)]
pub struct RouterError {
    pub last_error: String,
    pub attempts: Vec<(String, String)>,
}

impl std::fmt::Display for RouterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "all endpoints exhausted after {} attempt(s), last error: {}",
            self.attempts.len(),
            self.last_error
        )
    }
}

impl std::error::Error for RouterError {}

/// Implements §4.9: selects among a model's healthy endpoints per the
/// configured strategy, dispatches, retries with backoff and jitter on
/// failure, and tracks per-endpoint circuit-breaker state.
pub struct ProviderRouter {
    strategy: LoadBalancingStrategy,
    retry: RetryConfig,
    round_robin_cursor: AtomicUsize,
}

impl ProviderRouter {
    #[must_use]
    pub fn new(strategy: LoadBalancingStrategy, retry: RetryConfig) -> Self {
        Self {
            strategy,
            retry,
            round_robin_cursor: AtomicUsize::new(0),
        }
    }

    /// Dispatch `request` against `endpoints`, retrying with backoff and
    /// excluding failed endpoints within a single attempt pass.
    ///
    /// # Errors
    /// [`RouterError`] carrying every error observed, once retries and
    /// endpoints are exhausted.
    pub async fn dispatch(
        &self,
        endpoints: &[Endpoint],
        request: &ChatRequest,
        credential: &SecretString,
    ) -> Result<ChatResponse, RouterError> {
        let mut excluded: HashSet<String> = HashSet::new();
        let mut attempts: Vec<(String, String)> = Vec::new();

        for attempt in 0..self.retry.max_attempts.max(1) {
            if attempt > 0 {
                self.sleep_backoff(attempt).await;
            }

            let Some(endpoint) = self.select(endpoints, &excluded) else {
                // Every endpoint already excluded this pass: clear and retry
                // if attempts remain (§4.9 "If all endpoints have been tried
                // and retries remain, the excluded set is cleared").
                excluded.clear();
                continue;
            };

            let started = Instant::now();
            match endpoint
                .adapter
                .chat(request, credential, endpoint.base_url.as_deref())
                .await
            {
                Ok(response) => {
                    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                    endpoint
                        .health
                        .lock()
                        .expect("endpoint health mutex poisoned")
                        .record_success(latency_ms);
                    return Ok(response);
                }
                Err(err) => {
                    endpoint
                        .health
                        .lock()
                        .expect("endpoint health mutex poisoned")
                        .record_failure(Instant::now());
                    excluded.insert(endpoint.id.clone());
                    attempts.push((endpoint.id.clone(), err.to_string()));
                }
            }
        }

        let last_error = attempts
            .last()
            .map(|(_, message)| message.clone())
            .unwrap_or_else(|| "no endpoints configured".to_owned());
        Err(RouterError { last_error, attempts })
    }

    /// Retries and fails over exactly like [`Self::dispatch`] up to the point
    /// a stream is successfully opened; once an adapter hands back a stream,
    /// no further retry is attempted (§REDESIGN: streaming is a finite,
    /// restartable-before-first-byte sequence of canonical chunks — not
    /// retryable mid-stream without duplicating output to the caller).
    ///
    /// # Errors
    /// [`RouterError`] carrying every error observed opening a stream, once
    /// retries and endpoints are exhausted.
    pub async fn dispatch_stream(
        &self,
        endpoints: &[Endpoint],
        request: &ChatRequest,
        credential: &SecretString,
    ) -> Result<BoxStream<'static, Result<StreamChunk, ProviderError>>, RouterError> {
        let mut excluded: HashSet<String> = HashSet::new();
        let mut attempts: Vec<(String, String)> = Vec::new();

        for attempt in 0..self.retry.max_attempts.max(1) {
            if attempt > 0 {
                self.sleep_backoff(attempt).await;
            }

            let Some(endpoint) = self.select(endpoints, &excluded) else {
                excluded.clear();
                continue;
            };

            match endpoint
                .adapter
                .chat_stream(request, credential, endpoint.base_url.as_deref())
                .await
            {
                Ok(stream) => {
                    endpoint
                        .health
                        .lock()
                        .expect("endpoint health mutex poisoned")
                        .record_success(0.0);
                    return Ok(stream);
                }
                Err(err) => {
                    endpoint
                        .health
                        .lock()
                        .expect("endpoint health mutex poisoned")
                        .record_failure(Instant::now());
                    excluded.insert(endpoint.id.clone());
                    attempts.push((endpoint.id.clone(), err.to_string()));
                }
            }
        }

        let last_error = attempts
            .last()
            .map(|(_, message)| message.clone())
            .unwrap_or_else(|| "no endpoints configured".to_owned());
        Err(RouterError { last_error, attempts })
    }

    /// Same dispatch/retry/failover semantics as [`Self::dispatch`], against
    /// the embeddings side of the adapter trait (§4.8: embeddings share the
    /// router and circuit-breaker state with chat traffic).
    ///
    /// # Errors
    /// [`RouterError`] carrying every error observed, once retries and
    /// endpoints are exhausted.
    pub async fn dispatch_embedding(
        &self,
        endpoints: &[Endpoint],
        request: &EmbeddingRequest,
        credential: &SecretString,
    ) -> Result<EmbeddingResponse, RouterError> {
        let mut excluded: HashSet<String> = HashSet::new();
        let mut attempts: Vec<(String, String)> = Vec::new();

        for attempt in 0..self.retry.max_attempts.max(1) {
            if attempt > 0 {
                self.sleep_backoff(attempt).await;
            }

            let Some(endpoint) = self.select(endpoints, &excluded) else {
                excluded.clear();
                continue;
            };

            let started = Instant::now();
            match endpoint
                .adapter
                .embed(request, credential, endpoint.base_url.as_deref())
                .await
            {
                Ok(response) => {
                    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                    endpoint
                        .health
                        .lock()
                        .expect("endpoint health mutex poisoned")
                        .record_success(latency_ms);
                    return Ok(response);
                }
                Err(err) => {
                    endpoint
                        .health
                        .lock()
                        .expect("endpoint health mutex poisoned")
                        .record_failure(Instant::now());
                    excluded.insert(endpoint.id.clone());
                    attempts.push((endpoint.id.clone(), err.to_string()));
                }
            }
        }

        let last_error = attempts
            .last()
            .map(|(_, message)| message.clone())
            .unwrap_or_else(|| "no endpoints configured".to_owned());
        Err(RouterError { last_error, attempts })
    }

    async fn sleep_backoff(&self, attempt: u32) {
        let exponential = self.retry.base_delay.as_secs_f64() * self.retry.exponential_base.powi(attempt as i32);
        let capped = exponential.min(self.retry.max_delay.as_secs_f64());
        let jitter_factor = rand::thread_rng().gen_range(0.5..=1.5);
        let delay = Duration::from_secs_f64((capped * jitter_factor).max(0.0));
        tokio::time::sleep(delay).await;
    }

    fn select<'a>(&self, endpoints: &'a [Endpoint], excluded: &HashSet<String>) -> Option<&'a Endpoint> {
        let now = Instant::now();
        let candidates: Vec<&Endpoint> = endpoints
            .iter()
            .filter(|e| !excluded.contains(&e.id))
            .filter(|e| e.health.lock().expect("endpoint health mutex poisoned").is_healthy(now))
            .collect();

        if candidates.is_empty() {
            return None;
        }

        match self.strategy {
            LoadBalancingStrategy::RoundRobin => {
                let idx = self.round_robin_cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
                Some(candidates[idx])
            }
            LoadBalancingStrategy::Random => {
                let idx = rand::thread_rng().gen_range(0..candidates.len());
                Some(candidates[idx])
            }
            LoadBalancingStrategy::WeightedRandom => {
                let total_weight: f64 = candidates.iter().map(|e| e.weight).sum();
                if total_weight <= 0.0 {
                    return Some(candidates[0]);
                }
                let mut pick = rand::thread_rng().gen_range(0.0..total_weight);
                for endpoint in &candidates {
                    if pick < endpoint.weight {
                        return Some(endpoint);
                    }
                    pick -= endpoint.weight;
                }
                Some(candidates[candidates.len() - 1])
            }
            LoadBalancingStrategy::LeastLatency => Some(
                candidates
                    .iter()
                    .min_by(|a, b| {
                        let a_latency = a.health.lock().expect("endpoint health mutex poisoned").rolling_mean_latency_ms;
                        let b_latency = b.health.lock().expect("endpoint health mutex poisoned").rolling_mean_latency_ms;
                        a_latency.total_cmp(&b_latency)
                    })
                    .copied()
                    .expect("candidates is non-empty"),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use warden_provider::MockAdapter;

    use super::*;

    fn request() -> ChatRequest {
        ChatRequest {
            model: "mock".into(),
            messages: vec![warden_provider::ChatMessage {
                role: "user".into(),
                content: "hi".into(),
            }],
            max_tokens: None,
            temperature: None,
            stream: false,
        }
    }

    #[tokio::test]
    async fn single_healthy_endpoint_succeeds() {
        let router = ProviderRouter::new(LoadBalancingStrategy::RoundRobin, RetryConfig::default());
        let endpoints = vec![Endpoint::new("e1", Arc::new(MockAdapter))];
        let response = router
            .dispatch(&endpoints, &request(), &SecretString::from("sk-test"))
            .await
            .unwrap();
        assert!(response.content.contains("hi"));
    }

    #[tokio::test]
    async fn round_robin_alternates_across_calls() {
        let router = ProviderRouter::new(LoadBalancingStrategy::RoundRobin, RetryConfig::default());
        let endpoints = vec![
            Endpoint::new("e1", Arc::new(MockAdapter)),
            Endpoint::new("e2", Arc::new(MockAdapter)),
        ];
        let first = router.select(&endpoints, &HashSet::new()).unwrap().id.clone();
        let second = router.select(&endpoints, &HashSet::new()).unwrap().id.clone();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn open_circuit_is_excluded_from_selection() {
        let router = ProviderRouter::new(LoadBalancingStrategy::RoundRobin, RetryConfig::default());
        let endpoint = Endpoint::new("e1", Arc::new(MockAdapter));
        {
            let mut health = endpoint.health.lock().unwrap();
            for _ in 0..5 {
                health.record_failure(Instant::now());
            }
        }
        let endpoints = vec![endpoint];
        assert!(router.select(&endpoints, &HashSet::new()).is_none());
    }
}
