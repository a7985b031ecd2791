use std::time::Duration;

use async_trait::async_trait;

use crate::error::StateError;

/// The KV Store Port (§2, §6): atomic counters, sorted sets scored by
/// timestamp, and TTL-bearing string keys. Every method must be safe to call
/// concurrently across requests; no caller-side locking is assumed.
///
/// Sorted-set members are request/error fingerprints or timestamps; scores
/// are always a point in time expressed as milliseconds since the Unix
/// epoch, so windowed queries (`zcount`, `zremrangebyscore`) map directly to
/// the abuse detector's sliding windows.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Get a string value. Returns `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StateError>;

    /// Set a value, overwriting any previous value, with an optional TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StateError>;

    /// Set a value only if the key does not already exist. Returns `true` if
    /// the key was newly set.
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>)
    -> Result<bool, StateError>;

    /// Delete a key. Returns `true` if it existed.
    async fn delete(&self, key: &str) -> Result<bool, StateError>;

    /// Atomically add `delta` to a counter, creating it at 0 first if
    /// absent. `ttl` is applied only at creation so a reused key does not
    /// have its expiry pushed back by every increment.
    async fn incr_by(
        &self,
        key: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, StateError>;

    /// Add `member` to the sorted set at `key` with the given score,
    /// replacing any existing score for that member.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StateError>;

    /// Count members scored within `[min, max]` inclusive.
    async fn zcount(&self, key: &str, min: f64, max: f64) -> Result<u64, StateError>;

    /// Remove members scored within `[min, max]` inclusive. Returns the
    /// number removed. Used to evict entries that have aged out of a
    /// sliding window.
    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<u64, StateError>;

    /// Total number of members in the sorted set.
    async fn zcard(&self, key: &str) -> Result<u64, StateError>;

    /// Set (or refresh) a key's TTL without changing its value.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StateError>;

    /// Append a value to a capped list, trimming the oldest entries once the
    /// list exceeds `cap`. Used for the abuse detector's recent-cost sample.
    async fn list_push_capped(&self, key: &str, value: &str, cap: usize) -> Result<(), StateError>;

    /// Return every element currently in a capped list, oldest first.
    async fn list_all(&self, key: &str) -> Result<Vec<String>, StateError>;
}
