//! In-process [`KvStore`] implementation backed by [`dashmap`].
//!
//! Used by the test suite and by single-node deployments that accept
//! process-local rate/abuse state. Values do not survive a restart.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use warden_state::{KvStore, StateError};

struct StringEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl StringEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|exp| exp > now)
    }
}

/// A sorted set is a score-ordered map from member to score; `BTreeMap`
/// keyed by `(score.to_bits(), member)` would break ties arbitrarily, so we
/// store score alongside the member in a plain map and scan on range
/// queries. Windows are small (≤ a few hundred entries) so this is fine.
struct ZSetEntry {
    members: BTreeMap<String, f64>,
    expires_at: Option<Instant>,
}

struct ListEntry {
    values: Vec<String>,
}

/// In-memory KV store. Cheap to construct; safe to share via `Arc`.
#[derive(Default)]
pub struct MemoryKvStore {
    strings: DashMap<String, StringEntry>,
    counters: DashMap<String, (i64, Option<Instant>)>,
    zsets: DashMap<String, ZSetEntry>,
    lists: DashMap<String, ListEntry>,
}

impl MemoryKvStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StateError> {
        let now = Instant::now();
        Ok(self.strings.get(key).and_then(|entry| {
            if entry.is_live(now) {
                Some(entry.value.clone())
            } else {
                None
            }
        }))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StateError> {
        self.strings.insert(
            key.to_owned(),
            StringEntry {
                value: value.to_owned(),
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StateError> {
        let now = Instant::now();
        match self.strings.entry(key.to_owned()) {
            dashmap::mapref::entry::Entry::Occupied(mut occ) if !occ.get().is_live(now) => {
                occ.insert(StringEntry {
                    value: value.to_owned(),
                    expires_at: ttl.map(|d| now + d),
                });
                Ok(true)
            }
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(vac) => {
                vac.insert(StringEntry {
                    value: value.to_owned(),
                    expires_at: ttl.map(|d| now + d),
                });
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StateError> {
        Ok(self.strings.remove(key).is_some())
    }

    async fn incr_by(
        &self,
        key: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, StateError> {
        let now = Instant::now();
        let mut entry = self.counters.entry(key.to_owned()).or_insert((0, None));
        if let Some(expires_at) = entry.1
            && expires_at <= now
        {
            entry.0 = 0;
            entry.1 = ttl.map(|d| now + d);
        } else if entry.1.is_none() {
            entry.1 = ttl.map(|d| now + d);
        }
        entry.0 += delta;
        Ok(entry.0)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StateError> {
        let mut entry = self.zsets.entry(key.to_owned()).or_insert_with(|| ZSetEntry {
            members: BTreeMap::new(),
            expires_at: None,
        });
        entry.members.insert(member.to_owned(), score);
        Ok(())
    }

    async fn zcount(&self, key: &str, min: f64, max: f64) -> Result<u64, StateError> {
        Ok(self.zsets.get(key).map_or(0, |entry| {
            entry
                .members
                .values()
                .filter(|&&score| score >= min && score <= max)
                .count() as u64
        }))
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<u64, StateError> {
        let Some(mut entry) = self.zsets.get_mut(key) else {
            return Ok(0);
        };
        let before = entry.members.len();
        entry.members.retain(|_, &mut score| score < min || score > max);
        Ok((before - entry.members.len()) as u64)
    }

    async fn zcard(&self, key: &str) -> Result<u64, StateError> {
        Ok(self.zsets.get(key).map_or(0, |e| e.members.len() as u64))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StateError> {
        let expires_at = Some(Instant::now() + ttl);
        if let Some(mut entry) = self.strings.get_mut(key) {
            entry.expires_at = expires_at;
        }
        if let Some(mut entry) = self.zsets.get_mut(key) {
            entry.expires_at = expires_at;
        }
        Ok(())
    }

    async fn list_push_capped(&self, key: &str, value: &str, cap: usize) -> Result<(), StateError> {
        let mut entry = self
            .lists
            .entry(key.to_owned())
            .or_insert_with(|| ListEntry { values: Vec::new() });
        entry.values.push(value.to_owned());
        if entry.values.len() > cap {
            let excess = entry.values.len() - cap;
            entry.values.drain(0..excess);
        }
        Ok(())
    }

    async fn list_all(&self, key: &str) -> Result<Vec<String>, StateError> {
        Ok(self.lists.get(key).map(|e| e.values.clone()).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_nx_only_succeeds_once() {
        let store = MemoryKvStore::new();
        assert!(store.set_nx("k", "v1", None).await.unwrap());
        assert!(!store.set_nx("k", "v2", None).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn incr_by_creates_and_accumulates() {
        let store = MemoryKvStore::new();
        assert_eq!(store.incr_by("c", 5, None).await.unwrap(), 5);
        assert_eq!(store.incr_by("c", -2, None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn zset_window_counts_and_evicts() {
        let store = MemoryKvStore::new();
        store.zadd("z", "a", 10.0).await.unwrap();
        store.zadd("z", "b", 20.0).await.unwrap();
        store.zadd("z", "c", 30.0).await.unwrap();
        assert_eq!(store.zcount("z", 15.0, 30.0).await.unwrap(), 2);
        let removed = store.zremrangebyscore("z", 0.0, 15.0).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.zcard("z").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn capped_list_drops_oldest() {
        let store = MemoryKvStore::new();
        for i in 0..5 {
            store
                .list_push_capped("costs", &i.to_string(), 3)
                .await
                .unwrap();
        }
        assert_eq!(store.list_all("costs").await.unwrap(), vec!["2", "3", "4"]);
    }

    #[tokio::test]
    async fn ttl_expiry_hides_value() {
        let store = MemoryKvStore::new();
        store
            .set("k", "v", Some(Duration::from_millis(5)))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
