use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::AsyncCommands;
use warden_state::{KvStore, StateError};

use crate::config::RedisConfig;
use crate::key_render::render_key;

/// Redis-backed [`KvStore`]. Sorted sets map directly onto Redis `ZADD` /
/// `ZCOUNT` / `ZREMRANGEBYSCORE`, so the abuse detector's sliding windows
/// cost one round trip per check rather than a full scan.
pub struct RedisKvStore {
    pool: Pool,
    prefix: String,
}

impl RedisKvStore {
    /// Build a connection pool from `config` without connecting yet.
    ///
    /// # Errors
    /// Returns an error if the pool configuration itself is invalid (e.g. a
    /// malformed URL); this does not attempt a connection.
    pub fn connect(config: &RedisConfig) -> Result<Self, StateError> {
        let pool_cfg = PoolConfig::from_url(config.effective_url());
        let pool = pool_cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StateError::Backend(e.to_string()))?;
        Ok(Self {
            pool,
            prefix: config.prefix.clone(),
        })
    }

    fn key(&self, key: &str) -> String {
        render_key(&self.prefix, key)
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, StateError> {
        self.pool
            .get()
            .await
            .map_err(|e| StateError::Backend(e.to_string()))
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StateError> {
        let mut conn = self.conn().await?;
        conn.get(self.key(key))
            .await
            .map_err(|e| StateError::Backend(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StateError> {
        let mut conn = self.conn().await?;
        let rkey = self.key(key);
        match ttl {
            Some(d) => conn
                .set_ex::<_, _, ()>(rkey, value, d.as_secs().max(1))
                .await
                .map_err(|e| StateError::Backend(e.to_string())),
            None => conn
                .set::<_, _, ()>(rkey, value)
                .await
                .map_err(|e| StateError::Backend(e.to_string())),
        }
    }

    async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StateError> {
        let mut conn = self.conn().await?;
        let rkey = self.key(key);
        let mut cmd = redis::cmd("SET");
        cmd.arg(&rkey).arg(value).arg("NX");
        if let Some(d) = ttl {
            cmd.arg("EX").arg(d.as_secs().max(1));
        }
        let reply: redis::RedisResult<Option<String>> = cmd.query_async(&mut conn).await;
        Ok(matches!(reply, Ok(Some(_))))
    }

    async fn delete(&self, key: &str) -> Result<bool, StateError> {
        let mut conn = self.conn().await?;
        let removed: u64 = conn
            .del(self.key(key))
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;
        Ok(removed > 0)
    }

    async fn incr_by(
        &self,
        key: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, StateError> {
        let mut conn = self.conn().await?;
        let rkey = self.key(key);
        let value: i64 = conn
            .incr(&rkey, delta)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;
        if let Some(d) = ttl {
            let _: Result<(), _> = conn.expire(&rkey, d.as_secs().max(1) as i64).await;
        }
        Ok(value)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StateError> {
        let mut conn = self.conn().await?;
        conn.zadd(self.key(key), member, score)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))
    }

    async fn zcount(&self, key: &str, min: f64, max: f64) -> Result<u64, StateError> {
        let mut conn = self.conn().await?;
        conn.zcount(self.key(key), min, max)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<u64, StateError> {
        let mut conn = self.conn().await?;
        conn.zrembyscore(self.key(key), min, max)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))
    }

    async fn zcard(&self, key: &str) -> Result<u64, StateError> {
        let mut conn = self.conn().await?;
        conn.zcard(self.key(key))
            .await
            .map_err(|e| StateError::Backend(e.to_string()))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StateError> {
        let mut conn = self.conn().await?;
        let _: bool = conn
            .expire(self.key(key), ttl.as_secs().max(1) as i64)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn list_push_capped(&self, key: &str, value: &str, cap: usize) -> Result<(), StateError> {
        let mut conn = self.conn().await?;
        let rkey = self.key(key);
        let _: i64 = conn
            .rpush(&rkey, value)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;
        let _: () = conn
            .ltrim(&rkey, -(cap as isize), -1)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn list_all(&self, key: &str) -> Result<Vec<String>, StateError> {
        let mut conn = self.conn().await?;
        conn.lrange(self.key(key), 0, -1)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))
    }
}
