use std::sync::Arc;
use std::time::Duration;

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use warden_audit::RecordStore;
use warden_core::{ApiKeyRecord, Environment, ErrorCode, GatewayError};
use warden_crypto::Keyring;

const CACHE_TTL: Duration = Duration::from_secs(300);

/// Resolved caller identity, handed to the rest of the pipeline.
#[derive(Debug, Clone)]
pub struct Identity {
    pub app_id: warden_core::AppId,
    pub environment: Environment,
    pub upstream_key: SecretString,
    pub key_prefix: String,
}

/// Maps a presented gateway key to an [`Identity`] (§4.1). The salted hash
/// is looked up through a short-TTL cache in front of the record store, so
/// a hot key does not round-trip to the RDBMS on every request.
pub struct CredentialResolver {
    store: Arc<dyn RecordStore>,
    keyring: Arc<Keyring>,
    cache: moka::future::Cache<String, Arc<ApiKeyRecord>>,
    hmac_key: Vec<u8>,
}

impl CredentialResolver {
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>, keyring: Arc<Keyring>, hmac_key: Vec<u8>) -> Self {
        let cache = moka::future::Cache::builder()
            .time_to_live(CACHE_TTL)
            .build();
        Self {
            store,
            keyring,
            cache,
            hmac_key,
        }
    }

    /// Salt-and-hash a presented key using HMAC-SHA256 so the stored value
    /// never reveals the plaintext, even under a dictionary attack on a
    /// leaked database.
    #[must_use]
    pub fn hash_key(&self, presented: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.hmac_key).expect("hmac accepts any key length");
        mac.update(presented.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Invalidate a cached lookup, e.g. on key revocation.
    pub async fn invalidate(&self, key_hash: &str) {
        self.cache.invalidate(key_hash).await;
    }

    /// Resolve a presented key plus the caller's declared environment to an
    /// [`Identity`]. Environment mismatch is checked here rather than left
    /// to a later pipeline step because it is part of the credential's own
    /// invariant (§3 API Key: "environment is immutable").
    pub async fn resolve(
        &self,
        presented_key: &str,
        declared_environment: Environment,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Identity, GatewayError> {
        if presented_key.is_empty() {
            return Err(GatewayError::new(ErrorCode::AuthMissingKey, "missing X-API-Key header"));
        }

        let key_hash = self.hash_key(presented_key);
        let record = self.lookup(&key_hash).await?;

        if !record.active {
            return Err(GatewayError::new(ErrorCode::AuthInvalidKey, "key is inactive"));
        }
        if let Some(expires_at) = record.expires_at
            && now >= expires_at
        {
            return Err(GatewayError::new(ErrorCode::AuthInvalidKey, "key has expired"));
        }
        if record.environment != declared_environment {
            return Err(GatewayError::new(
                ErrorCode::AuthEnvMismatch,
                format!(
                    "key is bound to {} but request declared {}",
                    record.environment, declared_environment
                ),
            ));
        }

        let upstream_key = self
            .keyring
            .decrypt(&record.encrypted_upstream_key)
            .map_err(|err| GatewayError::new(ErrorCode::Internal, format!("upstream key decryption failed: {err}")))?;

        Ok(Identity {
            app_id: record.app_id.clone(),
            environment: record.environment,
            upstream_key,
            key_prefix: record.key_prefix.clone(),
        })
    }

    /// Override the stored upstream key with one presented for this single
    /// request via `Authorization: Bearer <upstream_key>` (§6).
    #[must_use]
    pub fn with_overridden_upstream_key(identity: Identity, overridden: SecretString) -> Identity {
        Identity {
            upstream_key: overridden,
            ..identity
        }
    }

    async fn lookup(&self, key_hash: &str) -> Result<Arc<ApiKeyRecord>, GatewayError> {
        if let Some(cached) = self.cache.get(key_hash).await {
            return Ok(cached);
        }
        let record = self
            .store
            .get_api_key_by_hash(key_hash)
            .await
            .map_err(|err| GatewayError::new(ErrorCode::Internal, err.to_string()))?
            .ok_or_else(|| GatewayError::new(ErrorCode::AuthInvalidKey, "unknown API key"))?;
        let record = Arc::new(record);
        self.cache.insert(key_hash.to_owned(), record.clone()).await;
        Ok(record)
    }

    /// Constant-time comparison helper exposed for callers that need to
    /// compare a presented key against a known value directly (e.g. in
    /// tests), matching the algorithm's constant-time requirement (§4.1).
    #[must_use]
    pub fn constant_time_eq(a: &str, b: &str) -> bool {
        a.as_bytes().ct_eq(b.as_bytes()).into()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use warden_audit_memory::InMemoryRecordStore;
    use warden_core::AppId;
    use warden_crypto::{Keyring, parse_master_key};

    use super::*;

    fn keyring() -> Arc<Keyring> {
        let key = parse_master_key(&"ab".repeat(32)).unwrap();
        Arc::new(Keyring::new("k1", key))
    }

    fn resolver(store: Arc<InMemoryRecordStore>) -> CredentialResolver {
        CredentialResolver::new(store, keyring(), b"test-hmac-key".to_vec())
    }

    #[tokio::test]
    async fn resolves_known_active_key() {
        let store = Arc::new(InMemoryRecordStore::new());
        let resolver = resolver(store.clone());
        let hash = resolver.hash_key("gw_ok");
        let encrypted = resolver.keyring.encrypt("sk-upstream").unwrap();
        store.seed_api_key(ApiKeyRecord {
            key_hash: hash,
            key_prefix: "gw_ok".to_owned(),
            app_id: AppId::from("acme"),
            environment: Environment::Production,
            encrypted_upstream_key: encrypted,
            active: true,
            expires_at: None,
        });

        let identity = resolver
            .resolve("gw_ok", Environment::Production, Utc::now())
            .await
            .unwrap();
        assert_eq!(identity.app_id, AppId::from("acme"));
        assert_eq!(identity.upstream_key.expose_secret(), "sk-upstream");
    }

    #[tokio::test]
    async fn unknown_key_is_rejected() {
        let store = Arc::new(InMemoryRecordStore::new());
        let resolver = resolver(store);
        let err = resolver
            .resolve("gw_missing", Environment::Production, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::AuthInvalidKey);
    }

    #[tokio::test]
    async fn environment_mismatch_is_rejected() {
        let store = Arc::new(InMemoryRecordStore::new());
        let resolver = resolver(store.clone());
        let hash = resolver.hash_key("gw_ok");
        store.seed_api_key(ApiKeyRecord {
            key_hash: hash,
            key_prefix: "gw_ok".to_owned(),
            app_id: AppId::from("acme"),
            environment: Environment::Staging,
            encrypted_upstream_key: resolver.keyring.encrypt("sk-upstream").unwrap(),
            active: true,
            expires_at: None,
        });

        let err = resolver
            .resolve("gw_ok", Environment::Production, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::AuthEnvMismatch);
    }

    #[tokio::test]
    async fn expired_key_is_rejected() {
        let store = Arc::new(InMemoryRecordStore::new());
        let resolver = resolver(store.clone());
        let hash = resolver.hash_key("gw_exp");
        let now = Utc::now();
        store.seed_api_key(ApiKeyRecord {
            key_hash: hash,
            key_prefix: "gw_exp".to_owned(),
            app_id: AppId::from("acme"),
            environment: Environment::Production,
            encrypted_upstream_key: resolver.keyring.encrypt("sk-upstream").unwrap(),
            active: true,
            expires_at: Some(now - chrono::Duration::seconds(1)),
        });

        let err = resolver
            .resolve("gw_exp", Environment::Production, now)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::AuthInvalidKey);
    }

    #[test]
    fn constant_time_eq_matches_and_mismatches() {
        assert!(CredentialResolver::constant_time_eq("abc", "abc"));
        assert!(!CredentialResolver::constant_time_eq("abc", "abd"));
    }
}
