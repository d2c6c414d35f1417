//! Caching delegate (C1, §4.1): a keyed, TTL-partitioned key-value store
//! with read-and-evict (`take_once`) and read-keep (`peek`) modes.
//!
//! Two implementations are provided, mirroring the teacher's own
//! dual in-memory/external-store provider pattern (`examples/issuer/provider`):
//! [`RedisCache`] for deployment and [`MemoryCache`] for tests and local
//! development.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Logical cache partitions named in §3/§4.1. Each has its own TTL drawn
/// from [`crate::config::TtlConfig`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CachePartition {
    /// `IdentityData`, `UnverifiedSessionId` keyed by `nonce`; `ClientState`,
    /// `CodeVerifier` keyed by `state` during the verification flow.
    VerificationRequest,
    /// `VerifiedSessionRecord`, keyed by `origin_jti`.
    VerifiedSession,
    /// `CredentialPayload`, `TraineeId`, `ClientState`, `CodeVerifier` keyed
    /// by `state` during the issuance flow.
    CredentialMetadata,
    /// `PublicKey`, keyed by certificate thumbprint (`kid`). Read-keep only.
    JwksKeys,
}

impl CachePartition {
    const fn prefix(self) -> &'static str {
        match self {
            Self::VerificationRequest => "verify-req",
            Self::VerifiedSession => "verified-session",
            Self::CredentialMetadata => "cred-meta",
            Self::JwksKeys => "jwks-keys",
        }
    }
}

/// A keyed, TTL-partitioned key-value store.
///
/// Implementors must make `take_once` atomic: once a key is read via
/// `take_once`, no subsequent read (by any caller) observes it again.
pub trait Cache: Send + Sync {
    /// Store `value` under `key` in `partition`, replacing any existing
    /// entry and resetting its TTL.
    fn put_with_ttl<T: Serialize + Send + Sync>(
        &self, partition: CachePartition, key: &str, value: &T, ttl: Duration,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Atomically read and remove the entry at `key` in `partition`. A
    /// second call for the same key, concurrent or not, observes `None`.
    fn take_once<T: DeserializeOwned + Send>(
        &self, partition: CachePartition, key: &str,
    ) -> impl Future<Output = Result<Option<T>>> + Send;

    /// Read the entry at `key` in `partition` without removing it.
    fn peek<T: DeserializeOwned + Send>(
        &self, partition: CachePartition, key: &str,
    ) -> impl Future<Output = Result<Option<T>>> + Send;

    /// Remove the entry at `key` in `partition`, if present, without
    /// returning it. Used to flush the JWKS cache on key rotation.
    fn evict(&self, partition: CachePartition, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Remove every entry in `partition`. Used for the SIGHUP-driven wholesale
    /// JWKS flush (§9), where the rotated-out `kid` is not known in advance.
    fn evict_all(&self, partition: CachePartition) -> impl Future<Output = Result<()>> + Send;
}

fn full_key(key_prefix: &str, partition: CachePartition, key: &str) -> String {
    if key_prefix.is_empty() {
        format!("{}:{key}", partition.prefix())
    } else {
        format!("{key_prefix}:{}:{key}", partition.prefix())
    }
}

/// Redis-backed [`Cache`], used in deployment. Wraps a
/// [`redis::aio::ConnectionManager`] so reconnects are handled transparently.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisCache {
    /// Connect to Redis at `url`, prefixing every key with `key_prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial connection cannot be established.
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| Error::Internal(e.into()))?;
        let conn =
            ConnectionManager::new(client).await.map_err(|e| Error::Internal(e.into()))?;
        Ok(Self { conn, key_prefix: key_prefix.into() })
    }
}

impl Cache for RedisCache {
    async fn put_with_ttl<T: Serialize + Send + Sync>(
        &self, partition: CachePartition, key: &str, value: &T, ttl: Duration,
    ) -> Result<()> {
        let full = full_key(&self.key_prefix, partition, key);
        let json = serde_json::to_string(value).map_err(|e| Error::Internal(e.into()))?;
        let mut conn = self.conn.clone();
        let ttl_secs = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(&full, json, ttl_secs)
            .await
            .map_err(|e| Error::Internal(e.into()))?;
        Ok(())
    }

    async fn take_once<T: DeserializeOwned + Send>(
        &self, partition: CachePartition, key: &str,
    ) -> Result<Option<T>> {
        let full = full_key(&self.key_prefix, partition, key);
        let mut conn = self.conn.clone();
        // GETDEL is atomic: the read and the removal are one round trip, so
        // a racing second call never observes the value we just took.
        let raw: Option<String> =
            redis::cmd("GETDEL").arg(&full).query_async(&mut conn).await.map_err(|e| Error::Internal(e.into()))?;
        decode_optional(raw)
    }

    async fn peek<T: DeserializeOwned + Send>(
        &self, partition: CachePartition, key: &str,
    ) -> Result<Option<T>> {
        let full = full_key(&self.key_prefix, partition, key);
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(&full).await.map_err(|e| Error::Internal(e.into()))?;
        decode_optional(raw)
    }

    async fn evict(&self, partition: CachePartition, key: &str) -> Result<()> {
        let full = full_key(&self.key_prefix, partition, key);
        let mut conn = self.conn.clone();
        let _: () = conn.del(&full).await.map_err(|e| Error::Internal(e.into()))?;
        Ok(())
    }

    async fn evict_all(&self, partition: CachePartition) -> Result<()> {
        let pattern = format!("{}*", full_key(&self.key_prefix, partition, ""));
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn.keys(&pattern).await.map_err(|e| Error::Internal(e.into()))?;
        if !keys.is_empty() {
            let _: () = conn.del(keys).await.map_err(|e| Error::Internal(e.into()))?;
        }
        Ok(())
    }
}

fn decode_optional<T: DeserializeOwned>(raw: Option<String>) -> Result<Option<T>> {
    match raw {
        None => Ok(None),
        Some(s) => serde_json::from_str(&s).map(Some).map_err(|e| Error::Internal(e.into())),
    }
}

/// In-process [`Cache`], used for tests and local development. Stores
/// pre-serialised JSON so its behaviour (including serde round-trip errors)
/// matches [`RedisCache`] exactly.
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<DashMap<String, String>>,
}

impl MemoryCache {
    /// An empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Cache for MemoryCache {
    async fn put_with_ttl<T: Serialize + Send + Sync>(
        &self, partition: CachePartition, key: &str, value: &T, _ttl: Duration,
    ) -> Result<()> {
        let full = full_key("", partition, key);
        let json = serde_json::to_string(value).map_err(|e| Error::Internal(e.into()))?;
        self.entries.insert(full, json);
        Ok(())
    }

    async fn take_once<T: DeserializeOwned + Send>(
        &self, partition: CachePartition, key: &str,
    ) -> Result<Option<T>> {
        let full = full_key("", partition, key);
        let raw = self.entries.remove(&full).map(|(_, v)| v);
        decode_optional(raw)
    }

    async fn peek<T: DeserializeOwned + Send>(
        &self, partition: CachePartition, key: &str,
    ) -> Result<Option<T>> {
        let full = full_key("", partition, key);
        let raw = self.entries.get(&full).map(|entry| entry.value().clone());
        decode_optional(raw)
    }

    async fn evict(&self, partition: CachePartition, key: &str) -> Result<()> {
        let full = full_key("", partition, key);
        self.entries.remove(&full);
        Ok(())
    }

    async fn evict_all(&self, partition: CachePartition) -> Result<()> {
        let prefix = full_key("", partition, "");
        self.entries.retain(|k, _| !k.starts_with(&prefix));
        Ok(())
    }
}

/// Runtime choice of [`Cache`] backend, selected once at startup from
/// [`crate::config::Config`]. Lets [`crate::http::state::AppState`] hold a
/// single concrete, `Clone` type regardless of backend.
#[derive(Clone)]
pub enum AnyCache {
    /// Deployment backend.
    Redis(RedisCache),
    /// Test/local-development backend.
    Memory(MemoryCache),
}

impl Cache for AnyCache {
    async fn put_with_ttl<T: Serialize + Send + Sync>(
        &self, partition: CachePartition, key: &str, value: &T, ttl: Duration,
    ) -> Result<()> {
        match self {
            Self::Redis(c) => c.put_with_ttl(partition, key, value, ttl).await,
            Self::Memory(c) => c.put_with_ttl(partition, key, value, ttl).await,
        }
    }

    async fn take_once<T: DeserializeOwned + Send>(
        &self, partition: CachePartition, key: &str,
    ) -> Result<Option<T>> {
        match self {
            Self::Redis(c) => c.take_once(partition, key).await,
            Self::Memory(c) => c.take_once(partition, key).await,
        }
    }

    async fn peek<T: DeserializeOwned + Send>(&self, partition: CachePartition, key: &str) -> Result<Option<T>> {
        match self {
            Self::Redis(c) => c.peek(partition, key).await,
            Self::Memory(c) => c.peek(partition, key).await,
        }
    }

    async fn evict(&self, partition: CachePartition, key: &str) -> Result<()> {
        match self {
            Self::Redis(c) => c.evict(partition, key).await,
            Self::Memory(c) => c.evict(partition, key).await,
        }
    }

    async fn evict_all(&self, partition: CachePartition) -> Result<()> {
        match self {
            Self::Redis(c) => c.evict_all(partition).await,
            Self::Memory(c) => c.evict_all(partition).await,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn take_once_is_single_use() {
        let cache = MemoryCache::new();
        cache
            .put_with_ttl(CachePartition::VerificationRequest, "nonce-1", &"payload".to_string(), Duration::from_secs(60))
            .await
            .expect("should put");

        let first: Option<String> =
            cache.take_once(CachePartition::VerificationRequest, "nonce-1").await.expect("should read");
        assert_eq!(first, Some("payload".to_string()));

        let second: Option<String> =
            cache.take_once(CachePartition::VerificationRequest, "nonce-1").await.expect("should read");
        assert_eq!(second, None);
    }

    #[tokio::test]
    async fn peek_does_not_evict() {
        let cache = MemoryCache::new();
        cache
            .put_with_ttl(CachePartition::VerifiedSession, "jti-1", &"identity-1".to_string(), Duration::from_secs(60))
            .await
            .expect("should put");

        for _ in 0..3 {
            let seen: Option<String> =
                cache.peek(CachePartition::VerifiedSession, "jti-1").await.expect("should read");
            assert_eq!(seen, Some("identity-1".to_string()));
        }
    }

    #[tokio::test]
    async fn missing_key_is_absent_not_error() {
        let cache = MemoryCache::new();
        let seen: Option<String> =
            cache.peek(CachePartition::JwksKeys, "unknown-kid").await.expect("absent is not an error");
        assert_eq!(seen, None);
    }

    #[tokio::test]
    async fn evict_all_clears_only_the_target_partition() {
        let cache = MemoryCache::new();
        cache
            .put_with_ttl(CachePartition::JwksKeys, "kid-1", &"key-1".to_string(), Duration::from_secs(60))
            .await
            .expect("should put");
        cache
            .put_with_ttl(CachePartition::JwksKeys, "kid-2", &"key-2".to_string(), Duration::from_secs(60))
            .await
            .expect("should put");
        cache
            .put_with_ttl(CachePartition::VerifiedSession, "jti-1", &"identity-1".to_string(), Duration::from_secs(60))
            .await
            .expect("should put");

        cache.evict_all(CachePartition::JwksKeys).await.expect("should evict");

        let kid: Option<String> = cache.peek(CachePartition::JwksKeys, "kid-1").await.expect("should read");
        assert_eq!(kid, None);
        let session: Option<String> =
            cache.peek(CachePartition::VerifiedSession, "jti-1").await.expect("should read");
        assert_eq!(session, Some("identity-1".to_string()));
    }

    #[tokio::test]
    async fn put_replaces_existing_value() {
        let cache = MemoryCache::new();
        cache
            .put_with_ttl(CachePartition::CredentialMetadata, "state-1", &"first".to_string(), Duration::from_secs(60))
            .await
            .expect("should put");
        cache
            .put_with_ttl(CachePartition::CredentialMetadata, "state-1", &"second".to_string(), Duration::from_secs(60))
            .await
            .expect("should overwrite");

        let seen: Option<String> =
            cache.take_once(CachePartition::CredentialMetadata, "state-1").await.expect("should read");
        assert_eq!(seen, Some("second".to_string()));
    }
}
