//! In-memory credential validation cache
//!
//! Validation outcomes are cached with separate TTLs for positive and
//! negative results. Admin mutations (approve, deactivate, revoke)
//! must invalidate the cache so stale entries never outlive a
//! revocation beyond the configured TTL.

use mailroom_core::SenderCredentials;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Authenticated caller context produced by a successful validation
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub key_id: i32,
    pub tenant: String,
    pub sender: Option<SenderCredentials>,
    pub is_approved: bool,
}

/// A cached validation outcome
#[derive(Debug, Clone)]
pub enum CachedAuth {
    Valid(AuthContext),
    Invalid,
}

struct CacheEntry {
    outcome: CachedAuth,
    expires_at: Instant,
}

pub struct AuthCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    /// tenant -> cache keys holding a positive entry for that tenant
    tenant_index: RwLock<HashMap<String, Vec<String>>>,
    positive_ttl: Duration,
    negative_ttl: Duration,
}

impl AuthCache {
    pub fn new(positive_ttl: Duration, negative_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            tenant_index: RwLock::new(HashMap::new()),
            positive_ttl,
            negative_ttl,
        }
    }

    /// Look up a cached outcome, evicting it when expired
    pub async fn get(&self, api_key: &str) -> Option<CachedAuth> {
        {
            let entries = self.entries.read().await;
            match entries.get(api_key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some(entry.outcome.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }

        // Entry exists but has expired
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(api_key) {
            if entry.expires_at <= Instant::now() {
                entries.remove(api_key);
            } else {
                return Some(entry.outcome.clone());
            }
        }
        None
    }

    pub async fn insert_valid(&self, api_key: &str, context: AuthContext) {
        let tenant = context.tenant.clone();

        let mut entries = self.entries.write().await;
        entries.insert(
            api_key.to_owned(),
            CacheEntry {
                outcome: CachedAuth::Valid(context),
                expires_at: Instant::now() + self.positive_ttl,
            },
        );
        drop(entries);

        let mut index = self.tenant_index.write().await;
        let keys = index.entry(tenant).or_default();
        if !keys.iter().any(|k| k == api_key) {
            keys.push(api_key.to_owned());
        }
    }

    pub async fn insert_invalid(&self, api_key: &str) {
        let mut entries = self.entries.write().await;
        entries.insert(
            api_key.to_owned(),
            CacheEntry {
                outcome: CachedAuth::Invalid,
                expires_at: Instant::now() + self.negative_ttl,
            },
        );
    }

    /// Drop every cached outcome
    pub async fn invalidate_all(&self) {
        let mut entries = self.entries.write().await;
        entries.clear();
        drop(entries);

        let mut index = self.tenant_index.write().await;
        index.clear();
    }

    /// Drop positive entries for a single tenant
    pub async fn invalidate_tenant(&self, tenant: &str) {
        let keys = {
            let mut index = self.tenant_index.write().await;
            index.remove(tenant).unwrap_or_default()
        };

        let mut entries = self.entries.write().await;
        for key in keys {
            entries.remove(&key);
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(key_id: i32, tenant: &str) -> AuthContext {
        AuthContext {
            key_id,
            tenant: tenant.to_string(),
            sender: None,
            is_approved: true,
        }
    }

    #[tokio::test]
    async fn test_positive_entry_round_trip() {
        let cache = AuthCache::new(Duration::from_secs(60), Duration::from_secs(30));

        cache.insert_valid("mk_key1", context(1, "acme")).await;

        match cache.get("mk_key1").await {
            Some(CachedAuth::Valid(ctx)) => {
                assert_eq!(ctx.key_id, 1);
                assert_eq!(ctx.tenant, "acme");
            }
            other => panic!("Expected valid entry, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_negative_entry_round_trip() {
        let cache = AuthCache::new(Duration::from_secs(60), Duration::from_secs(30));

        cache.insert_invalid("mk_bogus").await;

        assert!(matches!(
            cache.get("mk_bogus").await,
            Some(CachedAuth::Invalid)
        ));
    }

    #[tokio::test]
    async fn test_miss_returns_none() {
        let cache = AuthCache::new(Duration::from_secs(60), Duration::from_secs(30));
        assert!(cache.get("mk_never_seen").await.is_none());
    }

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let cache = AuthCache::new(Duration::from_millis(30), Duration::from_millis(30));

        cache.insert_valid("mk_key1", context(1, "acme")).await;
        cache.insert_invalid("mk_bogus").await;

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(cache.get("mk_key1").await.is_none());
        assert!(cache.get("mk_bogus").await.is_none());
    }

    #[tokio::test]
    async fn test_negative_ttl_shorter_than_positive() {
        let cache = AuthCache::new(Duration::from_secs(60), Duration::from_millis(30));

        cache.insert_valid("mk_key1", context(1, "acme")).await;
        cache.insert_invalid("mk_bogus").await;

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(cache.get("mk_key1").await.is_some());
        assert!(cache.get("mk_bogus").await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_all() {
        let cache = AuthCache::new(Duration::from_secs(60), Duration::from_secs(30));

        cache.insert_valid("mk_key1", context(1, "acme")).await;
        cache.insert_invalid("mk_bogus").await;

        cache.invalidate_all().await;

        assert!(cache.is_empty().await);
        assert!(cache.get("mk_key1").await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_tenant_is_scoped() {
        let cache = AuthCache::new(Duration::from_secs(60), Duration::from_secs(30));

        cache.insert_valid("mk_key1", context(1, "acme")).await;
        cache.insert_valid("mk_key2", context(2, "globex")).await;

        cache.invalidate_tenant("acme").await;

        assert!(cache.get("mk_key1").await.is_none());
        assert!(cache.get("mk_key2").await.is_some());
    }
}
