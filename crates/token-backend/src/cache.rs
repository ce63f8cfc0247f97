//! Per-issuer remote key cache
//!
//! Maps an issuer URL to the signing keys published for it. Entries are
//! added on first use and never evicted for the lifetime of the cache.
//!
//! Each issuer owns a [`OnceCell`], so concurrent first lookups for the same
//! issuer await a single fetch, while lookups for issuers that are already
//! cached only take a shard read lock. A failed fetch drops the issuer's
//! empty cell and a later lookup fetches again.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::Result;
use crate::jwks::SigningKeyEntry;

/// Shared, immutable key set for one issuer
pub type KeySet = Arc<[SigningKeyEntry]>;

/// Issuer -> signing keys
#[derive(Debug, Default)]
pub struct RemoteKeyCache {
    entries: DashMap<String, Arc<OnceCell<KeySet>>>,
}

impl RemoteKeyCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached keys for `issuer`, if they were fetched already
    pub fn get(&self, issuer: &str) -> Option<KeySet> {
        self.entries
            .get(issuer)
            .and_then(|cell| cell.get().cloned())
    }

    /// Whether keys for `issuer` are cached
    pub fn contains(&self, issuer: &str) -> bool {
        self.get(issuer).is_some()
    }

    /// Seed the cache with keys obtained elsewhere
    ///
    /// Keys already cached for `issuer` are kept; the cache never replaces
    /// an entry.
    pub fn insert(&self, issuer: impl Into<String>, keys: Vec<SigningKeyEntry>) -> KeySet {
        let cell = self.cell(issuer.into());
        let keys: KeySet = Arc::from(keys);
        match cell.set(Arc::clone(&keys)) {
            Ok(()) => keys,
            Err(_) => cell.get().cloned().unwrap_or(keys),
        }
    }

    /// Cached keys for `issuer`, fetching them with `fetch` on a miss
    ///
    /// At most one `fetch` runs per issuer at a time; concurrent callers
    /// wait for it and share the result.
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `fetch`. Nothing is cached in that case.
    pub async fn get_or_fetch<F, Fut>(&self, issuer: &str, fetch: F) -> Result<KeySet>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<SigningKeyEntry>>>,
    {
        if let Some(keys) = self.get(issuer) {
            debug!(issuer = issuer, key_count = keys.len(), "Using cached remote keys");
            return Ok(keys);
        }

        let cell = self.cell(issuer.to_string());
        let result = cell
            .get_or_try_init(|| async { fetch().await.map(Arc::from) })
            .await
            .cloned();

        if result.is_err() {
            // Issuers come from unverified tokens; failed ones must not pile up.
            self.entries.remove_if(issuer, |_, cell| !cell.initialized());
        }

        result
    }

    /// Issuers whose keys are cached
    pub fn issuers(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| entry.value().initialized())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of issuers with cached keys
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    /// Whether no issuer has cached keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The cell for `issuer`, created on demand. The shard lock is released
    /// before the caller awaits on the cell.
    fn cell(&self, issuer: String) -> Arc<OnceCell<KeySet>> {
        Arc::clone(self.entries.entry(issuer).or_default().value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TokenBackendError;
    use jsonwebtoken::DecodingKey;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn entry(kid: &str) -> SigningKeyEntry {
        SigningKeyEntry::new(kid, DecodingKey::from_secret(kid.as_bytes()))
    }

    #[tokio::test]
    async fn test_fetches_once_per_issuer() {
        let cache = RemoteKeyCache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let keys = cache
                .get_or_fetch("https://issuer.example", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![entry("k1")])
                })
                .await
                .unwrap();
            assert_eq!(keys.len(), 1);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.contains("https://issuer.example"));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_cached() {
        let cache = RemoteKeyCache::new();

        let err = cache
            .get_or_fetch("https://issuer.example", || async {
                Err(TokenBackendError::RemoteFetchError("down".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TokenBackendError::RemoteFetchError(_)));
        assert!(cache.is_empty());
        assert!(cache.issuers().is_empty());

        let keys = cache
            .get_or_fetch("https://issuer.example", || async { Ok(vec![entry("k1")]) })
            .await
            .unwrap();
        assert_eq!(keys[0].key_id(), "k1");
    }

    #[tokio::test]
    async fn test_failed_fetches_leave_no_entries() {
        let cache = RemoteKeyCache::new();

        for i in 0..100 {
            let issuer = format!("https://issuer-{i}.example");
            assert!(
                cache
                    .get_or_fetch(&issuer, || async {
                        Err(TokenBackendError::RemoteFetchError("down".into()))
                    })
                    .await
                    .is_err()
            );
        }

        assert_eq!(cache.entries.len(), 0);

        cache
            .get_or_fetch("https://issuer-0.example", || async { Ok(vec![entry("k1")]) })
            .await
            .unwrap();
        assert_eq!(cache.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_first_lookups_share_one_fetch() {
        let cache = Arc::new(RemoteKeyCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .get_or_fetch("https://issuer.example", || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok(vec![entry("k1")])
                        })
                        .await
                        .map(|keys| keys.len())
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 1);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_insert_never_replaces() {
        let cache = RemoteKeyCache::new();
        cache.insert("https://issuer.example", vec![entry("first")]);
        let keys = cache.insert("https://issuer.example", vec![entry("second")]);

        assert_eq!(keys[0].key_id(), "first");
        assert_eq!(cache.get("https://issuer.example").unwrap()[0].key_id(), "first");
    }

    #[test]
    fn test_issuers_lists_cached_entries() {
        let cache = RemoteKeyCache::new();
        cache.insert("https://a.example", vec![entry("k")]);
        cache.insert("https://b.example", vec![entry("k")]);

        let mut issuers = cache.issuers();
        issuers.sort();
        assert_eq!(issuers, vec!["https://a.example", "https://b.example"]);
    }
}
