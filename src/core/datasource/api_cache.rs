/// API Client Cache
///
/// Memoizes API clients per (datasource, connection options). Entries are
/// permanent: there is no eviction, TTL or size bound, and a failed
/// construction never leaves an entry behind.
///
/// Two creation policies are supported:
/// - single-flight: concurrent callers for the same key wait on one
///   construction, so the loader runs at most once per successful key
/// - racy: each caller that misses runs the loader; the last store wins and
///   earlier clients are dropped
use crate::core::datasource::{ConnectionOptions, DatasourceId};
use crate::core::error::LoaderResult;
use crate::core::{DsError, Result};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Cache key derived from a datasource identity and its connection options.
///
/// Equality is by value: equal option maps always produce equal keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApiKey {
    pub id: DatasourceId,
    pub options: ConnectionOptions,
}

impl ApiKey {
    pub fn new(id: DatasourceId, options: &ConnectionOptions) -> Self {
        ApiKey {
            id,
            options: options.clone(),
        }
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.id, self.options)
    }
}

// An empty slot means a construction is in flight (single-flight only).
type Slot<A> = Arc<OnceCell<Arc<A>>>;

/// Concurrent map from `ApiKey` to a shared API client.
pub struct ApiCache<A: ?Sized> {
    entries: DashMap<ApiKey, Slot<A>>,
    single_flight: bool,
}

impl<A: ?Sized + Send + Sync> ApiCache<A> {
    pub fn new(single_flight: bool) -> Self {
        ApiCache {
            entries: DashMap::new(),
            single_flight,
        }
    }

    pub fn is_single_flight(&self) -> bool {
        self.single_flight
    }

    /// Returns the cached client for `key`, if one has been constructed.
    /// Never waits on an in-flight construction.
    pub fn lookup(&self, key: &ApiKey) -> Option<Arc<A>> {
        self.entries.get(key).and_then(|slot| slot.get().cloned())
    }

    /// Returns the cached client for `key`, or builds one with `loader` and
    /// caches it.
    ///
    /// # Errors
    ///
    /// `DsError::ApiConstruction` wrapping the loader's error. Nothing is
    /// cached in that case, so a later call retries.
    pub fn get_or_create<F>(&self, key: &ApiKey, loader: F) -> Result<Arc<A>>
    where
        F: FnOnce() -> LoaderResult<Arc<A>>,
    {
        if let Some(api) = self.lookup(key) {
            debug!(key = %key, "API cache hit");
            return Ok(api);
        }

        debug!(key = %key, "API cache miss");
        if self.single_flight {
            self.create_single_flight(key, loader)
        } else {
            self.create_racy(key, loader)
        }
    }

    fn create_racy<F>(&self, key: &ApiKey, loader: F) -> Result<Arc<A>>
    where
        F: FnOnce() -> LoaderResult<Arc<A>>,
    {
        let api = loader().map_err(|e| {
            warn!(key = %key, error = %e, "API client construction failed");
            DsError::ApiConstruction(e)
        })?;

        let slot = OnceCell::with_value(Arc::clone(&api));
        if self.entries.insert(key.clone(), Arc::new(slot)).is_some() {
            debug!(key = %key, "replaced concurrently created API client");
        }
        info!(key = %key, "created API client");
        Ok(api)
    }

    fn create_single_flight<F>(&self, key: &ApiKey, loader: F) -> Result<Arc<A>>
    where
        F: FnOnce() -> LoaderResult<Arc<A>>,
    {
        // The shard guard is dropped at the end of this statement.
        let slot: Slot<A> = Arc::clone(&self.entries.entry(key.clone()).or_default());

        let mut constructed = false;
        let result = slot.get_or_try_init(|| {
            constructed = true;
            loader()
        });

        match result {
            Ok(api) => {
                if constructed {
                    info!(key = %key, "created API client");
                } else {
                    debug!(key = %key, "joined concurrent API client construction");
                }
                Ok(Arc::clone(api))
            }
            Err(e) => {
                warn!(key = %key, error = %e, "API client construction failed");
                // A waiter holding its own reference may already be retrying
                // in this slot; only the map's reference and ours may remain.
                self.entries.remove_if(key, |_, current| {
                    Arc::ptr_eq(current, &slot) && current.get().is_none() && Arc::strong_count(current) == 2
                });
                Err(DsError::ApiConstruction(e))
            }
        }
    }

    /// Number of constructed clients
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|entry| entry.value().get().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<A: ?Sized> fmt::Debug for ApiCache<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCache")
            .field("entries", &self.entries.len())
            .field("single_flight", &self.single_flight)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[derive(Debug)]
    struct FakeApi {
        serial: usize,
    }

    fn key(id: i64, database: &str) -> ApiKey {
        ApiKey::new(DatasourceId(id), &ConnectionOptions::new().with("database", database))
    }

    fn both_policies() -> [ApiCache<FakeApi>; 2] {
        [ApiCache::new(true), ApiCache::new(false)]
    }

    #[test]
    fn test_key_equality_by_value() {
        let a = ApiKey::new(
            DatasourceId(1),
            &ConnectionOptions::new().with("database", "x").with("catalog", "y"),
        );
        let b = ApiKey::new(
            DatasourceId(1),
            &ConnectionOptions::new().with("catalog", "y").with("database", "x"),
        );
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "1-{catalog=y,database=x}");
        assert_ne!(a, key(2, "x"));
    }

    #[test]
    fn test_lookup_empty() {
        for cache in both_policies() {
            assert!(cache.lookup(&key(1, "a")).is_none());
            assert!(cache.is_empty());
        }
    }

    #[test]
    fn test_get_or_create_caches() {
        for cache in both_policies() {
            let calls = AtomicUsize::new(0);
            let load = || {
                let serial = calls.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(FakeApi { serial }))
            };

            let first = cache.get_or_create(&key(1, "a"), load).unwrap();
            let second = cache.get_or_create(&key(1, "a"), load).unwrap();
            assert!(Arc::ptr_eq(&first, &second));
            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert_eq!(first.serial, 0);

            let lookup = cache.lookup(&key(1, "a")).unwrap();
            assert!(Arc::ptr_eq(&first, &lookup));
            assert_eq!(cache.len(), 1);
        }
    }

    #[test]
    fn test_distinct_keys_get_distinct_clients() {
        for cache in both_policies() {
            let calls = AtomicUsize::new(0);
            let load = || {
                let serial = calls.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(FakeApi { serial }))
            };

            let a = cache.get_or_create(&key(1, "a"), load).unwrap();
            let b = cache.get_or_create(&key(1, "b"), load).unwrap();
            let c = cache.get_or_create(&key(2, "a"), load).unwrap();
            assert!(!Arc::ptr_eq(&a, &b));
            assert!(!Arc::ptr_eq(&a, &c));
            assert_eq!(calls.load(Ordering::SeqCst), 3);
            assert_eq!(cache.len(), 3);
        }
    }

    #[test]
    fn test_failure_is_not_cached() {
        for cache in both_policies() {
            let err = cache
                .get_or_create(&key(1, "a"), || Err("token expired".into()))
                .unwrap_err();
            assert!(matches!(err, DsError::ApiConstruction(_)));
            assert_eq!(err.to_string(), "failed to create client: token expired");
            assert!(cache.lookup(&key(1, "a")).is_none());
            assert!(cache.is_empty());

            let api = cache
                .get_or_create(&key(1, "a"), || Ok(Arc::new(FakeApi { serial: 9 })))
                .unwrap();
            assert_eq!(api.serial, 9);
            assert_eq!(cache.len(), 1);
        }
    }

    #[test]
    fn test_single_flight_constructs_once() {
        let cache = Arc::new(ApiCache::<FakeApi>::new(true));
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get_or_create(&key(1, "shared"), || {
                            let serial = calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(20));
                            Ok(Arc::new(FakeApi { serial }))
                        })
                        .unwrap()
                })
            })
            .collect();

        let clients: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(clients.iter().all(|c| Arc::ptr_eq(c, &clients[0])));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_waiter_success_after_failure_is_cached() {
        let cache = Arc::new(ApiCache::<FakeApi>::new(true));
        let calls = Arc::new(AtomicUsize::new(0));

        let failing = {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            thread::spawn(move || {
                cache.get_or_create(&key(1, "shared"), || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(100));
                    Err("connection reset".into())
                })
            })
        };

        // Arrives while the first construction is still running and waits on it.
        thread::sleep(Duration::from_millis(20));
        let waiting = {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            thread::spawn(move || {
                cache.get_or_create(&key(1, "shared"), || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(200));
                    Ok(Arc::new(FakeApi { serial: 7 }))
                })
            })
        };

        assert!(failing.join().unwrap().is_err());
        let api = waiting.join().unwrap().unwrap();
        assert_eq!(api.serial, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let cached = cache.lookup(&key(1, "shared")).unwrap();
        assert!(Arc::ptr_eq(&api, &cached));
        assert_eq!(cache.len(), 1);

        let again = cache
            .get_or_create(&key(1, "shared"), || Ok(Arc::new(FakeApi { serial: 8 })))
            .unwrap();
        assert!(Arc::ptr_eq(&api, &again));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_racy_policy_never_corrupts() {
        let cache = Arc::new(ApiCache::<FakeApi>::new(false));
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get_or_create(&key(1, "shared"), || {
                            let serial = calls.fetch_add(1, Ordering::SeqCst);
                            Ok(Arc::new(FakeApi { serial }))
                        })
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        let built = calls.load(Ordering::SeqCst);
        assert!(built >= 1 && built <= 8);
        assert_eq!(cache.len(), 1);
        let cached = cache.lookup(&key(1, "shared")).unwrap();
        assert!(cached.serial < built);
    }
}
