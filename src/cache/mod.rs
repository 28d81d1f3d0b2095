//! Two-tier result cache.
//!
//! The durable tier is consulted first when configured; the in-process tier
//! is always written and serves as the fallback. Durable-tier failures never
//! reach the caller: they are logged, counted and published as
//! [`CacheEvent::Degraded`].

mod durable;
mod fingerprint;
mod memory;
mod schema;
mod sqlite_store;

pub use durable::{DurableInfo, DurableStore};
pub use fingerprint::{canonical_json, fingerprint};
pub use memory::LocalStore;
pub use sqlite_store::SqliteDurableStore;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::server::metrics;

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    /// A durable-tier operation failed and the cache fell back to local only.
    Degraded {
        operation: &'static str,
        error: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub local_entries: usize,
    pub durable_errors: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub durable: Option<DurableInfo>,
}

pub struct ResultCache {
    local: LocalStore,
    durable: Option<Arc<dyn DurableStore>>,
    default_ttl: Duration,
    events: broadcast::Sender<CacheEvent>,
    hits: AtomicU64,
    misses: AtomicU64,
    durable_errors: AtomicU64,
}

impl ResultCache {
    pub fn new(default_ttl: Duration) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            local: LocalStore::new(),
            durable: None,
            default_ttl,
            events,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            durable_errors: AtomicU64::new(0),
        }
    }

    pub fn with_durable(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.durable = Some(store);
        self
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Subscribes to degradation events.
    pub fn events(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    fn degraded(&self, operation: &'static str, error: anyhow::Error) {
        warn!("Durable cache {} failed, using local tier: {:#}", operation, error);
        self.durable_errors.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_degraded(operation);
        // No receivers is fine
        let _ = self.events.send(CacheEvent::Degraded {
            operation,
            error: format!("{:#}", error),
        });
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        if let Some(durable) = &self.durable {
            match durable.get(key).await {
                Ok(Some(value)) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    metrics::record_cache_lookup("durable", "hit");
                    return Some(value);
                }
                Ok(None) => {}
                Err(e) => self.degraded("get", e),
            }
        }

        match self.local.get(key) {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_lookup("local", "hit");
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_lookup("local", "miss");
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: Value, ttl: Duration) {
        if let Some(durable) = &self.durable {
            if let Err(e) = durable.set(key, &value, ttl).await {
                self.degraded("set", e);
            }
        }
        self.local.set(key, value, ttl);
    }

    pub async fn delete(&self, key: &str) {
        if let Some(durable) = &self.durable {
            if let Err(e) = durable.delete(key).await {
                self.degraded("delete", e);
            }
        }
        self.local.delete(key);
    }

    pub async fn clear(&self) {
        if let Some(durable) = &self.durable {
            if let Err(e) = durable.flush().await {
                self.degraded("flush", e);
            }
        }
        self.local.clear();
    }

    pub async fn stats(&self) -> CacheStats {
        let durable = match &self.durable {
            Some(store) => match store.info().await {
                Ok(info) => Some(info),
                Err(e) => {
                    self.degraded("info", e);
                    None
                }
            },
            None => None,
        };

        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            local_entries: self.local.len(),
            durable_errors: self.durable_errors.load(Ordering::Relaxed),
            durable,
        }
    }

    /// Drops expired in-process entries.
    pub fn sweep(&self) -> usize {
        self.local.sweep()
    }

    /// Periodically sweeps the in-process tier until the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let removed = cache.sweep();
                if removed > 0 {
                    debug!("Cache sweep removed {} expired entries", removed);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    struct FailingStore;

    #[async_trait]
    impl DurableStore for FailingStore {
        async fn get(&self, _key: &str) -> anyhow::Result<Option<Value>> {
            bail!("connection refused")
        }
        async fn set(&self, _key: &str, _value: &Value, _ttl: Duration) -> anyhow::Result<()> {
            bail!("connection refused")
        }
        async fn delete(&self, _key: &str) -> anyhow::Result<()> {
            bail!("connection refused")
        }
        async fn flush(&self) -> anyhow::Result<()> {
            bail!("connection refused")
        }
        async fn info(&self) -> anyhow::Result<DurableInfo> {
            bail!("connection refused")
        }
    }

    #[derive(Default)]
    struct MapStore {
        values: Mutex<HashMap<String, Value>>,
    }

    #[async_trait]
    impl DurableStore for MapStore {
        async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
            Ok(self.values.lock().await.get(key).cloned())
        }
        async fn set(&self, key: &str, value: &Value, _ttl: Duration) -> anyhow::Result<()> {
            self.values.lock().await.insert(key.to_string(), value.clone());
            Ok(())
        }
        async fn delete(&self, key: &str) -> anyhow::Result<()> {
            self.values.lock().await.remove(key);
            Ok(())
        }
        async fn flush(&self) -> anyhow::Result<()> {
            self.values.lock().await.clear();
            Ok(())
        }
        async fn info(&self) -> anyhow::Result<DurableInfo> {
            Ok(DurableInfo {
                backend: "map".to_string(),
                entries: self.values.lock().await.len() as u64,
                schema_version: 1,
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_trip_then_expiry() {
        let cache = ResultCache::new(DEFAULT_TTL);
        let value = json!({"comments": []});

        cache.set("k", value.clone(), Duration::from_secs(10)).await;
        assert_eq!(cache.get("k").await, Some(value));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get("k").await, None);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.local_entries, 0);
    }

    #[tokio::test]
    async fn test_durable_failure_degrades_to_local() {
        let cache = ResultCache::new(DEFAULT_TTL).with_durable(Arc::new(FailingStore));
        let mut events = cache.events();

        cache.set("k", json!("v"), Duration::from_secs(60)).await;
        assert_eq!(cache.get("k").await, Some(json!("v")));

        match events.recv().await.unwrap() {
            CacheEvent::Degraded { operation, error } => {
                assert_eq!(operation, "set");
                assert!(error.contains("connection refused"));
            }
        }
        assert!(matches!(
            events.recv().await.unwrap(),
            CacheEvent::Degraded { operation: "get", .. }
        ));

        let stats = cache.stats().await;
        // set, get, info
        assert_eq!(stats.durable_errors, 3);
        assert!(stats.durable.is_none());
    }

    #[tokio::test]
    async fn test_durable_tier_is_read_first() {
        let store = Arc::new(MapStore::default());
        store
            .set("k", &json!("from durable"), Duration::from_secs(60))
            .await
            .unwrap();

        let cache = ResultCache::new(DEFAULT_TTL).with_durable(store.clone());
        assert_eq!(cache.get("k").await, Some(json!("from durable")));

        cache.set("other", json!(1), Duration::from_secs(60)).await;
        assert_eq!(store.get("other").await.unwrap(), Some(json!(1)));

        cache.clear().await;
        assert_eq!(store.info().await.unwrap().entries, 0);
        assert_eq!(cache.get("other").await, None);
    }

    #[tokio::test]
    async fn test_delete_removes_from_both_tiers() {
        let store = Arc::new(MapStore::default());
        let cache = ResultCache::new(DEFAULT_TTL).with_durable(store.clone());

        cache.set("k", json!(1), Duration::from_secs(60)).await;
        cache.delete("k").await;

        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_removes_expired_entries() {
        let cache = Arc::new(ResultCache::new(DEFAULT_TTL));
        cache.set("short", json!(1), Duration::from_secs(1)).await;
        cache.set("long", json!(2), Duration::from_secs(600)).await;

        let handle = cache.spawn_sweeper(Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(cache.stats().await.local_entries, 1);
        handle.abort();
    }
}
