//! Two-tier cache
//!
//! Wraps a single-tier L1 in front of a pair of collaborator callbacks:
//! a `loader` that resolves misses (typically storage) and a `writer` that
//! receives write-throughs. Deletes and clears affect L1 only; statistics
//! reflect L1.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::Result;
use crate::events::{EventBus, MemoryEvent};

use super::lru::{CacheStats, LruCache};

type Loader<T> = Box<dyn Fn(String) -> BoxFuture<'static, Result<Option<T>>> + Send + Sync>;
type Writer<T> = Box<dyn Fn(String, T) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// L1 cache with load-through and write-through collaborators
pub struct TieredCache<T> {
    l1: Arc<LruCache<T>>,
    loader: Loader<T>,
    writer: Writer<T>,
    bus: Option<EventBus>,
}

impl<T> TieredCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(l1: Arc<LruCache<T>>, loader: Loader<T>, writer: Writer<T>) -> Self {
        Self {
            l1,
            loader,
            writer,
            bus: None,
        }
    }

    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    fn publish(&self, event: MemoryEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(event);
        }
    }

    /// L1 first; on miss consult the loader and promote a hit into L1
    pub async fn get(&self, key: &str) -> Result<Option<T>> {
        if let Some(value) = self.l1.get(key) {
            self.publish(MemoryEvent::L1Hit { key: key.to_string() });
            return Ok(Some(value));
        }
        match (self.loader)(key.to_string()).await? {
            Some(value) => {
                self.l1.set(key, value.clone(), None);
                self.publish(MemoryEvent::L2Hit { key: key.to_string() });
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Write through: store in L1 and hand the value to the writer
    pub async fn set(&self, key: &str, value: T) -> Result<()> {
        self.l1.set(key, value.clone(), None);
        (self.writer)(key.to_string(), value).await?;
        self.publish(MemoryEvent::L2Write { key: key.to_string() });
        Ok(())
    }

    /// Remove from L1 only
    pub fn delete(&self, key: &str) -> bool {
        self.l1.delete(key)
    }

    /// Clear L1 only
    pub fn clear(&self) {
        self.l1.clear()
    }

    pub fn get_stats(&self) -> CacheStats {
        self.l1.get_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::lru::CacheConfig;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn backing() -> Arc<Mutex<HashMap<String, String>>> {
        Arc::new(Mutex::new(HashMap::new()))
    }

    fn tiered(
        store: Arc<Mutex<HashMap<String, String>>>,
        loads: Arc<AtomicUsize>,
    ) -> TieredCache<String> {
        let l1 = Arc::new(LruCache::new(CacheConfig::default()));
        let read_store = store.clone();
        let loader: Loader<String> = Box::new(move |key| {
            let store = read_store.clone();
            let loads = loads.clone();
            Box::pin(async move {
                loads.fetch_add(1, Ordering::Relaxed);
                Ok(store.lock().get(&key).cloned())
            })
        });
        let writer: Writer<String> = Box::new(move |key, value| {
            let store = store.clone();
            Box::pin(async move {
                store.lock().insert(key, value);
                Ok(())
            })
        });
        TieredCache::new(l1, loader, writer)
    }

    #[tokio::test]
    async fn l2_hit_promotes() {
        let store = backing();
        store.lock().insert("k".to_string(), "v".to_string());
        let loads = Arc::new(AtomicUsize::new(0));
        let cache = tiered(store, loads.clone());

        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));
        assert_eq!(loads.load(Ordering::Relaxed), 1);

        // Promoted; the second read must not touch the loader.
        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));
        assert_eq!(loads.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn set_writes_through() {
        let store = backing();
        let cache = tiered(store.clone(), Arc::new(AtomicUsize::new(0)));

        cache.set("k", "v".to_string()).await.unwrap();
        assert_eq!(store.lock().get("k"), Some(&"v".to_string()));
    }

    #[tokio::test]
    async fn delete_affects_l1_only() {
        let store = backing();
        let loads = Arc::new(AtomicUsize::new(0));
        let cache = tiered(store.clone(), loads.clone());

        cache.set("k", "v".to_string()).await.unwrap();
        assert!(cache.delete("k"));

        // Still resolvable through the loader.
        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));
        assert_eq!(loads.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn miss_everywhere_is_none() {
        let cache = tiered(backing(), Arc::new(AtomicUsize::new(0)));
        assert_eq!(cache.get("absent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn events_fire_per_tier() {
        let bus = EventBus::new();
        let names = Arc::new(Mutex::new(Vec::new()));
        let names2 = names.clone();
        bus.subscribe(move |event| names2.lock().push(event.name().to_string()));

        let store = backing();
        store.lock().insert("k".to_string(), "v".to_string());
        let cache = tiered(store, Arc::new(AtomicUsize::new(0))).with_events(bus);

        cache.get("k").await.unwrap();
        cache.get("k").await.unwrap();
        cache.set("w", "x".to_string()).await.unwrap();

        let seen = names.lock().clone();
        assert!(seen.contains(&"l2_hit".to_string()));
        assert!(seen.contains(&"l1_hit".to_string()));
        assert!(seen.contains(&"l2_write".to_string()));
    }
}
