//! LRU cache with TTL and a byte budget
//!
//! A mapping from string keys to cloneable values with:
//! - LRU ordering maintained on both hits and inserts
//! - entry-count and optional byte budgets, evicting from the tail
//! - default and per-entry TTL, expired entries removed lazily
//! - single-flight loader coalescing for concurrent `get_or_set`
//! - pattern invalidation, prefetch, warm-up
//! - a background expiration sweep with an explicit shutdown handle

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;

use crate::error::Result;
use crate::events::{EventBus, MemoryEvent};

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entry-count budget
    pub max_size: usize,
    /// Optional byte budget, measured by the sizer
    pub max_memory: Option<usize>,
    /// Default TTL; `None` means entries never expire
    pub ttl: Option<Duration>,
    /// Interval of the background expiration sweep
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            max_memory: None,
            ttl: None,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Cache statistics snapshot
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub memory_usage: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

struct LruNode<T> {
    value: T,
    size_bytes: usize,
    expires_at: Option<Instant>,
    prev: Option<String>,
    next: Option<String>,
}

struct CacheState<T> {
    entries: HashMap<String, LruNode<T>>,
    head: Option<String>,
    tail: Option<String>,
    bytes_used: usize,
}

impl<T> CacheState<T> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            head: None,
            tail: None,
            bytes_used: 0,
        }
    }

    fn move_to_front(&mut self, key: &str) {
        if self.head.as_deref() == Some(key) {
            return;
        }
        if let Some(node) = self.entries.get(key) {
            let prev = node.prev.clone();
            let next = node.next.clone();
            if let Some(ref prev_key) = prev {
                if let Some(prev_node) = self.entries.get_mut(prev_key) {
                    prev_node.next = next.clone();
                }
            }
            if let Some(ref next_key) = next {
                if let Some(next_node) = self.entries.get_mut(next_key) {
                    next_node.prev = prev.clone();
                }
            }
            if self.tail.as_deref() == Some(key) {
                self.tail = prev;
            }
        }
        if let Some(node) = self.entries.get_mut(key) {
            node.prev = None;
            node.next = self.head.clone();
        }
        if let Some(ref old_head) = self.head {
            if let Some(head_node) = self.entries.get_mut(old_head) {
                head_node.prev = Some(key.to_string());
            }
        }
        self.head = Some(key.to_string());
        if self.tail.is_none() {
            self.tail = self.head.clone();
        }
    }

    fn unlink(&mut self, key: &str) -> Option<LruNode<T>> {
        let node = self.entries.remove(key)?;
        if let Some(ref prev_key) = node.prev {
            if let Some(prev_node) = self.entries.get_mut(prev_key) {
                prev_node.next = node.next.clone();
            }
        }
        if let Some(ref next_key) = node.next {
            if let Some(next_node) = self.entries.get_mut(next_key) {
                next_node.prev = node.prev.clone();
            }
        }
        if self.head.as_deref() == Some(key) {
            self.head = node.next.clone();
        }
        if self.tail.as_deref() == Some(key) {
            self.tail = node.prev.clone();
        }
        self.bytes_used -= node.size_bytes;
        Some(node)
    }

    fn insert_front(&mut self, key: String, node: LruNode<T>) {
        self.bytes_used += node.size_bytes;
        let old_head = self.head.clone();
        let mut node = node;
        node.prev = None;
        node.next = old_head.clone();
        if let Some(ref old_head_key) = old_head {
            if let Some(head_node) = self.entries.get_mut(old_head_key) {
                head_node.prev = Some(key.clone());
            }
        }
        self.entries.insert(key.clone(), node);
        self.head = Some(key);
        if self.tail.is_none() {
            self.tail = self.head.clone();
        }
    }

    fn evict_tail(&mut self) -> Option<String> {
        let tail_key = self.tail.clone()?;
        self.unlink(&tail_key)?;
        Some(tail_key)
    }

    fn over_budget(&self, max_size: usize, max_memory: Option<usize>) -> bool {
        if self.entries.len() > max_size {
            return true;
        }
        match max_memory {
            Some(budget) => self.bytes_used > budget,
            None => false,
        }
    }
}

type Sizer<T> = Box<dyn Fn(&T) -> usize + Send + Sync>;

/// Single-tier LRU/TTL cache
pub struct LruCache<T> {
    config: CacheConfig,
    state: Mutex<CacheState<T>>,
    sizer: Sizer<T>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    bus: Option<EventBus>,
    inflight: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    sweeper: Mutex<Option<tokio::task::JoinHandle<()>>>,
    stop: Arc<Notify>,
}

impl<T> LruCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a cache sized by JSON-encoded length
    pub fn new(config: CacheConfig) -> Self
    where
        T: Serialize,
    {
        Self::with_sizer(
            config,
            Box::new(|value: &T| {
                serde_json::to_string(value)
                    .map(|s| s.len())
                    .unwrap_or(std::mem::size_of::<T>())
            }),
        )
    }

    /// Create a cache with a caller-supplied sizer
    pub fn with_sizer(config: CacheConfig, sizer: Sizer<T>) -> Self {
        Self {
            config,
            state: Mutex::new(CacheState::new()),
            sizer,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            bus: None,
            inflight: DashMap::new(),
            sweeper: Mutex::new(None),
            stop: Arc::new(Notify::new()),
        }
    }

    /// Attach an event bus for cache transition events
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    fn publish(&self, event: MemoryEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(event);
        }
    }

    fn expired(node_expiry: Option<Instant>) -> bool {
        node_expiry.map(|at| Instant::now() >= at).unwrap_or(false)
    }

    /// Get a value; an expired entry counts as a miss and is removed
    pub fn get(&self, key: &str) -> Option<T> {
        let mut state = self.state.lock();
        let expired = state.entries.get(key).map(|n| Self::expired(n.expires_at));
        match expired {
            Some(false) => {
                state.move_to_front(key);
                let value = state.entries.get(key).map(|n| n.value.clone());
                drop(state);
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.publish(MemoryEvent::CacheHit { key: key.to_string() });
                value
            }
            Some(true) => {
                state.unlink(key);
                drop(state);
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.publish(MemoryEvent::CacheMiss { key: key.to_string() });
                None
            }
            None => {
                drop(state);
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.publish(MemoryEvent::CacheMiss { key: key.to_string() });
                None
            }
        }
    }

    /// Insert or replace; replacement is not an eviction
    pub fn set(&self, key: &str, value: T, ttl: Option<Duration>) {
        self.set_inner(key, value, ttl, true);
        self.publish(MemoryEvent::CacheSet { key: key.to_string() });
    }

    fn set_inner(&self, key: &str, value: T, ttl: Option<Duration>, count_evictions: bool) {
        let size_bytes = (self.sizer)(&value);
        if let Some(budget) = self.config.max_memory {
            // An entry bigger than the whole budget can never fit.
            if size_bytes > budget {
                return;
            }
        }
        let expires_at = ttl.or(self.config.ttl).map(|d| Instant::now() + d);

        let evicted: Vec<String> = {
            let mut state = self.state.lock();
            state.unlink(key);
            state.insert_front(
                key.to_string(),
                LruNode {
                    value,
                    size_bytes,
                    expires_at,
                    prev: None,
                    next: None,
                },
            );
            let mut evicted = Vec::new();
            while state.over_budget(self.config.max_size, self.config.max_memory) {
                match state.evict_tail() {
                    Some(victim) => evicted.push(victim),
                    None => break,
                }
            }
            evicted
        };

        for victim in evicted {
            if count_evictions {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                self.publish(MemoryEvent::CacheEvict { key: victim });
            }
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        let removed = self.state.lock().unlink(key).is_some();
        if removed {
            self.publish(MemoryEvent::CacheDelete { key: key.to_string() });
        }
        removed
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        *state = CacheState::new();
    }

    /// Presence check that respects TTL without touching LRU order or stats
    pub fn has(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        let expired = state.entries.get(key).map(|n| Self::expired(n.expires_at));
        match expired {
            Some(false) => true,
            Some(true) => {
                state.unlink(key);
                false
            }
            None => false,
        }
    }

    /// Return the cached value or load it, invoking `loader` exactly once
    /// for concurrent callers of the same absent key.
    pub async fn get_or_set<F, Fut>(&self, key: &str, loader: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let gate = self
            .inflight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let guard = gate.lock().await;

        // A concurrent leader may have filled the cache while we waited.
        if let Some(value) = self.get(key) {
            drop(guard);
            return Ok(value);
        }

        let result = loader().await;
        if let Ok(ref value) = result {
            self.set(key, value.clone(), None);
        }
        drop(guard);
        self.inflight.remove(key);
        result
    }

    /// Load only the missing subset of `keys` through `batch_loader` and
    /// cache each returned pair. Returns how many pairs were cached.
    pub async fn prefetch<F, Fut>(&self, keys: &[String], batch_loader: F) -> Result<usize>
    where
        F: FnOnce(Vec<String>) -> Fut,
        Fut: std::future::Future<Output = Result<Vec<(String, T)>>>,
    {
        let missing: Vec<String> = keys.iter().filter(|k| !self.has(k)).cloned().collect();
        if missing.is_empty() {
            return Ok(0);
        }
        let loaded = batch_loader(missing).await?;
        let count = loaded.len();
        for (key, value) in loaded {
            self.set(&key, value, None);
        }
        Ok(count)
    }

    /// Bulk insert; evictions forced by an oversized seed are not counted
    pub fn warm_up(&self, seed: Vec<(String, T)>) {
        for (key, value) in seed {
            self.set_inner(&key, value, None, false);
        }
    }

    /// Invalidate keys matching `pattern`.
    ///
    /// A plain string matches as a substring; a pattern containing regex
    /// metacharacters that compiles is applied as a regular expression.
    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        let regex = if pattern.bytes().any(|b| br".*+?^$[](){}|\".contains(&b)) {
            regex::Regex::new(pattern).ok()
        } else {
            None
        };
        let matches = |key: &str| match &regex {
            Some(re) => re.is_match(key),
            None => key.contains(pattern),
        };

        let victims: Vec<String> = {
            let state = self.state.lock();
            state
                .entries
                .keys()
                .filter(|k| matches(k))
                .cloned()
                .collect()
        };
        let mut removed = 0;
        for key in victims {
            if self.delete(&key) {
                removed += 1;
            }
        }
        removed
    }

    /// Remove entries past their TTL
    pub fn remove_expired(&self) -> usize {
        let victims: Vec<String> = {
            let state = self.state.lock();
            state
                .entries
                .iter()
                .filter(|(_, node)| Self::expired(node.expires_at))
                .map(|(key, _)| key.clone())
                .collect()
        };
        let mut removed = 0;
        for key in &victims {
            if self.state.lock().unlink(key).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Spawn the periodic expiration sweep. Idempotent per cache; the task
    /// stops when `shutdown` is called.
    pub fn start_cleanup(cache: &Arc<Self>) {
        let mut sweeper = cache.sweeper.lock();
        if sweeper.is_some() {
            return;
        }
        let stop = cache.stop.clone();
        let interval = cache.config.cleanup_interval;
        let cache = Arc::clone(cache);
        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = cache.remove_expired();
                        if removed > 0 {
                            tracing::trace!(removed, "cache sweep removed expired entries");
                        }
                    }
                    _ = stop.notified() => break,
                }
            }
        }));
    }

    /// Stop the cleanup task and drop all cached state
    pub async fn shutdown(&self) {
        self.stop.notify_one();
        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.clear();
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_stats(&self) -> CacheStats {
        let state = self.state.lock();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            size: state.entries.len(),
            memory_usage: state.bytes_used,
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn small_cache(max_size: usize) -> LruCache<String> {
        LruCache::new(CacheConfig {
            max_size,
            ..Default::default()
        })
    }

    #[test]
    fn basic_get_set() {
        let cache = small_cache(10);
        cache.set("a", "1".to_string(), None);
        assert_eq!(cache.get("a"), Some("1".to_string()));
        assert_eq!(cache.get("b"), None);

        let stats = cache.get_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
    }

    #[test]
    fn lru_eviction_at_capacity() {
        let cache = small_cache(3);
        cache.set("k1", "v1".to_string(), None);
        cache.set("k2", "v2".to_string(), None);
        cache.set("k3", "v3".to_string(), None);

        // Touch k1 so k2 becomes the LRU tail.
        assert!(cache.get("k1").is_some());
        cache.set("k4", "v4".to_string(), None);

        assert!(cache.get("k2").is_none());
        assert!(cache.get("k1").is_some());
        assert!(cache.get("k3").is_some());
        assert!(cache.get("k4").is_some());
        assert_eq!(cache.get_stats().evictions, 1);
    }

    #[test]
    fn replace_is_not_eviction() {
        let cache = small_cache(2);
        cache.set("a", "1".to_string(), None);
        cache.set("a", "2".to_string(), None);
        assert_eq!(cache.get("a"), Some("2".to_string()));
        assert_eq!(cache.get_stats().evictions, 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn ttl_expiry_is_absence() {
        let cache = small_cache(10);
        cache.set("gone", "x".to_string(), Some(Duration::from_millis(0)));
        std::thread::sleep(Duration::from_millis(5));
        assert!(!cache.has("gone"));
        assert_eq!(cache.get("gone"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn per_entry_ttl_overrides_default() {
        let cache: LruCache<String> = LruCache::new(CacheConfig {
            max_size: 10,
            ttl: Some(Duration::from_millis(1)),
            ..Default::default()
        });
        cache.set("long", "x".to_string(), Some(Duration::from_secs(60)));
        std::thread::sleep(Duration::from_millis(10));
        assert!(cache.has("long"));
    }

    #[test]
    fn byte_budget_evicts() {
        let cache: LruCache<String> = LruCache::with_sizer(
            CacheConfig {
                max_size: 100,
                max_memory: Some(10),
                ..Default::default()
            },
            Box::new(|v: &String| v.len()),
        );
        cache.set("a", "12345".to_string(), None);
        cache.set("b", "12345".to_string(), None);
        cache.set("c", "123".to_string(), None);
        // a must have been evicted to fit c.
        assert!(!cache.has("a"));
        assert!(cache.has("b"));
        assert!(cache.has("c"));
        assert!(cache.get_stats().memory_usage <= 10);
    }

    #[test]
    fn oversized_entry_is_not_cached() {
        let cache: LruCache<String> = LruCache::with_sizer(
            CacheConfig {
                max_size: 100,
                max_memory: Some(4),
                ..Default::default()
            },
            Box::new(|v: &String| v.len()),
        );
        cache.set("big", "too large".to_string(), None);
        assert!(!cache.has("big"));
        assert_eq!(cache.get_stats().evictions, 0);
    }

    #[test]
    fn invalidate_substring() {
        let cache = small_cache(10);
        cache.set("user:1", "a".to_string(), None);
        cache.set("user:2", "b".to_string(), None);
        cache.set("post:1", "c".to_string(), None);
        assert_eq!(cache.invalidate_pattern("user:"), 2);
        assert!(cache.has("post:1"));
    }

    #[test]
    fn invalidate_regex() {
        let cache = small_cache(10);
        cache.set("entry-1", "a".to_string(), None);
        cache.set("entry-2", "b".to_string(), None);
        cache.set("other", "c".to_string(), None);
        assert_eq!(cache.invalidate_pattern(r"^entry-\d$"), 2);
        assert!(cache.has("other"));
    }

    #[test]
    fn warm_up_skips_eviction_counter() {
        let cache = small_cache(2);
        cache.warm_up(vec![
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
            ("c".to_string(), "3".to_string()),
        ]);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_stats().evictions, 0);
    }

    #[test]
    fn hit_rate_zero_when_untouched() {
        let cache = small_cache(2);
        assert_eq!(cache.get_stats().hit_rate, 0.0);
    }

    #[tokio::test]
    async fn get_or_set_loads_once() {
        let cache = Arc::new(small_cache(10));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            tasks.push(tokio::spawn(async move {
                cache
                    .get_or_set("shared", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok("value".to_string())
                    })
                    .await
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), "value");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn prefetch_loads_only_missing() {
        let cache = Arc::new(small_cache(10));
        cache.set("a", "cached".to_string(), None);

        let requested = Arc::new(Mutex::new(Vec::new()));
        let requested2 = requested.clone();
        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let loaded = cache
            .prefetch(&keys, move |missing| {
                requested2.lock().extend(missing.iter().cloned());
                async move {
                    Ok(missing
                        .into_iter()
                        .map(|k| (k.clone(), format!("loaded:{}", k)))
                        .collect())
                }
            })
            .await
            .unwrap();

        assert_eq!(loaded, 2);
        assert_eq!(*requested.lock(), vec!["b".to_string(), "c".to_string()]);
        assert_eq!(cache.get("a"), Some("cached".to_string()));
        assert_eq!(cache.get("b"), Some("loaded:b".to_string()));
    }

    #[tokio::test]
    async fn sweeper_shutdown() {
        let cache = Arc::new(LruCache::<String>::new(CacheConfig {
            max_size: 10,
            ttl: Some(Duration::from_millis(1)),
            cleanup_interval: Duration::from_millis(5),
            ..Default::default()
        }));
        LruCache::start_cleanup(&cache);
        cache.set("a", "x".to_string(), None);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.len(), 0);
        cache.shutdown().await;
        assert!(cache.is_empty());
    }

    #[test]
    fn eviction_emits_event() {
        let bus = EventBus::new();
        let evictions = Arc::new(AtomicUsize::new(0));
        let evictions2 = evictions.clone();
        bus.subscribe(move |event| {
            if event.name() == "cache_evict" {
                evictions2.fetch_add(1, Ordering::Relaxed);
            }
        });
        let cache: LruCache<String> = LruCache::new(CacheConfig {
            max_size: 1,
            ..Default::default()
        })
        .with_events(bus);
        cache.set("a", "1".to_string(), None);
        cache.set("b", "2".to_string(), None);
        assert_eq!(evictions.load(Ordering::Relaxed), 1);
    }
}
