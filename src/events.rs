//! Typed event fan-out
//!
//! A small publish/subscribe surface: components publish strongly typed
//! `MemoryEvent` values onto a shared bus, subscribers register boxed
//! callbacks. Delivery is synchronous and in-process.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

/// Events emitted by the storage engine, cache, and vector index
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MemoryEvent {
    EntryStored { id: String, namespace: String },
    EntryUpdated { id: String, version: i64 },
    EntryDeleted { id: String },
    BulkInserted { count: usize },
    BulkDeleted { count: usize },
    NamespaceCleared { namespace: String, count: usize },
    CacheHit { key: String },
    CacheMiss { key: String },
    CacheSet { key: String },
    CacheDelete { key: String },
    CacheEvict { key: String },
    L1Hit { key: String },
    L2Hit { key: String },
    L2Write { key: String },
    PointAdded { id: String },
    PointRemoved { id: String },
    IndexRebuilt { count: usize, elapsed_ms: u64 },
    SessionStarted { session_id: String },
    SessionEnded { session_id: String },
}

impl MemoryEvent {
    /// Event name, matching the wire tag
    pub fn name(&self) -> &'static str {
        match self {
            MemoryEvent::EntryStored { .. } => "entry_stored",
            MemoryEvent::EntryUpdated { .. } => "entry_updated",
            MemoryEvent::EntryDeleted { .. } => "entry_deleted",
            MemoryEvent::BulkInserted { .. } => "bulk_inserted",
            MemoryEvent::BulkDeleted { .. } => "bulk_deleted",
            MemoryEvent::NamespaceCleared { .. } => "namespace_cleared",
            MemoryEvent::CacheHit { .. } => "cache_hit",
            MemoryEvent::CacheMiss { .. } => "cache_miss",
            MemoryEvent::CacheSet { .. } => "cache_set",
            MemoryEvent::CacheDelete { .. } => "cache_delete",
            MemoryEvent::CacheEvict { .. } => "cache_evict",
            MemoryEvent::L1Hit { .. } => "l1_hit",
            MemoryEvent::L2Hit { .. } => "l2_hit",
            MemoryEvent::L2Write { .. } => "l2_write",
            MemoryEvent::PointAdded { .. } => "point_added",
            MemoryEvent::PointRemoved { .. } => "point_removed",
            MemoryEvent::IndexRebuilt { .. } => "index_rebuilt",
            MemoryEvent::SessionStarted { .. } => "session_started",
            MemoryEvent::SessionEnded { .. } => "session_ended",
        }
    }
}

type Subscriber = Arc<dyn Fn(&MemoryEvent) + Send + Sync>;

/// In-process event bus
///
/// Cloning is cheap; clones share the subscriber list.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for every published event
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&MemoryEvent) + Send + Sync + 'static,
    {
        self.subscribers.write().push(Arc::new(callback));
    }

    /// Deliver an event to all subscribers, in registration order
    pub fn publish(&self, event: MemoryEvent) {
        let subscribers = self.subscribers.read();
        for subscriber in subscribers.iter() {
            subscriber(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
