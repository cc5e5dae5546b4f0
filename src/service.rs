//! Facade service
//!
//! Single entry point owning the storage engine, the hot-entry cache, and
//! the vector index. Threads the current session through writes, forwards
//! component events on one bus, and shuts the stack down in order
//! (cache sweep → index → storage).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use crate::cache::{CacheStats, LruCache};
use crate::config::MemoryConfig;
use crate::error::{MnemoError, Result};
use crate::events::{EventBus, MemoryEvent};
use crate::index::{HnswIndex, IndexStats};
use crate::storage::StorageEngine;
use crate::types::*;

/// Aggregate statistics across all components
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStats {
    pub store: StoreStats,
    pub cache: CacheStats,
    pub index: IndexStats,
}

/// Optional collaborator that turns content into an embedding vector.
/// Returning `None` means "no embedding"; the entry is stored without one
/// and stays out of the vector index.
pub trait EmbeddingProvider: Send + Sync {
    fn embed<'a>(&'a self, content: &'a str) -> BoxFuture<'a, Option<Vec<f32>>>;
}

/// The facade. One instance per project directory.
pub struct MemoryService {
    config: MemoryConfig,
    bus: EventBus,
    storage: Arc<StorageEngine>,
    cache: Arc<LruCache<Entry>>,
    index: Arc<HnswIndex>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    current_session: Mutex<Option<Session>>,
    checkpoint_seq: AtomicU64,
}

fn id_cache_key(id: &str) -> String {
    format!("id:{}", id)
}

fn pair_cache_key(namespace: &str, key: &str) -> String {
    format!("key:{}:{}", namespace, key)
}

impl MemoryService {
    pub fn new(config: MemoryConfig) -> Self {
        let bus = EventBus::new();
        let index = Arc::new(HnswIndex::new(config.index.clone()).with_events(bus.clone()));
        let cache = Arc::new(
            LruCache::<Entry>::new((&config.cache).into()).with_events(bus.clone()),
        );
        let storage = Arc::new(StorageEngine::new(
            config.clone(),
            index.clone(),
            bus.clone(),
        ));
        Self {
            config,
            bus,
            storage,
            cache,
            index,
            embedder: None,
            current_session: Mutex::new(None),
            checkpoint_seq: AtomicU64::new(0),
        }
    }

    /// Attach an embedding generator; entries stored without an explicit
    /// embedding are run through it.
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Open storage and start background maintenance. Idempotent.
    pub async fn initialize(&self) -> Result<()> {
        self.storage.initialize()?;
        LruCache::start_cleanup(&self.cache);
        Ok(())
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }

    pub fn index(&self) -> &Arc<HnswIndex> {
        &self.index
    }

    fn cache_put(&self, entry: &Entry) {
        self.cache.set(&id_cache_key(&entry.id), entry.clone(), None);
        self.cache
            .set(&pair_cache_key(&entry.namespace, &entry.key), entry.clone(), None);
    }

    /// Build and persist a new entry from caller input. The current
    /// session id, when one is active, is threaded into the metadata;
    /// a missing embedding is requested from the attached generator.
    pub async fn store_entry(&self, input: EntryInput) -> Result<Entry> {
        let now = now_millis();
        let mut metadata = input.metadata;
        if let Some(session) = self.current_session.lock().as_ref() {
            metadata
                .entry("sessionId".to_string())
                .or_insert_with(|| serde_json::Value::String(session.session_id.clone()));
        }

        let mut embedding = input.embedding;
        if embedding.is_none() {
            if let Some(embedder) = &self.embedder {
                embedding = embedder.embed(&input.content).await;
            }
        }

        let entry = Entry {
            id: Uuid::new_v4().to_string(),
            key: input.key,
            content: input.content,
            entry_type: input.entry_type,
            namespace: input.namespace.unwrap_or_else(|| "default".to_string()),
            tags: input.tags,
            metadata,
            embedding,
            access_level: input.access_level.unwrap_or_else(|| "private".to_string()),
            created_at: now,
            updated_at: now,
            last_accessed_at: now,
            version: 1,
            access_count: 0,
            references: input.references,
        };

        let stored = self.storage.store(entry)?;
        self.cache_put(&stored);
        Ok(stored)
    }

    /// Cached read by id. A cache hit skips the access-count bump; cached
    /// copies are weak by design.
    pub async fn get(&self, id: &str) -> Result<Option<Entry>> {
        if let Some(entry) = self.cache.get(&id_cache_key(id)) {
            return Ok(Some(entry));
        }
        let entry = self.storage.get(id)?;
        if let Some(ref entry) = entry {
            self.cache_put(entry);
        }
        Ok(entry)
    }

    /// Cached read by the unique (namespace, key) pair
    pub async fn get_by_key(&self, namespace: &str, key: &str) -> Result<Option<Entry>> {
        if let Some(entry) = self.cache.get(&pair_cache_key(namespace, key)) {
            return Ok(Some(entry));
        }
        let entry = self.storage.get_by_key(namespace, key)?;
        if let Some(ref entry) = entry {
            self.cache_put(entry);
        }
        Ok(entry)
    }

    pub async fn update(&self, id: &str, patch: &EntryPatch) -> Result<Option<Entry>> {
        let updated = self.storage.update(id, patch)?;
        if let Some(ref entry) = updated {
            self.cache_put(entry);
        }
        Ok(updated)
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        // Learn the pair key before the row disappears.
        let prior = match self.cache.get(&id_cache_key(id)) {
            Some(entry) => Some(entry),
            None => self.storage.get(id)?,
        };
        let removed = self.storage.delete(id)?;
        if removed {
            self.cache.delete(&id_cache_key(id));
            if let Some(entry) = prior {
                self.cache
                    .delete(&pair_cache_key(&entry.namespace, &entry.key));
            }
        }
        Ok(removed)
    }

    pub async fn query(&self, query: &Query) -> Result<Vec<Entry>> {
        self.storage.query(query)
    }

    pub async fn search(
        &self,
        query_vector: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<ScoredEntry>> {
        self.storage.search(query_vector, options)
    }

    /// Return the entry at (namespace, key) or construct one via `factory`
    /// and store it.
    pub async fn get_or_create<F>(&self, namespace: &str, key: &str, factory: F) -> Result<Entry>
    where
        F: FnOnce() -> EntryInput,
    {
        if let Some(existing) = self.get_by_key(namespace, key).await? {
            return Ok(existing);
        }
        let mut input = factory();
        input.namespace = Some(namespace.to_string());
        input.key = key.to_string();
        self.store_entry(input).await
    }

    pub async fn bulk_insert(&self, inputs: Vec<EntryInput>) -> Result<usize> {
        let now = now_millis();
        let entries: Vec<Entry> = inputs
            .into_iter()
            .map(|input| Entry {
                id: Uuid::new_v4().to_string(),
                key: input.key,
                content: input.content,
                entry_type: input.entry_type,
                namespace: input.namespace.unwrap_or_else(|| "default".to_string()),
                tags: input.tags,
                metadata: input.metadata,
                embedding: input.embedding,
                access_level: input.access_level.unwrap_or_else(|| "private".to_string()),
                created_at: now,
                updated_at: now,
                last_accessed_at: now,
                version: 1,
                access_count: 0,
                references: input.references,
            })
            .collect();
        self.storage.bulk_insert(entries)
    }

    pub async fn bulk_delete(&self, ids: &[String]) -> Result<usize> {
        let count = self.storage.bulk_delete(ids)?;
        for id in ids {
            self.cache.invalidate_pattern(id);
        }
        Ok(count)
    }

    pub async fn list_namespaces(&self) -> Result<Vec<String>> {
        self.storage.list_namespaces()
    }

    pub async fn count(&self, namespace: Option<&str>) -> Result<i64> {
        self.storage.count(namespace)
    }

    pub async fn clear_namespace(&self, namespace: &str) -> Result<usize> {
        let count = self.storage.clear_namespace(namespace)?;
        self.cache.clear();
        Ok(count)
    }

    pub async fn get_stats(&self) -> Result<ServiceStats> {
        Ok(ServiceStats {
            store: self.storage.get_stats()?,
            cache: self.cache.get_stats(),
            index: self.index.get_stats(),
        })
    }

    pub async fn health_check(&self) -> HealthReport {
        let mut report = self.storage.health_check();
        report
            .components
            .insert("cache".to_string(), HealthState::Healthy);
        HealthReport::aggregate(report.components)
    }

    // -----------------------------------------------------------------------
    // Session lifecycle

    /// Open a session and make it current
    pub async fn start_session(&self, project: &str, prompt: Option<&str>) -> Result<Session> {
        let session_id = Uuid::new_v4().to_string();
        let session = self.storage.ensure_session(&session_id, project, prompt)?;
        *self.current_session.lock() = Some(session.clone());
        self.checkpoint_seq.store(0, Ordering::Relaxed);
        self.bus.publish(MemoryEvent::SessionStarted {
            session_id: session.session_id.clone(),
        });
        Ok(session)
    }

    /// Adopt an externally created session (hook pipeline) as current
    pub fn adopt_session(&self, session: Session) {
        *self.current_session.lock() = Some(session);
    }

    pub fn get_current_session(&self) -> Option<Session> {
        self.current_session.lock().clone()
    }

    /// Persist a labeled checkpoint entry for the current session.
    /// Fails with `NoActiveSession` when no session is active.
    pub async fn checkpoint(&self, label: &str) -> Result<Entry> {
        let session = self
            .get_current_session()
            .ok_or(MnemoError::NoActiveSession)?;
        let seq = self.checkpoint_seq.fetch_add(1, Ordering::Relaxed) + 1;

        let mut metadata = HashMap::new();
        metadata.insert(
            "sessionId".to_string(),
            serde_json::Value::String(session.session_id.clone()),
        );
        let entry = Entry {
            id: Uuid::new_v4().to_string(),
            key: format!("checkpoint/{}/{}", session.session_id, seq),
            content: label.to_string(),
            entry_type: EntryType::Episodic,
            namespace: "sessions".to_string(),
            tags: vec!["checkpoint".to_string()],
            metadata,
            embedding: None,
            access_level: "private".to_string(),
            created_at: now_millis(),
            updated_at: now_millis(),
            last_accessed_at: now_millis(),
            version: 1,
            access_count: 0,
            references: vec![],
        };
        let stored = self.storage.store(entry)?;
        self.cache_put(&stored);
        Ok(stored)
    }

    /// Close the current session, marking it completed
    pub async fn end_session(&self, summary: Option<&str>) -> Result<Option<Session>> {
        let Some(session) = self.current_session.lock().take() else {
            return Ok(None);
        };
        self.storage
            .end_session(&session.session_id, summary, SessionStatus::Completed)
    }

    pub async fn get_recent_sessions(&self, limit: usize) -> Result<Vec<Session>> {
        self.storage.recent_sessions(None, limit)
    }

    /// Ordered shutdown: cache sweep stops first, then the index drops its
    /// graph, then storage releases the connection.
    pub async fn shutdown(&self) {
        self.cache.shutdown().await;
        self.index.clear();
        self.storage.close();
        tracing::debug!("service shut down");
    }
}
