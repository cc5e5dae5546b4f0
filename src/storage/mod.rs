//! Storage engine
//!
//! Single-writer relational persistence for entries, sessions,
//! observations, prompts, and summaries, with a parallel FTS table,
//! query compilation, and an in-memory vector index kept in lockstep
//! with entry writes.

mod compiler;
mod connection;
mod migrations;
pub mod queries;

pub use compiler::escape_fts5_query;
pub use connection::Database;
pub use migrations::column_exists;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::MemoryConfig;
use crate::error::{MnemoError, Result};
use crate::events::{EventBus, MemoryEvent};
use crate::index::HnswIndex;
use crate::types::*;

/// The storage engine. All persisted records are owned here; the vector
/// index mirrors entries that carry embeddings.
pub struct StorageEngine {
    config: MemoryConfig,
    db: RwLock<Option<Database>>,
    index: Arc<HnswIndex>,
    bus: EventBus,
}

impl StorageEngine {
    pub fn new(config: MemoryConfig, index: Arc<HnswIndex>, bus: EventBus) -> Self {
        Self {
            config,
            db: RwLock::new(None),
            index,
            bus,
        }
    }

    /// Open the database, run migrations, and rebuild the vector index
    /// from stored embeddings. Idempotent; a second call is a no-op.
    pub fn initialize(&self) -> Result<()> {
        let mut guard = self.db.write();
        if guard.is_some() {
            return Ok(());
        }

        let database = Database::open(&self.config.db_path())?;
        database.with_connection(|conn| migrations::run_migrations(conn, &self.config.tokenizer))?;

        let pairs = database.with_connection(queries::load_embeddings)?;
        let dims = self.index.dimensions();
        let usable: Vec<(String, Vec<f32>)> = pairs
            .into_iter()
            .filter(|(id, embedding)| {
                if embedding.len() == dims {
                    true
                } else {
                    tracing::warn!(id, len = embedding.len(), dims, "skipping stale embedding");
                    false
                }
            })
            .collect();
        if !usable.is_empty() {
            self.index.rebuild(&usable)?;
        }

        tracing::info!(path = %self.config.db_path().display(), "storage initialized");
        *guard = Some(database);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.db.read().is_some()
    }

    /// Release the database connection. Further operations fail with
    /// `NotInitialized` until `initialize` runs again.
    pub fn close(&self) {
        *self.db.write() = None;
    }

    fn database(&self) -> Result<Database> {
        self.db
            .read()
            .as_ref()
            .cloned()
            .ok_or(MnemoError::NotInitialized)
    }

    pub fn active_tokenizer(&self) -> &str {
        self.config.tokenizer.name()
    }

    pub fn is_cjk_optimized(&self) -> bool {
        self.config.tokenizer.is_cjk_optimized()
    }

    pub fn index(&self) -> &Arc<HnswIndex> {
        &self.index
    }

    fn validate(&self, entry: &Entry) -> Result<()> {
        if entry.key.is_empty() {
            return Err(MnemoError::Validation("key must not be empty".to_string()));
        }
        if entry.key.chars().count() > MAX_KEY_LENGTH {
            return Err(MnemoError::Validation(format!(
                "key exceeds {} characters",
                MAX_KEY_LENGTH
            )));
        }
        if entry.content.is_empty() {
            return Err(MnemoError::Validation(
                "content must not be empty".to_string(),
            ));
        }
        if entry.namespace.is_empty() {
            return Err(MnemoError::Validation(
                "namespace must not be empty".to_string(),
            ));
        }
        if let Some(ref embedding) = entry.embedding {
            if embedding.len() != self.index.dimensions() {
                return Err(MnemoError::DimensionMismatch {
                    expected: self.index.dimensions(),
                    actual: embedding.len(),
                });
            }
        }
        Ok(())
    }

    /// Upsert by id. A (namespace, key) collision on a different id fails
    /// with `Conflict`. Replacing an existing id bumps its version.
    pub fn store(&self, mut entry: Entry) -> Result<Entry> {
        self.validate(&entry)?;
        self.check_index_capacity(&entry)?;
        let db = self.database()?;

        let stored = db.with_transaction(|conn| {
            if let Some(occupant) =
                queries::find_by_namespace_key(conn, &entry.namespace, &entry.key)?
            {
                if occupant != entry.id {
                    return Err(MnemoError::Conflict(format!(
                        "({}, {}) already taken by {}",
                        entry.namespace, entry.key, occupant
                    )));
                }
            }
            if let Some(existing) = queries::get_entry(conn, &entry.id, false)? {
                entry.version = existing.version + 1;
                entry.created_at = existing.created_at;
                entry.updated_at = now_millis();
            }
            queries::upsert_entry(conn, &entry)?;
            Ok(entry.clone())
        })?;

        self.sync_index(&stored)?;
        self.bus.publish(MemoryEvent::EntryStored {
            id: stored.id.clone(),
            namespace: stored.namespace.clone(),
        });
        Ok(stored)
    }

    /// Reject before the row is committed when the index cannot take the
    /// embedding; keeps the row and the graph in step.
    fn check_index_capacity(&self, entry: &Entry) -> Result<()> {
        if entry.embedding.is_some()
            && !self.index.contains(&entry.id)
            && self.index.len() >= self.index.config().max_elements
        {
            return Err(MnemoError::IndexFull {
                capacity: self.index.config().max_elements,
            });
        }
        Ok(())
    }

    fn sync_index(&self, entry: &Entry) -> Result<()> {
        match &entry.embedding {
            Some(embedding) => self.index.add_point(&entry.id, embedding),
            None => {
                self.index.remove_point(&entry.id);
                Ok(())
            }
        }
    }

    /// Fetch by id; a hit bumps `access_count` and `last_accessed_at`
    pub fn get(&self, id: &str) -> Result<Option<Entry>> {
        let db = self.database()?;
        db.with_connection(|conn| queries::get_entry(conn, id, true))
    }

    /// Fetch by the unique (namespace, key) pair; same contract as `get`
    pub fn get_by_key(&self, namespace: &str, key: &str) -> Result<Option<Entry>> {
        let db = self.database()?;
        db.with_connection(|conn| queries::get_entry_by_key(conn, namespace, key, true))
    }

    /// Field-wise partial update; bumps version and `updated_at`.
    /// Returns `None` when the id is unknown.
    pub fn update(&self, id: &str, patch: &EntryPatch) -> Result<Option<Entry>> {
        if let Some(ref embedding) = patch.embedding {
            if embedding.len() != self.index.dimensions() {
                return Err(MnemoError::DimensionMismatch {
                    expected: self.index.dimensions(),
                    actual: embedding.len(),
                });
            }
        }
        let db = self.database()?;

        let updated = db.with_transaction(|conn| {
            let Some(mut entry) = queries::get_entry(conn, id, false)? else {
                return Ok(None);
            };
            if let Some(ref content) = patch.content {
                if content.is_empty() {
                    return Err(MnemoError::Validation(
                        "content must not be empty".to_string(),
                    ));
                }
                entry.content = content.clone();
            }
            if let Some(entry_type) = patch.entry_type {
                entry.entry_type = entry_type;
            }
            if let Some(ref tags) = patch.tags {
                entry.tags = tags.clone();
            }
            if let Some(ref metadata) = patch.metadata {
                entry.metadata = metadata.clone();
            }
            if let Some(ref embedding) = patch.embedding {
                entry.embedding = Some(embedding.clone());
            }
            if let Some(ref access_level) = patch.access_level {
                entry.access_level = access_level.clone();
            }
            if let Some(ref references) = patch.references {
                entry.references = references.clone();
            }
            entry.version += 1;
            entry.updated_at = now_millis();
            queries::upsert_entry(conn, &entry)?;
            Ok(Some(entry))
        })?;

        if let Some(ref entry) = updated {
            if patch.embedding.is_some() {
                self.sync_index(entry)?;
            }
            self.bus.publish(MemoryEvent::EntryUpdated {
                id: entry.id.clone(),
                version: entry.version,
            });
        }
        Ok(updated)
    }

    /// Delete by id; returns whether a row was removed
    pub fn delete(&self, id: &str) -> Result<bool> {
        let db = self.database()?;
        let removed = db.with_transaction(|conn| queries::delete_entry(conn, id))?;
        if removed {
            self.index.remove_point(id);
            self.bus
                .publish(MemoryEvent::EntryDeleted { id: id.to_string() });
        }
        Ok(removed)
    }

    /// All-or-nothing bulk insert. Empty input is a no-op. Emits one
    /// aggregate event.
    pub fn bulk_insert(&self, mut entries: Vec<Entry>) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        for entry in &entries {
            self.validate(entry)?;
            self.check_index_capacity(entry)?;
        }
        let db = self.database()?;

        let stored = db.with_transaction(|conn| {
            for entry in &mut entries {
                if let Some(occupant) =
                    queries::find_by_namespace_key(conn, &entry.namespace, &entry.key)?
                {
                    if occupant != entry.id {
                        return Err(MnemoError::Conflict(format!(
                            "({}, {}) already taken by {}",
                            entry.namespace, entry.key, occupant
                        )));
                    }
                }
                if let Some(existing) = queries::get_entry(conn, &entry.id, false)? {
                    entry.version = existing.version + 1;
                    entry.created_at = existing.created_at;
                    entry.updated_at = now_millis();
                }
                queries::upsert_entry(conn, entry)?;
            }
            Ok(entries)
        })?;

        for entry in &stored {
            self.sync_index(entry)?;
        }
        let count = stored.len();
        self.bus.publish(MemoryEvent::BulkInserted { count });
        Ok(count)
    }

    /// Single-transaction bulk delete; returns the count actually removed
    pub fn bulk_delete(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let db = self.database()?;
        let removed: Vec<String> = db.with_transaction(|conn| {
            let mut removed = Vec::new();
            for id in ids {
                if queries::delete_entry(conn, id)? {
                    removed.push(id.clone());
                }
            }
            Ok(removed)
        })?;

        for id in &removed {
            self.index.remove_point(id);
        }
        let count = removed.len();
        self.bus.publish(MemoryEvent::BulkDeleted { count });
        Ok(count)
    }

    /// Run a query descriptor. Semantic queries go through the vector
    /// index and silently ignore entries without embeddings; the other
    /// modes compile to SQL.
    pub fn query(&self, query: &Query) -> Result<Vec<Entry>> {
        match query.query_type {
            QueryType::Semantic => {
                let embedding = query.query_embedding.as_ref().ok_or_else(|| {
                    MnemoError::Validation("semantic query requires queryEmbedding".to_string())
                })?;
                let options = SearchOptions {
                    k: query.limit.unwrap_or(DEFAULT_QUERY_LIMIT),
                    threshold: None,
                    filters: SearchFilters {
                        namespace: query.namespace.clone(),
                        memory_type: query.memory_type,
                    },
                };
                let scored = self.search(embedding, &options)?;
                let mut entries: Vec<Entry> =
                    scored.into_iter().map(|result| result.entry).collect();
                entries.retain(|entry| {
                    query.tags.iter().all(|tag| entry.tags.contains(tag))
                        && query.created_before.map_or(true, |t| entry.created_at < t)
                        && query.created_after.map_or(true, |t| entry.created_at > t)
                });
                Ok(entries)
            }
            _ => {
                let db = self.database()?;
                db.with_connection(|conn| compiler::run_query(conn, query))
            }
        }
    }

    /// Vector search with post-filters and an optional similarity floor
    pub fn search(&self, query_vector: &[f32], options: &SearchOptions) -> Result<Vec<ScoredEntry>> {
        let db = self.database()?;
        let filtered = options.filters.namespace.is_some() || options.filters.memory_type.is_some();
        let fetch = if filtered {
            (options.k * 4).max(options.k + 16)
        } else {
            options.k
        };

        let neighbors = self.index.search(query_vector, fetch, None)?;
        let metric = self.index.config().metric;

        let mut results = Vec::with_capacity(options.k);
        db.with_connection(|conn| {
            for neighbor in neighbors {
                if results.len() >= options.k {
                    break;
                }
                let Some(entry) = queries::get_entry(conn, &neighbor.id, false)? else {
                    continue;
                };
                if let Some(ref namespace) = options.filters.namespace {
                    if entry.namespace != *namespace {
                        continue;
                    }
                }
                if let Some(memory_type) = options.filters.memory_type {
                    if entry.entry_type != memory_type {
                        continue;
                    }
                }
                let similarity = metric.similarity(neighbor.distance);
                if let Some(threshold) = options.threshold {
                    if similarity < threshold {
                        continue;
                    }
                }
                results.push(ScoredEntry {
                    entry,
                    distance: neighbor.distance,
                    similarity,
                });
            }
            Ok(())
        })?;
        Ok(results)
    }

    pub fn list_namespaces(&self) -> Result<Vec<String>> {
        let db = self.database()?;
        db.with_connection(queries::list_namespaces)
    }

    pub fn count(&self, namespace: Option<&str>) -> Result<i64> {
        let db = self.database()?;
        db.with_connection(|conn| queries::count_entries(conn, namespace))
    }

    /// Remove every entry in a namespace; returns the count deleted
    pub fn clear_namespace(&self, namespace: &str) -> Result<usize> {
        let db = self.database()?;
        let removed = db.with_transaction(|conn| queries::clear_namespace(conn, namespace))?;
        for id in &removed {
            self.index.remove_point(id);
        }
        let count = removed.len();
        self.bus.publish(MemoryEvent::NamespaceCleared {
            namespace: namespace.to_string(),
            count,
        });
        Ok(count)
    }

    pub fn get_stats(&self) -> Result<StoreStats> {
        let db = self.database()?;
        let mut stats = db.with_connection(queries::entry_stats)?;
        stats.memory_usage = db.size_bytes().unwrap_or(0);
        Ok(stats)
    }

    /// Per-component health, folded into an aggregate status
    pub fn health_check(&self) -> HealthReport {
        let mut components = HashMap::new();

        let storage = match self.database() {
            Ok(db) => match db.with_connection(|conn| {
                conn.query_row("SELECT 1", [], |_| Ok(()))?;
                Ok(())
            }) {
                Ok(()) => HealthState::Healthy,
                Err(_) => HealthState::Unhealthy,
            },
            Err(_) => HealthState::Unhealthy,
        };
        components.insert("storage".to_string(), storage);

        let index_stats = self.index.get_stats();
        let index = if index_stats.vector_count >= self.index.config().max_elements {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };
        components.insert("index".to_string(), index);

        HealthReport::aggregate(components)
    }

    /// Drop and repopulate the FTS table from the canonical entry rows
    pub fn rebuild_fts_index(&self) -> Result<()> {
        let db = self.database()?;
        db.with_transaction(migrations::repopulate_fts)
    }

    // -----------------------------------------------------------------------
    // Session bookkeeping used by the facade and the hook pipeline

    pub fn ensure_session(
        &self,
        session_id: &str,
        project: &str,
        prompt: Option<&str>,
    ) -> Result<Session> {
        let db = self.database()?;
        db.with_connection(|conn| queries::ensure_session(conn, session_id, project, prompt))
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let db = self.database()?;
        db.with_connection(|conn| queries::get_session(conn, session_id))
    }

    pub fn end_session(
        &self,
        session_id: &str,
        summary: Option<&str>,
        status: SessionStatus,
    ) -> Result<Option<Session>> {
        let db = self.database()?;
        let session =
            db.with_connection(|conn| queries::end_session(conn, session_id, summary, status))?;
        if session.is_some() {
            self.bus.publish(MemoryEvent::SessionEnded {
                session_id: session_id.to_string(),
            });
        }
        Ok(session)
    }

    pub fn recent_sessions(&self, project: Option<&str>, limit: usize) -> Result<Vec<Session>> {
        let db = self.database()?;
        db.with_connection(|conn| queries::recent_sessions(conn, project, limit))
    }

    /// Append a prompt; numbering stays dense under the unique constraint
    pub fn record_prompt(&self, session_id: &str, text: &str) -> Result<UserPrompt> {
        let db = self.database()?;
        db.with_transaction(|conn| queries::insert_prompt(conn, session_id, text))
    }

    pub fn prompts_for_session(&self, session_id: &str) -> Result<Vec<UserPrompt>> {
        let db = self.database()?;
        db.with_connection(|conn| queries::list_prompts(conn, session_id))
    }

    pub fn recent_prompts(&self, project: &str, limit: usize) -> Result<Vec<UserPrompt>> {
        let db = self.database()?;
        db.with_connection(|conn| queries::recent_prompts(conn, project, limit))
    }

    pub fn record_observation(&self, observation: &Observation) -> Result<()> {
        let db = self.database()?;
        db.with_transaction(|conn| {
            queries::insert_observation(conn, observation)?;
            queries::bump_observation_count(conn, &observation.session_id)
        })
    }

    /// Rewrite an existing observation's enrichment fields without
    /// touching the session's observation count.
    pub fn update_observation(&self, observation: &Observation) -> Result<bool> {
        let db = self.database()?;
        db.with_transaction(|conn| queries::update_observation(conn, observation))
    }

    pub fn get_observation(&self, id: &str) -> Result<Option<Observation>> {
        let db = self.database()?;
        db.with_connection(|conn| queries::get_observation(conn, id))
    }

    pub fn observations_for_session(&self, session_id: &str) -> Result<Vec<Observation>> {
        let db = self.database()?;
        db.with_connection(|conn| queries::observations_for_session(conn, session_id))
    }

    pub fn recent_observations(&self, project: &str, limit: usize) -> Result<Vec<Observation>> {
        let db = self.database()?;
        db.with_connection(|conn| queries::recent_observations(conn, project, limit))
    }

    pub fn record_summary(&self, summary: &SessionSummary) -> Result<()> {
        let db = self.database()?;
        db.with_transaction(|conn| queries::insert_summary(conn, summary))
    }

    pub fn summaries_for_project(&self, project: &str, limit: usize) -> Result<Vec<SessionSummary>> {
        let db = self.database()?;
        db.with_connection(|conn| queries::summaries_for_project(conn, project, limit))
    }
}
