//! Core record types for mnemo

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Maximum key length accepted by the store
pub const MAX_KEY_LENGTH: usize = 500;

/// Current epoch time in milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Memory classification for entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    #[default]
    Semantic,
    Episodic,
    Procedural,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Semantic => "semantic",
            EntryType::Episodic => "episodic",
            EntryType::Procedural => "procedural",
        }
    }
}

impl std::str::FromStr for EntryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "semantic" => Ok(EntryType::Semantic),
            "episodic" => Ok(EntryType::Episodic),
            "procedural" => Ok(EntryType::Procedural),
            _ => Err(format!("Unknown entry type: {}", s)),
        }
    }
}

/// The primary persisted record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// Globally unique opaque id
    pub id: String,
    /// Lookup key, unique within the namespace
    pub key: String,
    /// Free-form content
    pub content: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub namespace: String,
    /// Tag order is preserved on write
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Dense embedding, fixed dimension per index
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default = "default_access_level")]
    pub access_level: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_accessed_at: i64,
    /// Starts at 1, increments on every mutating update
    pub version: i64,
    pub access_count: i64,
    /// Ids of other entries; cycles are permitted
    #[serde(default)]
    pub references: Vec<String>,
}

fn default_access_level() -> String {
    "private".to_string()
}

/// Input for storing a new entry through the facade
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EntryInput {
    pub key: String,
    pub content: String,
    #[serde(default, rename = "type")]
    pub entry_type: EntryType,
    pub namespace: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub embedding: Option<Vec<f32>>,
    pub access_level: Option<String>,
    #[serde(default)]
    pub references: Vec<String>,
}

/// Field-wise partial update for an entry
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EntryPatch {
    pub content: Option<String>,
    #[serde(rename = "type")]
    pub entry_type: Option<EntryType>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
    pub embedding: Option<Vec<f32>>,
    pub access_level: Option<String>,
    pub references: Option<Vec<String>>,
}

impl EntryPatch {
    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.entry_type.is_none()
            && self.tags.is_none()
            && self.metadata.is_none()
            && self.embedding.is_none()
            && self.access_level.is_none()
            && self.references.is_none()
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Active,
    Completed,
    Abandoned,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Abandoned => "abandoned",
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(SessionStatus::Active),
            "completed" => Ok(SessionStatus::Completed),
            "abandoned" => Ok(SessionStatus::Abandoned),
            _ => Err(format!("Unknown session status: {}", s)),
        }
    }
}

/// A logical interaction window
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: i64,
    pub session_id: String,
    pub project: String,
    /// Initial prompt, if the session opened with one
    pub prompt: Option<String>,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub observation_count: i64,
    pub summary: Option<String>,
    pub status: SessionStatus,
}

/// One prompt within a session; `prompt_number` is 1-based and dense
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPrompt {
    pub session_id: String,
    pub prompt_number: i64,
    pub prompt_text: String,
    pub created_at: i64,
}

/// Classification of a captured tool invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ObservationKind {
    Read,
    Write,
    Execute,
    Search,
    #[default]
    Other,
}

impl ObservationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationKind::Read => "read",
            ObservationKind::Write => "write",
            ObservationKind::Execute => "execute",
            ObservationKind::Search => "search",
            ObservationKind::Other => "other",
        }
    }
}

impl std::str::FromStr for ObservationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "read" => Ok(ObservationKind::Read),
            "write" => Ok(ObservationKind::Write),
            "execute" => Ok(ObservationKind::Execute),
            "search" => Ok(ObservationKind::Search),
            "other" => Ok(ObservationKind::Other),
            _ => Err(format!("Unknown observation kind: {}", s)),
        }
    }
}

/// A captured tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub id: String,
    pub session_id: String,
    pub project: String,
    pub tool_name: String,
    /// Serialized tool input
    pub tool_input: String,
    /// Serialized tool response, truncated to the configured byte cap
    pub tool_response: String,
    pub cwd: String,
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: ObservationKind,
    pub title: String,
    pub subtitle: String,
    pub narrative: String,
    #[serde(default)]
    pub files_read: Vec<String>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub concepts: Vec<String>,
    /// Links back to the containing prompt, when known
    pub prompt_number: Option<i64>,
}

/// Structured rollup produced at session end
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub project: String,
    /// Concatenation of all prompts in order, truncated
    pub request: String,
    /// Formatted activity counts
    pub completed: String,
    pub files_read: Vec<String>,
    pub files_modified: Vec<String>,
    pub next_steps: Vec<String>,
    pub notes: Vec<String>,
    /// Count of prompts folded into `request`
    pub prompt_number: i64,
    pub created_at: i64,
}

/// Retrieval mode of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Exact,
    Prefix,
    #[default]
    Keyword,
    Semantic,
    Hybrid,
}

/// Query descriptor accepted by the storage engine
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    #[serde(rename = "type")]
    pub query_type: QueryType,
    pub key: Option<String>,
    pub key_prefix: Option<String>,
    pub content: Option<String>,
    pub query_embedding: Option<Vec<f32>>,
    pub namespace: Option<String>,
    pub memory_type: Option<EntryType>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_before: Option<i64>,
    pub created_after: Option<i64>,
    pub limit: Option<usize>,
}

/// Default result cap when a query omits `limit`
pub const DEFAULT_QUERY_LIMIT: usize = 10;

/// Filters applied after vector search
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilters {
    pub namespace: Option<String>,
    pub memory_type: Option<EntryType>,
}

/// Options for vector search through the storage engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOptions {
    pub k: usize,
    /// Drop results whose similarity falls below this value
    pub threshold: Option<f32>,
    #[serde(default)]
    pub filters: SearchFilters,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            k: DEFAULT_QUERY_LIMIT,
            threshold: None,
            filters: SearchFilters::default(),
        }
    }
}

/// One scored result from a vector search
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredEntry {
    pub entry: Entry,
    pub distance: f32,
    pub similarity: f32,
}

/// Statistics about the persisted store
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total_entries: i64,
    pub entries_by_namespace: HashMap<String, i64>,
    pub entries_by_type: HashMap<String, i64>,
    /// Database size in bytes
    pub memory_usage: i64,
}

/// Health of one component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Aggregate health report with per-component sub-statuses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthState,
    pub components: HashMap<String, HealthState>,
}

impl HealthReport {
    /// Fold component states into the aggregate: any unhealthy wins,
    /// any degraded downgrades an otherwise healthy report.
    pub fn aggregate(components: HashMap<String, HealthState>) -> Self {
        let mut status = HealthState::Healthy;
        for state in components.values() {
            match state {
                HealthState::Unhealthy => {
                    status = HealthState::Unhealthy;
                    break;
                }
                HealthState::Degraded => status = HealthState::Degraded,
                HealthState::Healthy => {}
            }
        }
        Self { status, components }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_type_round_trip() {
        for t in [EntryType::Semantic, EntryType::Episodic, EntryType::Procedural] {
            assert_eq!(t.as_str().parse::<EntryType>().unwrap(), t);
        }
        assert!("unknown".parse::<EntryType>().is_err());
    }

    #[test]
    fn observation_kind_round_trip() {
        for k in [
            ObservationKind::Read,
            ObservationKind::Write,
            ObservationKind::Execute,
            ObservationKind::Search,
            ObservationKind::Other,
        ] {
            assert_eq!(k.as_str().parse::<ObservationKind>().unwrap(), k);
        }
    }

    #[test]
    fn health_aggregation() {
        let mut components = HashMap::new();
        components.insert("storage".to_string(), HealthState::Healthy);
        components.insert("cache".to_string(), HealthState::Healthy);
        let report = HealthReport::aggregate(components.clone());
        assert_eq!(report.status, HealthState::Healthy);

        components.insert("index".to_string(), HealthState::Degraded);
        let report = HealthReport::aggregate(components.clone());
        assert_eq!(report.status, HealthState::Degraded);

        components.insert("storage".to_string(), HealthState::Unhealthy);
        let report = HealthReport::aggregate(components);
        assert_eq!(report.status, HealthState::Unhealthy);
    }

    #[test]
    fn entry_serializes_camel_case() {
        let entry = Entry {
            id: "e1".into(),
            key: "auth".into(),
            content: "JWT + refresh".into(),
            entry_type: EntryType::Semantic,
            namespace: "patterns".into(),
            tags: vec!["auth".into()],
            metadata: HashMap::new(),
            embedding: None,
            access_level: "private".into(),
            created_at: 1,
            updated_at: 1,
            last_accessed_at: 1,
            version: 1,
            access_count: 0,
            references: vec![],
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("createdAt").is_some());
        assert!(json.get("accessCount").is_some());
        assert_eq!(json["type"], "semantic");
    }
}
