//! Tool surface
//!
//! The seven named operations exposed to the external RPC layer, as
//! `(name, description, JSON schema)` definitions plus a dispatcher that
//! maps a call onto the facade. The transport itself lives outside this
//! crate.

use serde_json::{json, Value};

use crate::error::{MnemoError, Result};
use crate::service::MemoryService;
use crate::types::*;

/// All tool definitions: (name, description, input schema JSON)
pub const TOOL_DEFINITIONS: &[(&str, &str, &str)] = &[
    (
        "memory_save",
        "Store a memory. Use for decisions, patterns, errors, and project context worth keeping across sessions.",
        r#"{
            "type": "object",
            "properties": {
                "content": {"type": "string", "description": "The content to remember"},
                "category": {"type": "string", "enum": ["decision", "pattern", "error", "context", "observation"], "default": "context", "description": "Kind of knowledge being saved"},
                "tags": {"type": "array", "items": {"type": "string"}, "description": "Tags for later filtering"},
                "importance": {"type": "string", "enum": ["low", "medium", "high", "critical"], "default": "medium", "description": "How important this memory is"}
            },
            "required": ["content"]
        }"#,
    ),
    (
        "memory_search",
        "Full-text search over stored memories",
        r#"{
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Search terms"},
                "limit": {"type": "integer", "minimum": 1, "maximum": 50, "default": 10},
                "category": {"type": "string", "enum": ["decision", "pattern", "error", "context", "observation"], "description": "Restrict to one category"}
            },
            "required": ["query"]
        }"#,
    ),
    (
        "memory_timeline",
        "Memories created around an anchor memory, within a time window",
        r#"{
            "type": "object",
            "properties": {
                "anchor": {"type": "string", "description": "Id of the anchor memory"},
                "before": {"type": "integer", "minimum": 0, "default": 30, "description": "Minutes before the anchor"},
                "after": {"type": "integer", "minimum": 0, "default": 30, "description": "Minutes after the anchor"}
            },
            "required": ["anchor"]
        }"#,
    ),
    (
        "memory_details",
        "Fetch full records for up to five memory ids",
        r#"{
            "type": "object",
            "properties": {
                "ids": {"type": "array", "items": {"type": "string"}, "minItems": 1, "maxItems": 5, "description": "Memory ids to fetch"}
            },
            "required": ["ids"]
        }"#,
    ),
    (
        "memory_recall",
        "Recall memories about a topic within a time range",
        r#"{
            "type": "object",
            "properties": {
                "topic": {"type": "string", "description": "What to recall"},
                "timeRange": {"type": "string", "enum": ["today", "week", "month", "all"], "default": "all"}
            },
            "required": ["topic"]
        }"#,
    ),
    (
        "memory_list",
        "List recent memories, optionally by category",
        r#"{
            "type": "object",
            "properties": {
                "category": {"type": "string", "enum": ["decision", "pattern", "error", "context", "observation"], "description": "Restrict to one category"},
                "limit": {"type": "integer", "minimum": 1, "maximum": 100, "default": 20}
            }
        }"#,
    ),
    (
        "memory_status",
        "Store statistics and component health",
        r#"{"type": "object", "properties": {}}"#,
    ),
];

/// Record cap on a single memory_details request
pub const DETAILS_CAP: usize = 5;

const CATEGORIES: &[&str] = &["decision", "pattern", "error", "context", "observation"];

fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

fn usize_arg(args: &Value, key: &str, default: usize) -> usize {
    args.get(key)
        .and_then(Value::as_u64)
        .map(|n| n as usize)
        .unwrap_or(default)
}

fn category_arg(args: &Value) -> Result<Option<String>> {
    match str_arg(args, "category") {
        None => Ok(None),
        Some(category) if CATEGORIES.contains(&category) => Ok(Some(category.to_string())),
        Some(other) => Err(MnemoError::Validation(format!(
            "unknown category: {}",
            other
        ))),
    }
}

fn entry_to_json(entry: &Entry) -> Value {
    json!({
        "id": entry.id,
        "key": entry.key,
        "content": entry.content,
        "namespace": entry.namespace,
        "type": entry.entry_type.as_str(),
        "tags": entry.tags,
        "createdAt": entry.created_at,
        "updatedAt": entry.updated_at,
        "version": entry.version,
    })
}

/// Execute one tool call against the facade
pub async fn dispatch(service: &MemoryService, name: &str, args: &Value) -> Result<Value> {
    match name {
        "memory_save" => {
            let content = str_arg(args, "content")
                .ok_or_else(|| MnemoError::Validation("content is required".to_string()))?;
            let category = category_arg(args)?.unwrap_or_else(|| "context".to_string());
            let importance = match str_arg(args, "importance").unwrap_or("medium") {
                level @ ("low" | "medium" | "high" | "critical") => level,
                other => {
                    return Err(MnemoError::Validation(format!(
                        "unknown importance: {}",
                        other
                    )))
                }
            };
            let tags: Vec<String> = args
                .get("tags")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();

            let mut metadata = std::collections::HashMap::new();
            metadata.insert(
                "importance".to_string(),
                Value::String(importance.to_string()),
            );

            let key = derive_key(content);
            let entry = service
                .store_entry(EntryInput {
                    key,
                    content: content.to_string(),
                    namespace: Some(category),
                    tags,
                    metadata,
                    ..Default::default()
                })
                .await?;
            Ok(json!({"saved": true, "id": entry.id, "key": entry.key}))
        }

        "memory_search" => {
            let text = str_arg(args, "query")
                .ok_or_else(|| MnemoError::Validation("query is required".to_string()))?;
            let query = Query {
                query_type: QueryType::Keyword,
                content: Some(text.to_string()),
                namespace: category_arg(args)?,
                limit: Some(usize_arg(args, "limit", DEFAULT_QUERY_LIMIT)),
                ..Default::default()
            };
            let entries = service.query(&query).await?;
            Ok(json!({
                "count": entries.len(),
                "results": entries.iter().map(entry_to_json).collect::<Vec<_>>(),
            }))
        }

        "memory_timeline" => {
            let anchor_id = str_arg(args, "anchor")
                .ok_or_else(|| MnemoError::Validation("anchor is required".to_string()))?;
            let anchor = service
                .get(anchor_id)
                .await?
                .ok_or_else(|| MnemoError::NotFound(anchor_id.to_string()))?;
            let before_ms = usize_arg(args, "before", 30) as i64 * 60_000;
            let after_ms = usize_arg(args, "after", 30) as i64 * 60_000;

            let query = Query {
                query_type: QueryType::Hybrid,
                created_after: Some(anchor.created_at - before_ms - 1),
                created_before: Some(anchor.created_at + after_ms + 1),
                limit: Some(50),
                ..Default::default()
            };
            let mut entries = service.query(&query).await?;
            entries.sort_by_key(|entry| entry.created_at);
            Ok(json!({
                "anchor": entry_to_json(&anchor),
                "timeline": entries.iter().map(entry_to_json).collect::<Vec<_>>(),
            }))
        }

        "memory_details" => {
            let ids = args
                .get("ids")
                .and_then(Value::as_array)
                .ok_or_else(|| MnemoError::Validation("ids is required".to_string()))?;
            if ids.len() > DETAILS_CAP {
                return Err(MnemoError::Validation(format!(
                    "at most {} ids per request",
                    DETAILS_CAP
                )));
            }
            let mut found = Vec::new();
            let mut missing = Vec::new();
            for id in ids.iter().filter_map(Value::as_str) {
                match service.get(id).await? {
                    Some(entry) => found.push(serde_json::to_value(&entry)?),
                    None => missing.push(id.to_string()),
                }
            }
            Ok(json!({"memories": found, "missing": missing}))
        }

        "memory_recall" => {
            let topic = str_arg(args, "topic")
                .ok_or_else(|| MnemoError::Validation("topic is required".to_string()))?;
            let created_after = match str_arg(args, "timeRange").unwrap_or("all") {
                "today" => Some(now_millis() - 24 * 3_600_000),
                "week" => Some(now_millis() - 7 * 24 * 3_600_000),
                "month" => Some(now_millis() - 30 * 24 * 3_600_000),
                "all" => None,
                other => {
                    return Err(MnemoError::Validation(format!(
                        "unknown timeRange: {}",
                        other
                    )))
                }
            };
            let query = Query {
                query_type: QueryType::Keyword,
                content: Some(topic.to_string()),
                created_after,
                ..Default::default()
            };
            let entries = service.query(&query).await?;
            Ok(json!({
                "topic": topic,
                "results": entries.iter().map(entry_to_json).collect::<Vec<_>>(),
            }))
        }

        "memory_list" => {
            let query = Query {
                query_type: QueryType::Hybrid,
                namespace: category_arg(args)?,
                limit: Some(usize_arg(args, "limit", 20)),
                ..Default::default()
            };
            let entries = service.query(&query).await?;
            Ok(json!({
                "count": entries.len(),
                "results": entries.iter().map(entry_to_json).collect::<Vec<_>>(),
            }))
        }

        "memory_status" => {
            let stats = service.get_stats().await?;
            let health = service.health_check().await;
            Ok(json!({"stats": stats, "health": health}))
        }

        other => Err(MnemoError::Validation(format!("unknown tool: {}", other))),
    }
}

/// Stable-ish key from the content head plus a random suffix, so saves
/// never collide on (namespace, key).
fn derive_key(content: &str) -> String {
    let head: String = content
        .chars()
        .take(48)
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let head = head.trim_matches('-');
    let suffix = &uuid::Uuid::new_v4().simple().to_string()[..8];
    if head.is_empty() {
        format!("memory-{}", suffix)
    } else {
        format!("{}-{}", head, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::index::HnswConfig;

    async fn service() -> MemoryService {
        let config = MemoryConfig {
            index: HnswConfig::new(4),
            ..MemoryConfig::in_memory()
        };
        let service = MemoryService::new(config);
        service.initialize().await.unwrap();
        service
    }

    #[test]
    fn definitions_are_wellformed() {
        assert_eq!(TOOL_DEFINITIONS.len(), 7);
        for (name, description, schema) in TOOL_DEFINITIONS {
            assert!(!name.is_empty());
            assert!(!description.is_empty());
            let parsed: Value = serde_json::from_str(schema).unwrap();
            assert_eq!(parsed["type"], "object");
        }
    }

    #[tokio::test]
    async fn save_then_search() {
        let service = service().await;
        let saved = dispatch(
            &service,
            "memory_save",
            &json!({"content": "JWT refresh rotation decided", "category": "decision", "tags": ["auth"]}),
        )
        .await
        .unwrap();
        assert_eq!(saved["saved"], true);

        let found = dispatch(
            &service,
            "memory_search",
            &json!({"query": "JWT", "category": "decision"}),
        )
        .await
        .unwrap();
        assert_eq!(found["count"], 1);
    }

    #[tokio::test]
    async fn details_caps_at_five() {
        let service = service().await;
        let ids: Vec<Value> = (0..6).map(|i| json!(format!("id-{}", i))).collect();
        let err = dispatch(&service, "memory_details", &json!({ "ids": ids }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
    }

    #[tokio::test]
    async fn timeline_windows_by_minutes() {
        let service = service().await;
        let anchor = dispatch(
            &service,
            "memory_save",
            &json!({"content": "anchor memory"}),
        )
        .await
        .unwrap();
        let anchor_id = anchor["id"].as_str().unwrap();

        let timeline = dispatch(
            &service,
            "memory_timeline",
            &json!({"anchor": anchor_id, "before": 5, "after": 5}),
        )
        .await
        .unwrap();
        let entries = timeline["timeline"].as_array().unwrap();
        assert!(entries.iter().any(|e| e["id"] == *anchor_id));
    }

    #[tokio::test]
    async fn status_reports_health() {
        let service = service().await;
        let status = dispatch(&service, "memory_status", &json!({})).await.unwrap();
        assert_eq!(status["health"]["status"], "healthy");
    }

    #[tokio::test]
    async fn unknown_tool_rejected() {
        let service = service().await;
        let err = dispatch(&service, "memory_forget", &json!({})).await.unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
    }

    #[tokio::test]
    async fn invalid_category_rejected() {
        let service = service().await;
        let err = dispatch(
            &service,
            "memory_save",
            &json!({"content": "x", "category": "gossip"}),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
    }
}
