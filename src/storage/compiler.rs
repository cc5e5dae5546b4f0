//! Query compilation
//!
//! Turns a query descriptor into SQL for the exact, prefix, keyword, and
//! hybrid modes. Semantic queries never reach this module; the engine
//! routes them through the vector index. All modes compose with the same
//! optional filters, and equal-score ties break on descending
//! `updated_at` then ascending `id`.

use rusqlite::{params_from_iter, Connection};

use crate::error::{MnemoError, Result};
use crate::types::{Entry, Query, QueryType, DEFAULT_QUERY_LIMIT};

use super::queries::{entry_from_row, ENTRY_COLUMNS};

type SqlParam = Box<dyn rusqlite::ToSql>;

/// Run a non-semantic query
pub fn run_query(conn: &Connection, query: &Query) -> Result<Vec<Entry>> {
    match query.query_type {
        QueryType::Exact => run_exact(conn, query),
        QueryType::Prefix => run_prefix(conn, query),
        QueryType::Keyword => run_keyword(conn, query),
        QueryType::Hybrid => run_hybrid(conn, query),
        QueryType::Semantic => Err(MnemoError::Validation(
            "semantic queries are routed through the vector index".to_string(),
        )),
    }
}

fn limit_of(query: &Query) -> usize {
    query.limit.unwrap_or(DEFAULT_QUERY_LIMIT)
}

/// Append the shared filter clauses. `with_content` controls whether the
/// `content` field acts as a substring filter (it is the match text in
/// keyword mode).
fn push_filters(query: &Query, with_content: bool, sql: &mut String, params: &mut Vec<SqlParam>) {
    if let Some(ref namespace) = query.namespace {
        sql.push_str(" AND e.namespace = ?");
        params.push(Box::new(namespace.clone()));
    }
    if let Some(memory_type) = query.memory_type {
        sql.push_str(" AND e.entry_type = ?");
        params.push(Box::new(memory_type.as_str().to_string()));
    }
    for tag in &query.tags {
        sql.push_str(" AND EXISTS (SELECT 1 FROM json_each(e.tags) WHERE json_each.value = ?)");
        params.push(Box::new(tag.clone()));
    }
    if let Some(before) = query.created_before {
        sql.push_str(" AND e.created_at < ?");
        params.push(Box::new(before));
    }
    if let Some(after) = query.created_after {
        sql.push_str(" AND e.created_at > ?");
        params.push(Box::new(after));
    }
    if with_content {
        if let Some(ref content) = query.content {
            sql.push_str(" AND e.content LIKE '%' || ? || '%'");
            params.push(Box::new(content.clone()));
        }
    }
}

fn collect(conn: &Connection, sql: &str, params: Vec<SqlParam>) -> Result<Vec<Entry>> {
    let mut stmt = conn.prepare(sql)?;
    let entries = stmt
        .query_map(
            params_from_iter(params.iter().map(|p| p.as_ref())),
            entry_from_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

fn run_exact(conn: &Connection, query: &Query) -> Result<Vec<Entry>> {
    let key = query
        .key
        .as_ref()
        .ok_or_else(|| MnemoError::Validation("exact query requires key".to_string()))?;

    let mut sql = format!("SELECT {} FROM entries e WHERE e.key = ?", ENTRY_COLUMNS);
    let mut params: Vec<SqlParam> = vec![Box::new(key.clone())];
    push_filters(query, true, &mut sql, &mut params);
    sql.push_str(" ORDER BY e.updated_at DESC, e.id ASC LIMIT ?");
    params.push(Box::new(limit_of(query) as i64));
    collect(conn, &sql, params)
}

fn run_prefix(conn: &Connection, query: &Query) -> Result<Vec<Entry>> {
    let prefix = query
        .key_prefix
        .as_ref()
        .or(query.key.as_ref())
        .ok_or_else(|| MnemoError::Validation("prefix query requires keyPrefix".to_string()))?;

    let mut sql = format!(
        "SELECT {} FROM entries e WHERE e.key LIKE ? || '%'",
        ENTRY_COLUMNS
    );
    let mut params: Vec<SqlParam> = vec![Box::new(prefix.clone())];
    push_filters(query, true, &mut sql, &mut params);
    sql.push_str(" ORDER BY e.updated_at DESC, e.id ASC LIMIT ?");
    params.push(Box::new(limit_of(query) as i64));
    collect(conn, &sql, params)
}

fn run_keyword(conn: &Connection, query: &Query) -> Result<Vec<Entry>> {
    let content = query
        .content
        .as_ref()
        .ok_or_else(|| MnemoError::Validation("keyword query requires content".to_string()))?;

    let mut sql = format!(
        "SELECT {cols}, bm25(entries_fts) AS score
         FROM entries_fts JOIN entries e ON e.id = entries_fts.id
         WHERE entries_fts MATCH ?",
        cols = entry_cols_aliased()
    );
    let mut params: Vec<SqlParam> = vec![Box::new(escape_fts5_query(content))];
    push_filters(query, false, &mut sql, &mut params);
    sql.push_str(" ORDER BY bm25(entries_fts), e.updated_at DESC, e.id ASC LIMIT ?");
    params.push(Box::new(limit_of(query) as i64));
    collect(conn, &sql, params)
}

/// Keyword matches first (bm25 order), then the remaining filter matches,
/// deduped by id and truncated to the limit.
fn run_hybrid(conn: &Connection, query: &Query) -> Result<Vec<Entry>> {
    let limit = limit_of(query);
    let mut merged: Vec<Entry> = Vec::new();

    if query.content.is_some() {
        let keyword = Query {
            query_type: QueryType::Keyword,
            limit: Some(limit),
            ..query.clone()
        };
        merged.extend(run_keyword(conn, &keyword)?);
    }

    let mut sql = format!("SELECT {} FROM entries e WHERE 1=1", ENTRY_COLUMNS);
    let mut params: Vec<SqlParam> = Vec::new();
    push_filters(query, false, &mut sql, &mut params);
    sql.push_str(" ORDER BY e.updated_at DESC, e.id ASC LIMIT ?");
    params.push(Box::new(limit as i64));
    let listed = collect(conn, &sql, params)?;

    for entry in listed {
        if !merged.iter().any(|m| m.id == entry.id) {
            merged.push(entry);
        }
    }
    merged.truncate(limit);
    Ok(merged)
}

fn entry_cols_aliased() -> String {
    ENTRY_COLUMNS
        .split(", ")
        .map(|col| format!("e.{}", col.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Quote each token so FTS5 operators in user text stay literal
pub fn escape_fts5_query(raw: &str) -> String {
    raw.split_whitespace()
        .map(|token| format!("\"{}\"", token.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FtsTokenizer;
    use crate::storage::migrations::run_migrations;
    use crate::storage::queries::upsert_entry;
    use crate::types::{EntryType, now_millis};
    use std::collections::HashMap;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn, &FtsTokenizer::Unicode61).unwrap();
        conn
    }

    fn seed(conn: &Connection, id: &str, namespace: &str, key: &str, content: &str, tags: &[&str]) {
        let now = now_millis();
        let entry = Entry {
            id: id.to_string(),
            key: key.to_string(),
            content: content.to_string(),
            entry_type: EntryType::Semantic,
            namespace: namespace.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            metadata: HashMap::new(),
            embedding: None,
            access_level: "private".to_string(),
            created_at: now,
            updated_at: now,
            last_accessed_at: now,
            version: 1,
            access_count: 0,
            references: vec![],
        };
        upsert_entry(conn, &entry).unwrap();
    }

    #[test]
    fn exact_match() {
        let conn = conn();
        seed(&conn, "e1", "ns", "auth", "JWT handling", &[]);
        seed(&conn, "e2", "ns", "authz", "roles", &[]);

        let query = Query {
            query_type: QueryType::Exact,
            key: Some("auth".to_string()),
            ..Default::default()
        };
        let results = run_query(&conn, &query).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "e1");
    }

    #[test]
    fn exact_requires_key() {
        let conn = conn();
        let query = Query {
            query_type: QueryType::Exact,
            ..Default::default()
        };
        assert!(run_query(&conn, &query).is_err());
    }

    #[test]
    fn prefix_match() {
        let conn = conn();
        seed(&conn, "e1", "ns", "auth/jwt", "a", &[]);
        seed(&conn, "e2", "ns", "auth/oauth", "b", &[]);
        seed(&conn, "e3", "ns", "db/pool", "c", &[]);

        let query = Query {
            query_type: QueryType::Prefix,
            key_prefix: Some("auth/".to_string()),
            ..Default::default()
        };
        let results = run_query(&conn, &query).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn keyword_search_ranks() {
        let conn = conn();
        seed(&conn, "e1", "patterns", "auth", "JWT with refresh tokens", &["auth"]);
        seed(&conn, "e2", "patterns", "db", "connection pooling", &[]);

        let query = Query {
            query_type: QueryType::Keyword,
            content: Some("JWT".to_string()),
            namespace: Some("patterns".to_string()),
            ..Default::default()
        };
        let results = run_query(&conn, &query).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "e1");
    }

    #[test]
    fn keyword_matches_key_and_tags() {
        let conn = conn();
        seed(&conn, "e1", "ns", "kubernetes", "orchestration notes", &[]);
        seed(&conn, "e2", "ns", "other", "unrelated", &["kubernetes"]);

        let query = Query {
            query_type: QueryType::Keyword,
            content: Some("kubernetes".to_string()),
            ..Default::default()
        };
        let results = run_query(&conn, &query).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn tags_filter_requires_all() {
        let conn = conn();
        seed(&conn, "e1", "ns", "k1", "x", &["a", "b"]);
        seed(&conn, "e2", "ns", "k2", "x", &["a"]);

        let query = Query {
            query_type: QueryType::Hybrid,
            tags: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        };
        let results = run_query(&conn, &query).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "e1");
    }

    #[test]
    fn created_range_filters() {
        let conn = conn();
        seed(&conn, "e1", "ns", "k1", "x", &[]);
        conn.execute("UPDATE entries SET created_at = 100 WHERE id = 'e1'", [])
            .unwrap();
        seed(&conn, "e2", "ns", "k2", "x", &[]);
        conn.execute("UPDATE entries SET created_at = 200 WHERE id = 'e2'", [])
            .unwrap();

        let query = Query {
            query_type: QueryType::Hybrid,
            created_after: Some(150),
            ..Default::default()
        };
        let results = run_query(&conn, &query).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "e2");
    }

    #[test]
    fn hybrid_dedupes_by_id() {
        let conn = conn();
        seed(&conn, "e1", "ns", "auth", "JWT tokens", &[]);
        seed(&conn, "e2", "ns", "other", "plain", &[]);

        let query = Query {
            query_type: QueryType::Hybrid,
            content: Some("JWT".to_string()),
            namespace: Some("ns".to_string()),
            ..Default::default()
        };
        let results = run_query(&conn, &query).unwrap();
        let ids: Vec<&str> = results.iter().map(|e| e.id.as_str()).collect();
        // Keyword hit first, then the rest of the namespace; no duplicates.
        assert_eq!(ids[0], "e1");
        assert_eq!(ids.iter().filter(|id| **id == "e1").count(), 1);
        assert!(ids.contains(&"e2"));
    }

    #[test]
    fn limit_defaults_to_ten() {
        let conn = conn();
        for i in 0..15 {
            seed(&conn, &format!("e{}", i), "ns", &format!("k{}", i), "x", &[]);
        }
        let query = Query {
            query_type: QueryType::Hybrid,
            ..Default::default()
        };
        assert_eq!(run_query(&conn, &query).unwrap().len(), DEFAULT_QUERY_LIMIT);
    }

    #[test]
    fn fts5_escaping_quotes_tokens() {
        assert_eq!(escape_fts5_query("hello world"), "\"hello\" \"world\"");
        assert_eq!(escape_fts5_query("a\"b"), "\"a\"\"b\"");
        assert_eq!(escape_fts5_query("NEAR(x)"), "\"NEAR(x)\"");
    }
}
