//! Schema creation and additive migrations
//!
//! Migration is purely additive: the base DDL creates the current schema,
//! and every later column arrives through an `ALTER TABLE ADD COLUMN`
//! guarded by a `PRAGMA table_info` probe. Columns are never dropped.
//! The FTS table is derived data; a tokenizer change rebuilds it from the
//! canonical entry rows.

use rusqlite::{params, Connection};

use crate::config::FtsTokenizer;
use crate::error::{MnemoError, Result};

/// Run all migrations, including FTS setup for `tokenizer`
pub fn run_migrations(conn: &Connection, tokenizer: &FtsTokenizer) -> Result<()> {
    create_base_schema(conn)?;
    apply_additive_columns(conn)?;
    ensure_fts(conn, tokenizer)?;
    Ok(())
}

fn create_base_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS entries (
            id TEXT PRIMARY KEY,
            key TEXT NOT NULL,
            content TEXT NOT NULL,
            entry_type TEXT NOT NULL DEFAULT 'semantic',
            namespace TEXT NOT NULL,
            tags TEXT NOT NULL DEFAULT '[]',
            metadata TEXT NOT NULL DEFAULT '{}',
            embedding BLOB,
            access_level TEXT NOT NULL DEFAULT 'private',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            last_accessed_at INTEGER NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            access_count INTEGER NOT NULL DEFAULT 0,
            refs TEXT NOT NULL DEFAULT '[]',
            UNIQUE(namespace, key)
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL UNIQUE,
            project TEXT NOT NULL,
            prompt TEXT,
            started_at INTEGER NOT NULL,
            ended_at INTEGER,
            observation_count INTEGER NOT NULL DEFAULT 0,
            summary TEXT,
            status TEXT NOT NULL DEFAULT 'active'
        );

        CREATE TABLE IF NOT EXISTS user_prompts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            prompt_number INTEGER NOT NULL,
            prompt_text TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(session_id, prompt_number)
        );

        CREATE TABLE IF NOT EXISTS observations (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            project TEXT NOT NULL,
            tool_name TEXT NOT NULL,
            tool_input TEXT NOT NULL DEFAULT '',
            tool_response TEXT NOT NULL DEFAULT '',
            cwd TEXT NOT NULL DEFAULT '',
            timestamp INTEGER NOT NULL,
            kind TEXT NOT NULL DEFAULT 'other',
            title TEXT NOT NULL DEFAULT '',
            subtitle TEXT NOT NULL DEFAULT '',
            narrative TEXT NOT NULL DEFAULT '',
            files_read TEXT NOT NULL DEFAULT '[]',
            files_modified TEXT NOT NULL DEFAULT '[]',
            facts TEXT NOT NULL DEFAULT '[]',
            concepts TEXT NOT NULL DEFAULT '[]',
            prompt_number INTEGER
        );

        CREATE TABLE IF NOT EXISTS session_summaries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            project TEXT NOT NULL,
            request TEXT NOT NULL DEFAULT '',
            completed TEXT NOT NULL DEFAULT '',
            files_read TEXT NOT NULL DEFAULT '[]',
            files_modified TEXT NOT NULL DEFAULT '[]',
            next_steps TEXT NOT NULL DEFAULT '[]',
            notes TEXT NOT NULL DEFAULT '[]',
            prompt_number INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_entries_namespace ON entries(namespace);
        CREATE INDEX IF NOT EXISTS idx_entries_ns_key ON entries(namespace, key);
        CREATE INDEX IF NOT EXISTS idx_entries_type ON entries(entry_type);
        CREATE INDEX IF NOT EXISTS idx_entries_created ON entries(created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_entries_accessed ON entries(last_accessed_at DESC);

        CREATE INDEX IF NOT EXISTS idx_sessions_project ON sessions(project);
        CREATE INDEX IF NOT EXISTS idx_prompts_session ON user_prompts(session_id);
        CREATE INDEX IF NOT EXISTS idx_observations_session ON observations(session_id);
        CREATE INDEX IF NOT EXISTS idx_observations_project ON observations(project);
        CREATE INDEX IF NOT EXISTS idx_summaries_session ON session_summaries(session_id);
        CREATE INDEX IF NOT EXISTS idx_summaries_project ON session_summaries(project);
        "#,
    )?;
    Ok(())
}

/// Columns added after the base schema shipped. Each entry is probed so
/// databases created by any prior version upgrade in place.
const ADDITIVE_COLUMNS: &[(&str, &str, &str)] = &[
    (
        "entries",
        "access_level",
        "ALTER TABLE entries ADD COLUMN access_level TEXT NOT NULL DEFAULT 'private'",
    ),
    (
        "entries",
        "refs",
        "ALTER TABLE entries ADD COLUMN refs TEXT NOT NULL DEFAULT '[]'",
    ),
    (
        "observations",
        "prompt_number",
        "ALTER TABLE observations ADD COLUMN prompt_number INTEGER",
    ),
    (
        "observations",
        "concepts",
        "ALTER TABLE observations ADD COLUMN concepts TEXT NOT NULL DEFAULT '[]'",
    ),
    (
        "sessions",
        "summary",
        "ALTER TABLE sessions ADD COLUMN summary TEXT",
    ),
];

fn apply_additive_columns(conn: &Connection) -> Result<()> {
    for (table, column, ddl) in ADDITIVE_COLUMNS {
        if !column_exists(conn, table, column)? {
            tracing::info!(table, column, "adding column");
            conn.execute(ddl, [])?;
        }
    }
    Ok(())
}

/// Probe for a column via `PRAGMA table_info`
pub fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    if !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(MnemoError::Validation(format!(
            "invalid table name: {}",
            table
        )));
    }
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Create the FTS table for `tokenizer`, rebuilding when the stored
/// tokenizer differs from the requested one.
fn ensure_fts(conn: &Connection, tokenizer: &FtsTokenizer) -> Result<()> {
    let active: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'fts_tokenizer'",
            [],
            |row| row.get(0),
        )
        .ok();

    let wanted = tokenizer.sql();
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'entries_fts'",
        [],
        |row| row.get::<_, i64>(0).map(|n| n > 0),
    )?;

    if exists && active.as_deref() == Some(wanted.as_str()) {
        return Ok(());
    }

    if exists {
        tracing::info!(from = ?active, to = %wanted, "tokenizer changed; rebuilding FTS table");
        conn.execute("DROP TABLE entries_fts", [])?;
    }
    create_fts_table(conn, tokenizer)?;
    repopulate_fts(conn)?;
    conn.execute(
        "INSERT INTO meta (key, value) VALUES ('fts_tokenizer', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![wanted],
    )?;
    Ok(())
}

pub fn create_fts_table(conn: &Connection, tokenizer: &FtsTokenizer) -> Result<()> {
    // Tokenizer strings come from config, not user input, but keep the
    // quoting strict anyway.
    let tokenize = tokenizer.sql().replace('\'', "''");
    conn.execute_batch(&format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS entries_fts USING fts5(
            id UNINDEXED,
            content,
            key,
            tags,
            tokenize='{}'
        )",
        tokenize
    ))?;
    Ok(())
}

/// Refill the FTS table from the canonical entry rows. Tags are indexed
/// as space-joined terms, matching the write path.
pub fn repopulate_fts(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM entries_fts", [])?;
    let mut stmt = conn.prepare("SELECT id, content, key, tags FROM entries")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for (id, content, key, tags_json) in rows {
        let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();
        conn.execute(
            "INSERT INTO entries_fts (id, content, key, tags) VALUES (?1, ?2, ?3, ?4)",
            params![id, content, key, tags.join(" ")],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn, &FtsTokenizer::Unicode61).unwrap();
        conn
    }

    #[test]
    fn migrations_are_idempotent() {
        let conn = fresh();
        run_migrations(&conn, &FtsTokenizer::Unicode61).unwrap();
        run_migrations(&conn, &FtsTokenizer::Unicode61).unwrap();
    }

    #[test]
    fn column_probe() {
        let conn = fresh();
        assert!(column_exists(&conn, "entries", "access_level").unwrap());
        assert!(!column_exists(&conn, "entries", "bogus").unwrap());
        assert!(column_exists(&conn, "entries", "refs").unwrap());
    }

    #[test]
    fn probe_rejects_bad_table_name() {
        let conn = fresh();
        assert!(column_exists(&conn, "entries; DROP TABLE entries", "id").is_err());
    }

    #[test]
    fn additive_migration_upgrades_old_schema() {
        let conn = Connection::open_in_memory().unwrap();
        // A database created before access_level and refs existed.
        conn.execute_batch(
            "CREATE TABLE entries (
                id TEXT PRIMARY KEY,
                key TEXT NOT NULL,
                content TEXT NOT NULL,
                entry_type TEXT NOT NULL DEFAULT 'semantic',
                namespace TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '[]',
                metadata TEXT NOT NULL DEFAULT '{}',
                embedding BLOB,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                last_accessed_at INTEGER NOT NULL,
                version INTEGER NOT NULL DEFAULT 1,
                access_count INTEGER NOT NULL DEFAULT 0,
                UNIQUE(namespace, key)
            )",
        )
        .unwrap();

        run_migrations(&conn, &FtsTokenizer::Unicode61).unwrap();
        assert!(column_exists(&conn, "entries", "access_level").unwrap());
        assert!(column_exists(&conn, "entries", "refs").unwrap());
    }

    #[test]
    fn tokenizer_change_rebuilds_fts() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn, &FtsTokenizer::Unicode61).unwrap();
        conn.execute(
            "INSERT INTO entries (id, key, content, namespace, created_at, updated_at, last_accessed_at)
             VALUES ('e1', 'k', 'searchable text', 'ns', 0, 0, 0)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO entries_fts (id, content, key, tags) VALUES ('e1', 'searchable text', 'k', '[]')",
            [],
        )
        .unwrap();

        run_migrations(&conn, &FtsTokenizer::Trigram).unwrap();

        // Repopulated from the canonical rows under the new tokenizer.
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM entries_fts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
        let stored: String = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'fts_tokenizer'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(stored, "trigram");
    }
}
