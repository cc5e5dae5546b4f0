//! SQL queries for all persisted record types

use std::collections::HashMap;

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{MnemoError, Result};
use crate::types::*;

/// Column list shared by every entry SELECT
pub const ENTRY_COLUMNS: &str = "id, key, content, entry_type, namespace, tags, metadata, \
     embedding, access_level, created_at, updated_at, last_accessed_at, \
     version, access_count, refs";

/// Encode an embedding as a little-endian f32 byte blob
pub fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Decode a little-endian f32 byte blob
pub fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Parse an entry from a row selected with [`ENTRY_COLUMNS`]
pub fn entry_from_row(row: &Row) -> rusqlite::Result<Entry> {
    let tags_json: String = row.get("tags")?;
    let metadata_json: String = row.get("metadata")?;
    let refs_json: String = row.get("refs")?;
    let entry_type_str: String = row.get("entry_type")?;
    let embedding_blob: Option<Vec<u8>> = row.get("embedding")?;

    Ok(Entry {
        id: row.get("id")?,
        key: row.get("key")?,
        content: row.get("content")?,
        entry_type: entry_type_str.parse().unwrap_or_default(),
        namespace: row.get("namespace")?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
        embedding: embedding_blob.map(|blob| blob_to_embedding(&blob)),
        access_level: row.get("access_level")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        last_accessed_at: row.get("last_accessed_at")?,
        version: row.get("version")?,
        access_count: row.get("access_count")?,
        references: serde_json::from_str(&refs_json).unwrap_or_default(),
    })
}

/// Id of an entry occupying (namespace, key), if any
pub fn find_by_namespace_key(conn: &Connection, namespace: &str, key: &str) -> Result<Option<String>> {
    let id = conn
        .query_row(
            "SELECT id FROM entries WHERE namespace = ?1 AND key = ?2",
            params![namespace, key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Insert or replace the entry row and its FTS row
pub fn upsert_entry(conn: &Connection, entry: &Entry) -> Result<()> {
    let tags_json = serde_json::to_string(&entry.tags)?;
    let metadata_json = serde_json::to_string(&entry.metadata)?;
    let refs_json = serde_json::to_string(&entry.references)?;
    let embedding_blob = entry.embedding.as_ref().map(|e| embedding_to_blob(e));

    conn.execute(
        "INSERT INTO entries (id, key, content, entry_type, namespace, tags, metadata,
                              embedding, access_level, created_at, updated_at,
                              last_accessed_at, version, access_count, refs)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
         ON CONFLICT(id) DO UPDATE SET
            key = excluded.key,
            content = excluded.content,
            entry_type = excluded.entry_type,
            namespace = excluded.namespace,
            tags = excluded.tags,
            metadata = excluded.metadata,
            embedding = excluded.embedding,
            access_level = excluded.access_level,
            updated_at = excluded.updated_at,
            last_accessed_at = excluded.last_accessed_at,
            version = excluded.version,
            access_count = excluded.access_count,
            refs = excluded.refs",
        params![
            entry.id,
            entry.key,
            entry.content,
            entry.entry_type.as_str(),
            entry.namespace,
            tags_json,
            metadata_json,
            embedding_blob,
            entry.access_level,
            entry.created_at,
            entry.updated_at,
            entry.last_accessed_at,
            entry.version,
            entry.access_count,
            refs_json,
        ],
    )?;

    update_fts_row(conn, entry)?;
    Ok(())
}

/// Replace the FTS row for an entry
pub fn update_fts_row(conn: &Connection, entry: &Entry) -> Result<()> {
    conn.execute(
        "DELETE FROM entries_fts WHERE id = ?1",
        params![entry.id],
    )?;
    conn.execute(
        "INSERT INTO entries_fts (id, content, key, tags) VALUES (?1, ?2, ?3, ?4)",
        params![entry.id, entry.content, entry.key, entry.tags.join(" ")],
    )?;
    Ok(())
}

/// Fetch by id and record the access
pub fn get_entry(conn: &Connection, id: &str, track_access: bool) -> Result<Option<Entry>> {
    let sql = format!("SELECT {} FROM entries WHERE id = ?1", ENTRY_COLUMNS);
    let mut stmt = conn.prepare_cached(&sql)?;
    let mut entry = stmt.query_row(params![id], entry_from_row).optional()?;
    if let Some(ref mut entry) = entry {
        if track_access {
            touch_entry(conn, entry)?;
        }
    }
    Ok(entry)
}

/// Fetch by the unique (namespace, key) pair and record the access
pub fn get_entry_by_key(
    conn: &Connection,
    namespace: &str,
    key: &str,
    track_access: bool,
) -> Result<Option<Entry>> {
    let sql = format!(
        "SELECT {} FROM entries WHERE namespace = ?1 AND key = ?2",
        ENTRY_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let mut entry = stmt
        .query_row(params![namespace, key], entry_from_row)
        .optional()?;
    if let Some(ref mut entry) = entry {
        if track_access {
            touch_entry(conn, entry)?;
        }
    }
    Ok(entry)
}

fn touch_entry(conn: &Connection, entry: &mut Entry) -> Result<()> {
    let now = now_millis();
    conn.execute(
        "UPDATE entries SET access_count = access_count + 1, last_accessed_at = ?1 WHERE id = ?2",
        params![now, entry.id],
    )?;
    entry.access_count += 1;
    entry.last_accessed_at = now;
    Ok(())
}

/// Delete the entry and its FTS row; returns whether a row was removed
pub fn delete_entry(conn: &Connection, id: &str) -> Result<bool> {
    conn.execute("DELETE FROM entries_fts WHERE id = ?1", params![id])?;
    let removed = conn.execute("DELETE FROM entries WHERE id = ?1", params![id])?;
    Ok(removed > 0)
}

pub fn count_entries(conn: &Connection, namespace: Option<&str>) -> Result<i64> {
    let count = match namespace {
        Some(ns) => conn.query_row(
            "SELECT COUNT(*) FROM entries WHERE namespace = ?1",
            params![ns],
            |row| row.get(0),
        )?,
        None => conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?,
    };
    Ok(count)
}

pub fn list_namespaces(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached("SELECT DISTINCT namespace FROM entries ORDER BY namespace")?;
    let namespaces = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(namespaces)
}

/// Remove every entry in a namespace; returns the deleted ids
pub fn clear_namespace(conn: &Connection, namespace: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached("SELECT id FROM entries WHERE namespace = ?1")?;
    let ids = stmt
        .query_map(params![namespace], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    for id in &ids {
        delete_entry(conn, id)?;
    }
    Ok(ids)
}

/// All (id, embedding) pairs, for index rebuilds on startup
pub fn load_embeddings(conn: &Connection) -> Result<Vec<(String, Vec<f32>)>> {
    let mut stmt =
        conn.prepare_cached("SELECT id, embedding FROM entries WHERE embedding IS NOT NULL")?;
    let pairs = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            Ok((id, blob_to_embedding(&blob)))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(pairs)
}

pub fn entry_stats(conn: &Connection) -> Result<StoreStats> {
    let total_entries: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;

    let mut entries_by_namespace = HashMap::new();
    let mut stmt =
        conn.prepare_cached("SELECT namespace, COUNT(*) FROM entries GROUP BY namespace")?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        entries_by_namespace.insert(row.get::<_, String>(0)?, row.get::<_, i64>(1)?);
    }

    let mut entries_by_type = HashMap::new();
    let mut stmt =
        conn.prepare_cached("SELECT entry_type, COUNT(*) FROM entries GROUP BY entry_type")?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        entries_by_type.insert(row.get::<_, String>(0)?, row.get::<_, i64>(1)?);
    }

    Ok(StoreStats {
        total_entries,
        entries_by_namespace,
        entries_by_type,
        memory_usage: 0,
    })
}

// ---------------------------------------------------------------------------
// Sessions

fn session_from_row(row: &Row) -> rusqlite::Result<Session> {
    let status: String = row.get("status")?;
    Ok(Session {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        project: row.get("project")?,
        prompt: row.get("prompt")?,
        started_at: row.get("started_at")?,
        ended_at: row.get("ended_at")?,
        observation_count: row.get("observation_count")?,
        summary: row.get("summary")?,
        status: status.parse().unwrap_or_default(),
    })
}

const SESSION_COLUMNS: &str =
    "id, session_id, project, prompt, started_at, ended_at, observation_count, summary, status";

/// Create the session if absent; idempotent by `session_id`
pub fn ensure_session(
    conn: &Connection,
    session_id: &str,
    project: &str,
    prompt: Option<&str>,
) -> Result<Session> {
    conn.execute(
        "INSERT INTO sessions (session_id, project, prompt, started_at, status)
         VALUES (?1, ?2, ?3, ?4, 'active')
         ON CONFLICT(session_id) DO NOTHING",
        params![session_id, project, prompt, now_millis()],
    )?;
    get_session(conn, session_id)?
        .ok_or_else(|| MnemoError::Store(format!("session vanished: {}", session_id)))
}

pub fn get_session(conn: &Connection, session_id: &str) -> Result<Option<Session>> {
    let sql = format!(
        "SELECT {} FROM sessions WHERE session_id = ?1",
        SESSION_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let session = stmt
        .query_row(params![session_id], session_from_row)
        .optional()?;
    Ok(session)
}

pub fn end_session(
    conn: &Connection,
    session_id: &str,
    summary: Option<&str>,
    status: SessionStatus,
) -> Result<Option<Session>> {
    conn.execute(
        "UPDATE sessions SET ended_at = ?1, summary = COALESCE(?2, summary), status = ?3
         WHERE session_id = ?4",
        params![now_millis(), summary, status.as_str(), session_id],
    )?;
    get_session(conn, session_id)
}

pub fn recent_sessions(
    conn: &Connection,
    project: Option<&str>,
    limit: usize,
) -> Result<Vec<Session>> {
    let (sql, bind_project) = match project {
        Some(_) => (
            format!(
                "SELECT {} FROM sessions WHERE project = ?1 ORDER BY started_at DESC LIMIT ?2",
                SESSION_COLUMNS
            ),
            true,
        ),
        None => (
            format!(
                "SELECT {} FROM sessions ORDER BY started_at DESC LIMIT ?1",
                SESSION_COLUMNS
            ),
            false,
        ),
    };
    let mut stmt = conn.prepare_cached(&sql)?;
    let sessions = if bind_project {
        stmt.query_map(params![project, limit as i64], session_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?
    } else {
        stmt.query_map(params![limit as i64], session_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?
    };
    Ok(sessions)
}

pub fn bump_observation_count(conn: &Connection, session_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE sessions SET observation_count = observation_count + 1 WHERE session_id = ?1",
        params![session_id],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Prompts

/// Append a prompt with the next dense 1-based number
pub fn insert_prompt(conn: &Connection, session_id: &str, text: &str) -> Result<UserPrompt> {
    let next: i64 = conn.query_row(
        "SELECT COALESCE(MAX(prompt_number), 0) + 1 FROM user_prompts WHERE session_id = ?1",
        params![session_id],
        |row| row.get(0),
    )?;
    let created_at = now_millis();
    conn.execute(
        "INSERT INTO user_prompts (session_id, prompt_number, prompt_text, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![session_id, next, text, created_at],
    )?;
    Ok(UserPrompt {
        session_id: session_id.to_string(),
        prompt_number: next,
        prompt_text: text.to_string(),
        created_at,
    })
}

pub fn list_prompts(conn: &Connection, session_id: &str) -> Result<Vec<UserPrompt>> {
    let mut stmt = conn.prepare_cached(
        "SELECT session_id, prompt_number, prompt_text, created_at
         FROM user_prompts WHERE session_id = ?1 ORDER BY prompt_number ASC",
    )?;
    let prompts = stmt
        .query_map(params![session_id], |row| {
            Ok(UserPrompt {
                session_id: row.get(0)?,
                prompt_number: row.get(1)?,
                prompt_text: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(prompts)
}

pub fn recent_prompts(conn: &Connection, project: &str, limit: usize) -> Result<Vec<UserPrompt>> {
    let mut stmt = conn.prepare_cached(
        "SELECT p.session_id, p.prompt_number, p.prompt_text, p.created_at
         FROM user_prompts p JOIN sessions s ON s.session_id = p.session_id
         WHERE s.project = ?1 ORDER BY p.created_at DESC LIMIT ?2",
    )?;
    let prompts = stmt
        .query_map(params![project, limit as i64], |row| {
            Ok(UserPrompt {
                session_id: row.get(0)?,
                prompt_number: row.get(1)?,
                prompt_text: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(prompts)
}

// ---------------------------------------------------------------------------
// Observations

fn observation_from_row(row: &Row) -> rusqlite::Result<Observation> {
    let kind: String = row.get("kind")?;
    let files_read: String = row.get("files_read")?;
    let files_modified: String = row.get("files_modified")?;
    let facts: String = row.get("facts")?;
    let concepts: String = row.get("concepts")?;
    Ok(Observation {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        project: row.get("project")?,
        tool_name: row.get("tool_name")?,
        tool_input: row.get("tool_input")?,
        tool_response: row.get("tool_response")?,
        cwd: row.get("cwd")?,
        timestamp: row.get("timestamp")?,
        kind: kind.parse().unwrap_or_default(),
        title: row.get("title")?,
        subtitle: row.get("subtitle")?,
        narrative: row.get("narrative")?,
        files_read: serde_json::from_str(&files_read).unwrap_or_default(),
        files_modified: serde_json::from_str(&files_modified).unwrap_or_default(),
        facts: serde_json::from_str(&facts).unwrap_or_default(),
        concepts: serde_json::from_str(&concepts).unwrap_or_default(),
        prompt_number: row.get("prompt_number")?,
    })
}

const OBSERVATION_COLUMNS: &str = "id, session_id, project, tool_name, tool_input, tool_response, \
     cwd, timestamp, kind, title, subtitle, narrative, files_read, files_modified, \
     facts, concepts, prompt_number";

pub fn insert_observation(conn: &Connection, observation: &Observation) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO observations
            (id, session_id, project, tool_name, tool_input, tool_response, cwd,
             timestamp, kind, title, subtitle, narrative, files_read, files_modified,
             facts, concepts, prompt_number)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            observation.id,
            observation.session_id,
            observation.project,
            observation.tool_name,
            observation.tool_input,
            observation.tool_response,
            observation.cwd,
            observation.timestamp,
            observation.kind.as_str(),
            observation.title,
            observation.subtitle,
            observation.narrative,
            serde_json::to_string(&observation.files_read)?,
            serde_json::to_string(&observation.files_modified)?,
            serde_json::to_string(&observation.facts)?,
            serde_json::to_string(&observation.concepts)?,
            observation.prompt_number,
        ],
    )?;
    Ok(())
}

/// Rewrite the enrichment fields of an existing observation. Leaves the
/// session's observation count alone; returns whether a row matched.
pub fn update_observation(conn: &Connection, observation: &Observation) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE observations
         SET subtitle = ?1, narrative = ?2, facts = ?3, concepts = ?4
         WHERE id = ?5",
        params![
            observation.subtitle,
            observation.narrative,
            serde_json::to_string(&observation.facts)?,
            serde_json::to_string(&observation.concepts)?,
            observation.id,
        ],
    )?;
    Ok(updated > 0)
}

pub fn get_observation(conn: &Connection, id: &str) -> Result<Option<Observation>> {
    let sql = format!(
        "SELECT {} FROM observations WHERE id = ?1",
        OBSERVATION_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let observation = stmt.query_row(params![id], observation_from_row).optional()?;
    Ok(observation)
}

/// Observations of one session in call order, ties broken by id
pub fn observations_for_session(conn: &Connection, session_id: &str) -> Result<Vec<Observation>> {
    let sql = format!(
        "SELECT {} FROM observations WHERE session_id = ?1 ORDER BY timestamp ASC, id ASC",
        OBSERVATION_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let observations = stmt
        .query_map(params![session_id], observation_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(observations)
}

pub fn recent_observations(
    conn: &Connection,
    project: &str,
    limit: usize,
) -> Result<Vec<Observation>> {
    let sql = format!(
        "SELECT {} FROM observations WHERE project = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2",
        OBSERVATION_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let observations = stmt
        .query_map(params![project, limit as i64], observation_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(observations)
}

// ---------------------------------------------------------------------------
// Session summaries

pub fn insert_summary(conn: &Connection, summary: &SessionSummary) -> Result<()> {
    conn.execute(
        "INSERT INTO session_summaries
            (session_id, project, request, completed, files_read, files_modified,
             next_steps, notes, prompt_number, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            summary.session_id,
            summary.project,
            summary.request,
            summary.completed,
            serde_json::to_string(&summary.files_read)?,
            serde_json::to_string(&summary.files_modified)?,
            serde_json::to_string(&summary.next_steps)?,
            serde_json::to_string(&summary.notes)?,
            summary.prompt_number,
            summary.created_at,
        ],
    )?;
    Ok(())
}

fn summary_from_row(row: &Row) -> rusqlite::Result<SessionSummary> {
    let files_read: String = row.get("files_read")?;
    let files_modified: String = row.get("files_modified")?;
    let next_steps: String = row.get("next_steps")?;
    let notes: String = row.get("notes")?;
    Ok(SessionSummary {
        session_id: row.get("session_id")?,
        project: row.get("project")?,
        request: row.get("request")?,
        completed: row.get("completed")?,
        files_read: serde_json::from_str(&files_read).unwrap_or_default(),
        files_modified: serde_json::from_str(&files_modified).unwrap_or_default(),
        next_steps: serde_json::from_str(&next_steps).unwrap_or_default(),
        notes: serde_json::from_str(&notes).unwrap_or_default(),
        prompt_number: row.get("prompt_number")?,
        created_at: row.get("created_at")?,
    })
}

const SUMMARY_COLUMNS: &str = "session_id, project, request, completed, files_read, \
     files_modified, next_steps, notes, prompt_number, created_at";

pub fn summaries_for_project(
    conn: &Connection,
    project: &str,
    limit: usize,
) -> Result<Vec<SessionSummary>> {
    let sql = format!(
        "SELECT {} FROM session_summaries WHERE project = ?1 ORDER BY created_at DESC LIMIT ?2",
        SUMMARY_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let summaries = stmt
        .query_map(params![project, limit as i64], summary_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FtsTokenizer;
    use crate::storage::migrations::run_migrations;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn, &FtsTokenizer::Unicode61).unwrap();
        conn
    }

    fn sample_entry(id: &str, namespace: &str, key: &str) -> Entry {
        Entry {
            id: id.to_string(),
            key: key.to_string(),
            content: "content".to_string(),
            entry_type: EntryType::Semantic,
            namespace: namespace.to_string(),
            tags: vec!["a".to_string(), "b".to_string()],
            metadata: HashMap::new(),
            embedding: Some(vec![0.25, -1.5]),
            access_level: "private".to_string(),
            created_at: 100,
            updated_at: 100,
            last_accessed_at: 100,
            version: 1,
            access_count: 0,
            references: vec![],
        }
    }

    #[test]
    fn blob_round_trip() {
        let embedding = vec![0.1f32, -2.5, 1e10, 0.0];
        let blob = embedding_to_blob(&embedding);
        assert_eq!(blob.len(), 16);
        assert_eq!(blob_to_embedding(&blob), embedding);
    }

    #[test]
    fn upsert_and_get() {
        let conn = conn();
        let entry = sample_entry("e1", "ns", "k");
        upsert_entry(&conn, &entry).unwrap();

        let fetched = get_entry(&conn, "e1", false).unwrap().unwrap();
        assert_eq!(fetched.key, "k");
        assert_eq!(fetched.tags, vec!["a", "b"]);
        assert_eq!(fetched.embedding, Some(vec![0.25, -1.5]));
    }

    #[test]
    fn get_tracks_access() {
        let conn = conn();
        upsert_entry(&conn, &sample_entry("e1", "ns", "k")).unwrap();

        let first = get_entry(&conn, "e1", true).unwrap().unwrap();
        assert_eq!(first.access_count, 1);
        let second = get_entry(&conn, "e1", true).unwrap().unwrap();
        assert_eq!(second.access_count, 2);
        assert!(second.last_accessed_at >= first.last_accessed_at);
    }

    #[test]
    fn get_by_key_pair() {
        let conn = conn();
        upsert_entry(&conn, &sample_entry("e1", "ns", "k")).unwrap();
        assert!(get_entry_by_key(&conn, "ns", "k", false).unwrap().is_some());
        assert!(get_entry_by_key(&conn, "other", "k", false).unwrap().is_none());
    }

    #[test]
    fn delete_removes_fts_row() {
        let conn = conn();
        upsert_entry(&conn, &sample_entry("e1", "ns", "k")).unwrap();
        assert!(delete_entry(&conn, "e1").unwrap());
        assert!(!delete_entry(&conn, "e1").unwrap());

        let fts_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM entries_fts WHERE id = 'e1'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(fts_count, 0);
    }

    #[test]
    fn namespace_listing_and_clear() {
        let conn = conn();
        upsert_entry(&conn, &sample_entry("e1", "alpha", "k1")).unwrap();
        upsert_entry(&conn, &sample_entry("e2", "alpha", "k2")).unwrap();
        upsert_entry(&conn, &sample_entry("e3", "beta", "k1")).unwrap();

        assert_eq!(list_namespaces(&conn).unwrap(), vec!["alpha", "beta"]);
        assert_eq!(count_entries(&conn, Some("alpha")).unwrap(), 2);

        let removed = clear_namespace(&conn, "alpha").unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(count_entries(&conn, None).unwrap(), 1);
    }

    #[test]
    fn prompt_numbers_are_dense() {
        let conn = conn();
        ensure_session(&conn, "s1", "proj", None).unwrap();
        for i in 1..=3 {
            let prompt = insert_prompt(&conn, "s1", &format!("prompt {}", i)).unwrap();
            assert_eq!(prompt.prompt_number, i);
        }
        let prompts = list_prompts(&conn, "s1").unwrap();
        let numbers: Vec<i64> = prompts.iter().map(|p| p.prompt_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn ensure_session_is_idempotent() {
        let conn = conn();
        let first = ensure_session(&conn, "s1", "proj", Some("hello")).unwrap();
        let second = ensure_session(&conn, "s1", "proj", Some("ignored")).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.prompt.as_deref(), Some("hello"));
    }
}
