//! Observation classification and deterministic titles
//!
//! Maps tool names onto observation kinds, synthesizes title templates
//! when no enrichment is available, extracts file paths from tool inputs,
//! and truncates serialized responses to the byte cap.

use serde_json::Value;

use crate::types::ObservationKind;

/// Marker appended when a response was cut at the byte cap
pub const TRUNCATION_MARKER: &str = "...[truncated]";

/// Host-internal tools that never become observations
pub const INTERNAL_TOOLS: &[&str] = &[
    "TodoWrite",
    "TodoRead",
    "AskFollowupQuestion",
    "AttemptCompletion",
];

pub fn is_internal_tool(tool_name: &str) -> bool {
    INTERNAL_TOOLS.contains(&tool_name)
}

/// Kind from the tool name; anything unlisted is `Other`
pub fn classify_tool(tool_name: &str) -> ObservationKind {
    match tool_name {
        "Read" | "Glob" | "Grep" | "LS" => ObservationKind::Read,
        "Write" | "Edit" | "NotebookEdit" => ObservationKind::Write,
        "Bash" | "Task" | "Skill" => ObservationKind::Execute,
        "WebSearch" | "WebFetch" => ObservationKind::Search,
        _ => ObservationKind::Other,
    }
}

fn input_str<'a>(input: Option<&'a Value>, keys: &[&str]) -> Option<&'a str> {
    let input = input?;
    keys.iter()
        .find_map(|key| input.get(key).and_then(Value::as_str))
}

/// Truncate to `max` characters, appending an ellipsis when cut
fn clip_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{}…", head)
    }
}

/// Deterministic title for a tool invocation
pub fn title_for(tool_name: &str, input: Option<&Value>) -> String {
    match tool_name {
        "Read" => format!("Read {}", input_str(input, &["file_path", "path"]).unwrap_or("file")),
        "Write" => format!("Write {}", input_str(input, &["file_path", "path"]).unwrap_or("file")),
        "Edit" => format!("Edit {}", input_str(input, &["file_path", "path"]).unwrap_or("file")),
        "Bash" => format!(
            "Run: {}",
            clip_chars(input_str(input, &["command"]).unwrap_or(""), 50)
        ),
        "Glob" => format!("Find {}", input_str(input, &["pattern"]).unwrap_or("")),
        "Grep" => format!("Search \"{}\"", input_str(input, &["pattern"]).unwrap_or("")),
        "Task" => format!(
            "Task: {}",
            input_str(input, &["description", "prompt"]).unwrap_or("agent")
        ),
        "WebSearch" => format!("Search: {}", input_str(input, &["query"]).unwrap_or("")),
        "WebFetch" => format!("Fetch: {}", input_str(input, &["url"]).unwrap_or("")),
        other => other.to_string(),
    }
}

/// File paths carried by read- and write-class tool inputs. Best-effort;
/// anything unexpected yields an empty list.
pub fn extract_file_paths(kind: ObservationKind, input: Option<&Value>) -> Vec<String> {
    if !matches!(kind, ObservationKind::Read | ObservationKind::Write) {
        return Vec::new();
    }
    input_str(input, &["file_path", "path"])
        .map(|path| vec![path.to_string()])
        .unwrap_or_default()
}

/// Serialize a tool payload to a compact string
pub fn serialize_payload(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Cut a serialized response at `cap` bytes on a char boundary and append
/// the truncation marker when anything was removed.
pub fn truncate_response(serialized: &str, cap: usize) -> String {
    if serialized.len() <= cap {
        return serialized.to_string();
    }
    let mut cut = cap;
    while cut > 0 && !serialized.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &serialized[..cut], TRUNCATION_MARKER)
}
