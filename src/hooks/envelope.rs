//! Hook envelope parsing and normalization
//!
//! The host delivers one JSON envelope per invocation. Parsing never
//! fails: malformed JSON degrades to a synthesized record carrying only a
//! session id, working directory, project, and timestamp.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::now_millis;

/// Raw wire envelope as emitted by the host
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEnvelope {
    pub session_id: Option<String>,
    pub cwd: Option<String>,
    pub prompt: Option<String>,
    pub tool_name: Option<String>,
    pub tool_input: Option<serde_json::Value>,
    pub tool_result: Option<serde_json::Value>,
    pub transcript_path: Option<String>,
    pub stop_reason: Option<String>,
}

/// Normalized hook input consumed by the pipeline
#[derive(Debug, Clone)]
pub struct HookInput {
    pub session_id: String,
    pub cwd: String,
    pub project: String,
    pub prompt: Option<String>,
    pub tool_name: Option<String>,
    pub tool_input: Option<serde_json::Value>,
    pub tool_response: Option<serde_json::Value>,
    pub transcript_path: Option<String>,
    pub stop_reason: Option<String>,
    pub timestamp: i64,
}

impl HookInput {
    /// Parse and normalize a serialized envelope. Never errors.
    pub fn from_json(raw: &str) -> Self {
        let envelope: RawEnvelope = serde_json::from_str(raw).unwrap_or_else(|err| {
            tracing::warn!(%err, "malformed hook envelope; degrading");
            RawEnvelope::default()
        });
        Self::from_envelope(envelope)
    }

    pub fn from_envelope(envelope: RawEnvelope) -> Self {
        let cwd = envelope
            .cwd
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| {
                std::env::current_dir()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });
        let project = project_from_cwd(&cwd);
        Self {
            session_id: envelope
                .session_id
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            cwd,
            project,
            prompt: envelope.prompt,
            tool_name: envelope.tool_name,
            tool_input: envelope.tool_input,
            tool_response: envelope.tool_result,
            transcript_path: envelope.transcript_path,
            stop_reason: envelope.stop_reason,
            timestamp: now_millis(),
        }
    }
}

/// Last path segment of `cwd`; "unknown" when the path is empty or ends
/// with a separator.
pub fn project_from_cwd(cwd: &str) -> String {
    if cwd.is_empty() || cwd.ends_with('/') || cwd.ends_with('\\') {
        return "unknown".to_string();
    }
    cwd.rsplit(['/', '\\'])
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

/// Hook-specific payload inside the response envelope
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookSpecificOutput {
    pub hook_event_name: String,
    pub additional_context: String,
}

/// Response envelope emitted to stdout. `continue` is always true; hook
/// errors never block the host.
#[derive(Debug, Clone, Serialize)]
pub struct HookResponse {
    #[serde(rename = "continue")]
    pub continue_: bool,
    #[serde(rename = "suppressOutput")]
    pub suppress_output: bool,
    #[serde(rename = "hookSpecificOutput", skip_serializing_if = "Option::is_none")]
    pub hook_specific_output: Option<HookSpecificOutput>,
}

impl HookResponse {
    pub fn ok() -> Self {
        Self {
            continue_: true,
            suppress_output: true,
            hook_specific_output: None,
        }
    }

    pub fn with_context(event_name: &str, context: String) -> Self {
        Self {
            continue_: true,
            suppress_output: false,
            hook_specific_output: Some(HookSpecificOutput {
                hook_event_name: event_name.to_string(),
                additional_context: context,
            }),
        }
    }
}
