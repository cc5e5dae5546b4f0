//! Session summary generation
//!
//! Folds a session's prompts and observations into one structured
//! `SessionSummary` plus a one-line text rendition for the session row.

use serde_json::Value;

use crate::types::{now_millis, Observation, ObservationKind, SessionSummary, UserPrompt};

/// Per-prompt cap when folding into the request line
const PROMPT_SNIPPET_CHARS: usize = 200;
/// Total cap of the folded request line
const REQUEST_CHARS: usize = 500;
/// Cap on unique file paths per list
const FILE_LIST_CAP: usize = 20;
/// Cap on command notes
const COMMAND_NOTES_CAP: usize = 5;
/// Per-command cap inside notes
const COMMAND_CHARS: usize = 80;

fn clip_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// `[#1] first prompt → [#2] second …`, each prompt clipped, whole line
/// capped at 500 chars.
fn fold_request(prompts: &[UserPrompt]) -> String {
    let joined = prompts
        .iter()
        .map(|prompt| {
            format!(
                "[#{}] {}",
                prompt.prompt_number,
                clip_chars(prompt.prompt_text.trim(), PROMPT_SNIPPET_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join(" → ");
    clip_chars(&joined, REQUEST_CHARS)
}

/// `"3 file(s) modified, 5 file(s) read, 2 command(s) executed, 1 search(es)"`
fn format_completed(observations: &[Observation]) -> String {
    let count = |kind: ObservationKind| observations.iter().filter(|o| o.kind == kind).count();
    let writes = count(ObservationKind::Write);
    let reads = count(ObservationKind::Read);
    let executes = count(ObservationKind::Execute);
    let searches = count(ObservationKind::Search);
    let others = count(ObservationKind::Other);

    let mut parts = Vec::new();
    if writes > 0 {
        parts.push(format!("{} file(s) modified", writes));
    }
    if reads > 0 {
        parts.push(format!("{} file(s) read", reads));
    }
    if executes > 0 {
        parts.push(format!("{} command(s) executed", executes));
    }
    if searches > 0 {
        parts.push(format!("{} search(es)", searches));
    }
    if others > 0 {
        parts.push(format!("{} other action(s)", others));
    }
    if parts.is_empty() {
        "no recorded activity".to_string()
    } else {
        parts.join(", ")
    }
}

fn unique_capped(paths: impl Iterator<Item = String>, cap: usize) -> Vec<String> {
    let mut seen = Vec::new();
    for path in paths {
        if seen.len() >= cap {
            break;
        }
        if !seen.contains(&path) {
            seen.push(path);
        }
    }
    seen
}

/// Up to five Bash commands, each clipped to 80 chars
fn collect_commands(observations: &[Observation]) -> Vec<String> {
    let mut commands = Vec::new();
    for observation in observations {
        if commands.len() >= COMMAND_NOTES_CAP {
            break;
        }
        if observation.kind != ObservationKind::Execute {
            continue;
        }
        let parsed: Option<Value> = serde_json::from_str(&observation.tool_input).ok();
        if let Some(command) = parsed
            .as_ref()
            .and_then(|v| v.get("command"))
            .and_then(Value::as_str)
        {
            commands.push(clip_chars(command, COMMAND_CHARS));
        }
    }
    commands
}

/// Build the structured rollup for a session
pub fn summarize(
    session_id: &str,
    project: &str,
    prompts: &[UserPrompt],
    observations: &[Observation],
) -> SessionSummary {
    SessionSummary {
        session_id: session_id.to_string(),
        project: project.to_string(),
        request: fold_request(prompts),
        completed: format_completed(observations),
        files_read: unique_capped(
            observations
                .iter()
                .flat_map(|o| o.files_read.iter().cloned()),
            FILE_LIST_CAP,
        ),
        files_modified: unique_capped(
            observations
                .iter()
                .flat_map(|o| o.files_modified.iter().cloned()),
            FILE_LIST_CAP,
        ),
        next_steps: Vec::new(),
        notes: collect_commands(observations),
        prompt_number: prompts.len() as i64,
        created_at: now_millis(),
    }
}

/// One-line text form stored on the session row
pub fn render_one_line(summary: &SessionSummary) -> String {
    if summary.request.is_empty() {
        summary.completed.clone()
    } else {
        format!("{} — {}", summary.completed, clip_chars(&summary.request, 120))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt(n: i64, text: &str) -> UserPrompt {
        UserPrompt {
            session_id: "s".to_string(),
            prompt_number: n,
            prompt_text: text.to_string(),
            created_at: n,
        }
    }

    fn observation(kind: ObservationKind, input: &str) -> Observation {
        Observation {
            id: "o".to_string(),
            session_id: "s".to_string(),
            project: "p".to_string(),
            tool_name: "t".to_string(),
            tool_input: input.to_string(),
            tool_response: String::new(),
            cwd: String::new(),
            timestamp: 0,
            kind,
            title: String::new(),
            subtitle: String::new(),
            narrative: String::new(),
            files_read: vec![],
            files_modified: vec![],
            facts: vec![],
            concepts: vec![],
            prompt_number: None,
        }
    }

    #[test]
    fn request_folds_in_order() {
        let prompts = vec![prompt(1, "fix the login bug"), prompt(2, "add tests")];
        let summary = summarize("s", "p", &prompts, &[]);
        assert_eq!(summary.request, "[#1] fix the login bug → [#2] add tests");
        assert_eq!(summary.prompt_number, 2);
    }

    #[test]
    fn request_caps_at_500() {
        let prompts: Vec<UserPrompt> = (1..=10)
            .map(|n| prompt(n, &"long prompt text ".repeat(20)))
            .collect();
        let summary = summarize("s", "p", &prompts, &[]);
        assert!(summary.request.chars().count() <= 500);
    }

    #[test]
    fn completed_counts_by_kind() {
        let observations = vec![
            observation(ObservationKind::Write, "{}"),
            observation(ObservationKind::Read, "{}"),
            observation(ObservationKind::Execute, "{}"),
            observation(ObservationKind::Search, "{}"),
        ];
        let summary = summarize("s", "p", &[], &observations);
        assert!(summary
            .completed
            .starts_with("1 file(s) modified, 1 file(s) read, 1 command(s) executed, 1 search(es)"));
    }

    #[test]
    fn empty_session_reports_no_activity() {
        let summary = summarize("s", "p", &[], &[]);
        assert_eq!(summary.completed, "no recorded activity");
        assert_eq!(render_one_line(&summary), "no recorded activity");
    }

    #[test]
    fn file_lists_dedupe_and_cap() {
        let mut observations = Vec::new();
        for i in 0..30 {
            let mut o = observation(ObservationKind::Read, "{}");
            o.files_read = vec![format!("/f/{}", i % 25), "/f/0".to_string()];
            observations.push(o);
        }
        let summary = summarize("s", "p", &[], &observations);
        assert_eq!(summary.files_read.len(), 20);
        assert_eq!(
            summary.files_read.iter().filter(|f| *f == "/f/0").count(),
            1
        );
    }

    #[test]
    fn notes_hold_clipped_commands() {
        let mut observations = vec![observation(
            ObservationKind::Execute,
            r#"{"command": "npm test"}"#,
        )];
        let long = format!(r#"{{"command": "{}"}}"#, "y".repeat(120));
        for _ in 0..6 {
            observations.push(observation(ObservationKind::Execute, &long));
        }
        let summary = summarize("s", "p", &[], &observations);
        assert_eq!(summary.notes.len(), 5);
        assert_eq!(summary.notes[0], "npm test");
        assert_eq!(summary.notes[1].chars().count(), 80);
    }
}
