//! Markdown-to-record migration
//!
//! Reads a directory of Markdown files and emits entries: one top-level
//! entry per file plus one entry per section whose content is long enough
//! to stand alone. Section entries reference their parent entry. Per-file
//! failures are collected in the report, never fatal.

use std::path::{Path, PathBuf};

use pulldown_cmark::{Event, Parser, Tag, TagEnd};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{MnemoError, Result};
use crate::service::MemoryService;
use crate::types::EntryInput;

/// Sections shorter than this fold into the parent entry only
pub const DEFAULT_MIN_SECTION_CHARS: usize = 100;

/// Migration configuration
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Namespace receiving migrated entries
    pub namespace: String,
    /// Minimum section length to become its own entry
    pub min_section_chars: usize,
    /// Extra tags stamped on every migrated entry
    pub tags: Vec<String>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            namespace: "imported".to_string(),
            min_section_chars: DEFAULT_MIN_SECTION_CHARS,
            tags: vec![],
        }
    }
}

/// Outcome of one migration run
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub files_processed: usize,
    pub entries_created: usize,
    pub failures: Vec<MigrationFailure>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationFailure {
    pub path: PathBuf,
    pub error: String,
}

/// A heading-delimited slice of a document
#[derive(Debug, Clone)]
struct Section {
    title: String,
    content: String,
}

/// Markdown directory migrator
pub struct MarkdownMigrator<'a> {
    service: &'a MemoryService,
    config: MigrationConfig,
}

impl<'a> MarkdownMigrator<'a> {
    pub fn new(service: &'a MemoryService, config: MigrationConfig) -> Self {
        Self { service, config }
    }

    /// Migrate every `.md` file directly under `dir`
    pub async fn migrate_dir(&self, dir: &Path) -> Result<MigrationReport> {
        let mut report = MigrationReport::default();

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext.eq_ignore_ascii_case("md") || ext.eq_ignore_ascii_case("markdown"))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        for path in paths {
            match self.migrate_file(&path).await {
                Ok(created) => {
                    report.files_processed += 1;
                    report.entries_created += created;
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "migration failed for file");
                    report.failures.push(MigrationFailure {
                        path,
                        error: err.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    /// Migrate one file; returns how many entries were created
    pub async fn migrate_file(&self, path: &Path) -> Result<usize> {
        let source = std::fs::read_to_string(path)?;
        if source.trim().is_empty() {
            return Err(MnemoError::Parse(format!("empty file: {}", path.display())));
        }
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| MnemoError::Parse(format!("unreadable name: {}", path.display())))?;

        let doc_hash = {
            let mut hasher = Sha256::new();
            hasher.update(source.as_bytes());
            format!("{:x}", hasher.finalize())
        };

        let sections = split_sections(&source);

        let mut tags = self.config.tags.clone();
        tags.push("migrated".to_string());

        let mut metadata = std::collections::HashMap::new();
        metadata.insert(
            "sourcePath".to_string(),
            serde_json::Value::String(path.display().to_string()),
        );
        metadata.insert(
            "documentHash".to_string(),
            serde_json::Value::String(doc_hash),
        );

        let parent = self
            .service
            .store_entry(EntryInput {
                key: stem.to_string(),
                content: source.clone(),
                namespace: Some(self.config.namespace.clone()),
                tags: tags.clone(),
                metadata: metadata.clone(),
                ..Default::default()
            })
            .await?;
        let mut created = 1;

        for (index, section) in sections.iter().enumerate() {
            if section.content.chars().count() < self.config.min_section_chars {
                continue;
            }
            let key = format!("{}/{}-{}", stem, index + 1, slugify(&section.title));
            self.service
                .store_entry(EntryInput {
                    key,
                    content: section.content.clone(),
                    namespace: Some(self.config.namespace.clone()),
                    tags: tags.clone(),
                    metadata: metadata.clone(),
                    references: vec![parent.id.clone()],
                    ..Default::default()
                })
                .await?;
            created += 1;
        }
        Ok(created)
    }
}

/// Split a document into heading-delimited sections. Text ahead of the
/// first heading belongs to the top-level entry only.
fn split_sections(source: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut current: Option<Section> = None;
    let mut in_heading = false;

    for event in Parser::new(source) {
        match event {
            Event::Start(Tag::Heading { .. }) => {
                if let Some(section) = current.take() {
                    sections.push(section);
                }
                current = Some(Section {
                    title: String::new(),
                    content: String::new(),
                });
                in_heading = true;
            }
            Event::End(TagEnd::Heading(_)) => {
                in_heading = false;
            }
            Event::Text(text) | Event::Code(text) => {
                if let Some(ref mut section) = current {
                    if in_heading {
                        section.title.push_str(&text);
                    } else {
                        section.content.push_str(&text);
                    }
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                if let Some(ref mut section) = current {
                    if !in_heading {
                        section.content.push(' ');
                    }
                }
            }
            Event::End(TagEnd::Paragraph) | Event::End(TagEnd::Item) => {
                if let Some(ref mut section) = current {
                    section.content.push('\n');
                }
            }
            _ => {}
        }
    }
    if let Some(section) = current.take() {
        sections.push(section);
    }
    sections
}

fn slugify(title: &str) -> String {
    let slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();
    let trimmed = slug.trim_matches('-');
    let mut out = String::with_capacity(trimmed.len());
    let mut last_dash = false;
    for c in trimmed.chars() {
        if c == '-' {
            if !last_dash {
                out.push(c);
            }
            last_dash = true;
        } else {
            out.push(c);
            last_dash = false;
        }
    }
    if out.is_empty() {
        "section".to_string()
    } else {
        out.chars().take(60).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_split_on_headings() {
        let doc = "intro text\n\n# First\nbody one\n\n# Second\nbody two\n";
        let sections = split_sections(doc);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].title, "First");
        assert!(sections[0].content.contains("body one"));
        assert_eq!(sections[1].title, "Second");
    }

    #[test]
    fn slugs_are_clean() {
        assert_eq!(slugify("Key Rotation & Security"), "key-rotation-security");
        assert_eq!(slugify("  "), "section");
        assert_eq!(slugify("Ünïcode Héading"), "ünïcode-héading");
    }
}
