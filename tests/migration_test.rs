//! Markdown migration tests

use std::fs;

use mnemo::config::MemoryConfig;
use mnemo::index::HnswConfig;
use mnemo::migrate::{MarkdownMigrator, MigrationConfig};
use mnemo::types::{Query, QueryType};
use mnemo::MemoryService;

async fn service() -> MemoryService {
    let config = MemoryConfig {
        index: HnswConfig::new(4),
        ..MemoryConfig::in_memory()
    };
    let service = MemoryService::new(config);
    service.initialize().await.unwrap();
    service
}

/// A file with two substantial sections yields one top-level entry plus
/// two section entries, each referencing the parent.
#[tokio::test]
async fn sections_become_linked_entries() {
    let dir = tempfile::tempdir().unwrap();
    let body = format!(
        "# Architecture\n{}\n\n# Deployment\n{}\n\n# Stub\ntoo short\n",
        "the storage layer wraps sqlite with a write lock and ".repeat(4),
        "deploys go through the staging environment first and ".repeat(4),
    );
    fs::write(dir.path().join("handbook.md"), body).unwrap();

    let service = service().await;
    let migrator = MarkdownMigrator::new(&service, MigrationConfig::default());
    let report = migrator.migrate_dir(dir.path()).await.unwrap();

    assert_eq!(report.files_processed, 1);
    assert_eq!(report.entries_created, 3);
    assert!(report.failures.is_empty());

    let parent = service
        .get_by_key("imported", "handbook")
        .await
        .unwrap()
        .unwrap();

    let query = Query {
        query_type: QueryType::Prefix,
        key_prefix: Some("handbook/".to_string()),
        namespace: Some("imported".to_string()),
        ..Default::default()
    };
    let sections = service.query(&query).await.unwrap();
    assert_eq!(sections.len(), 2);
    for section in &sections {
        assert_eq!(section.references, vec![parent.id.clone()]);
        assert!(section.tags.contains(&"migrated".to_string()));
    }
}

/// Short sections fold into the parent; only the top-level entry remains.
#[tokio::test]
async fn trivial_sections_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("notes.md"),
        "# One\nshort\n\n# Two\nalso short\n",
    )
    .unwrap();

    let service = service().await;
    let migrator = MarkdownMigrator::new(&service, MigrationConfig::default());
    let report = migrator.migrate_dir(dir.path()).await.unwrap();

    assert_eq!(report.entries_created, 1);
    assert!(service
        .get_by_key("imported", "notes")
        .await
        .unwrap()
        .is_some());
}

/// One broken file doesn't abort the batch; its failure is collected.
#[tokio::test]
async fn per_file_failures_are_collected() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("empty.md"), "   \n").unwrap();
    fs::write(
        dir.path().join("good.md"),
        format!("# Section\n{}\n", "real content here ".repeat(10)),
    )
    .unwrap();

    let service = service().await;
    let migrator = MarkdownMigrator::new(&service, MigrationConfig::default());
    let report = migrator.migrate_dir(dir.path()).await.unwrap();

    assert_eq!(report.files_processed, 1);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].path.ends_with("empty.md"));
    assert!(report.entries_created >= 1);
}

#[tokio::test]
async fn non_markdown_files_ignored() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("data.json"), "{}").unwrap();
    fs::write(dir.path().join("readme.txt"), "plain text").unwrap();

    let service = service().await;
    let migrator = MarkdownMigrator::new(&service, MigrationConfig::default());
    let report = migrator.migrate_dir(dir.path()).await.unwrap();

    assert_eq!(report.files_processed, 0);
    assert_eq!(report.entries_created, 0);
}

#[tokio::test]
async fn custom_namespace_and_tags() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("doc.md"),
        format!("# Heading\n{}\n", "x ".repeat(120)),
    )
    .unwrap();

    let service = service().await;
    let config = MigrationConfig {
        namespace: "docs".to_string(),
        tags: vec!["handbook".to_string()],
        ..Default::default()
    };
    let migrator = MarkdownMigrator::new(&service, config);
    migrator.migrate_dir(dir.path()).await.unwrap();

    let entry = service.get_by_key("docs", "doc").await.unwrap().unwrap();
    assert!(entry.tags.contains(&"handbook".to_string()));
    assert!(entry.tags.contains(&"migrated".to_string()));
    assert!(entry.metadata.contains_key("documentHash"));
}
