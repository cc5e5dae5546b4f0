//! mnemo - project-scoped memory for coding assistants
//!
//! An embeddable store that persists heterogeneous knowledge items as
//! structured entries addressable by id and by (namespace, key), and makes
//! them searchable three ways: exact/prefix key lookup, full-text keyword
//! search, and approximate nearest-neighbor search over embeddings.
//! A hook pipeline captures per-tool observations from a running
//! assistant and folds sessions into structured summaries.

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod hooks;
pub mod index;
pub mod migrate;
pub mod service;
pub mod storage;
pub mod tools;
pub mod types;

pub use config::MemoryConfig;
pub use error::{MnemoError, Result};
pub use service::{EmbeddingProvider, MemoryService};
pub use storage::StorageEngine;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
