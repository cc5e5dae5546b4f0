//! Configuration for the memory store

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::index::HnswConfig;

/// Default database file name inside the data directory
pub const DEFAULT_DB_FILE: &str = "memory.db";

/// Byte cap applied to serialized tool responses
pub const DEFAULT_RESPONSE_BYTE_CAP: usize = 5000;

/// FTS tokenizer choice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FtsTokenizer {
    /// Latin-script default
    #[default]
    Unicode61,
    /// English stemming
    Porter,
    /// CJK-safe trigrams
    Trigram,
    /// Caller-supplied tokenizer string, passed through verbatim
    Custom(String),
}

impl FtsTokenizer {
    /// Name reported as `activeTokenizer`
    pub fn name(&self) -> &str {
        match self {
            FtsTokenizer::Unicode61 => "unicode61",
            FtsTokenizer::Porter => "porter",
            FtsTokenizer::Trigram => "trigram",
            FtsTokenizer::Custom(name) => name,
        }
    }

    /// The `tokenize=` argument handed to FTS5
    pub fn sql(&self) -> String {
        match self {
            FtsTokenizer::Unicode61 => "unicode61".to_string(),
            FtsTokenizer::Porter => "porter unicode61".to_string(),
            FtsTokenizer::Trigram => "trigram".to_string(),
            FtsTokenizer::Custom(name) => name.clone(),
        }
    }

    pub fn is_cjk_optimized(&self) -> bool {
        matches!(self, FtsTokenizer::Trigram)
    }
}

impl std::str::FromStr for FtsTokenizer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unicode61" => Ok(FtsTokenizer::Unicode61),
            "porter" => Ok(FtsTokenizer::Porter),
            "trigram" => Ok(FtsTokenizer::Trigram),
            "" => Err("empty tokenizer name".to_string()),
            _ => Ok(FtsTokenizer::Custom(s.to_string())),
        }
    }
}

/// Cache settings in wire-friendly milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSettings {
    #[serde(default = "default_cache_size")]
    pub max_size: usize,
    /// Byte budget; `None` disables the memory cap
    pub max_memory: Option<usize>,
    /// Default TTL in milliseconds; `None` means entries never expire
    pub ttl_ms: Option<u64>,
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
}

fn default_cache_size() -> usize {
    1000
}

fn default_cleanup_interval_ms() -> u64 {
    60_000
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_size: default_cache_size(),
            max_memory: None,
            ttl_ms: Some(300_000),
            cleanup_interval_ms: default_cleanup_interval_ms(),
        }
    }
}

impl From<&CacheSettings> for CacheConfig {
    fn from(settings: &CacheSettings) -> Self {
        CacheConfig {
            max_size: settings.max_size,
            max_memory: settings.max_memory,
            ttl: settings.ttl_ms.map(Duration::from_millis),
            cleanup_interval: Duration::from_millis(settings.cleanup_interval_ms),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryConfig {
    /// Project root; state lives under `<base>/.claude/memory`
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    #[serde(default = "default_db_file")]
    pub db_file: String,
    #[serde(default)]
    pub tokenizer: FtsTokenizer,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default = "default_index")]
    pub index: HnswConfig,
    /// Enrichment oracle timeout in milliseconds
    #[serde(default = "default_oracle_timeout_ms")]
    pub oracle_timeout_ms: u64,
    /// Byte cap on serialized tool responses
    #[serde(default = "default_response_cap")]
    pub response_byte_cap: usize,
}

fn default_base_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_db_file() -> String {
    DEFAULT_DB_FILE.to_string()
}

fn default_index() -> HnswConfig {
    HnswConfig::new(384)
}

fn default_oracle_timeout_ms() -> u64 {
    15_000
}

fn default_response_cap() -> usize {
    DEFAULT_RESPONSE_BYTE_CAP
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            db_file: default_db_file(),
            tokenizer: FtsTokenizer::default(),
            cache: CacheSettings::default(),
            index: default_index(),
            oracle_timeout_ms: default_oracle_timeout_ms(),
            response_byte_cap: default_response_cap(),
        }
    }
}

impl MemoryConfig {
    pub fn for_base_dir(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// In-memory database, used by tests
    pub fn in_memory() -> Self {
        Self {
            db_file: ":memory:".to_string(),
            ..Default::default()
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.base_dir.join(".claude").join("memory")
    }

    /// Full database path, or `:memory:` untouched
    pub fn db_path(&self) -> PathBuf {
        if self.db_file == ":memory:" {
            PathBuf::from(":memory:")
        } else {
            self.data_dir().join(&self.db_file)
        }
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_millis(self.oracle_timeout_ms)
    }
}
