use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Free-form metadata attached to a memory
pub type Context = BTreeMap<String, serde_json::Value>;

pub const DEFAULT_MEMORY_TYPE: &str = "general";
pub const DEFAULT_IMPORTANCE: f64 = 0.5;

/// A memory entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub importance: f64,
    #[serde(default)]
    pub context: Option<Context>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default = "default_memory_type")]
    pub memory_type: String,
}

fn default_memory_type() -> String {
    DEFAULT_MEMORY_TYPE.to_string()
}

impl Memory {
    /// Serialize to the JSON form used on disk
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a record from its JSON form
    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }

    /// Context rendered as a single string, "null" when absent
    pub fn context_key(&self) -> String {
        serde_json::to_string(&self.context).unwrap_or_else(|_| "null".to_string())
    }
}

/// Input for `MemoryStore::save`
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub content: String,
    pub importance: f64,
    pub context: Option<Context>,
    pub memory_type: String,
    pub source: Option<String>,
}

impl NewMemory {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            importance: DEFAULT_IMPORTANCE,
            context: None,
            memory_type: default_memory_type(),
            source: None,
        }
    }

    pub fn importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }

    pub fn context(mut self, context: Context) -> Self {
        self.context = Some(context);
        self
    }

    pub fn memory_type(mut self, memory_type: impl Into<String>) -> Self {
        self.memory_type = memory_type.into();
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Search result with relevance score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub memory_id: String,
    pub content: String,
    pub score: f64,
    pub memory_type: String,
    pub importance: f64,
}

impl SearchResult {
    pub fn from_memory(memory_id: &str, memory: &Memory, score: f64) -> Self {
        Self {
            memory_id: memory_id.to_string(),
            content: memory.content.clone(),
            score,
            memory_type: memory.memory_type.clone(),
            importance: memory.importance,
        }
    }
}

/// Ranking strategy for a search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    Fuzzy,
    Semantic,
    #[default]
    Hybrid,
}

impl FromStr for SearchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fuzzy" => Ok(Self::Fuzzy),
            "semantic" => Ok(Self::Semantic),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(format!("Unknown search type: {}", other)),
        }
    }
}

/// Kind of access recorded by analytics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Read,
    Write,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Read => write!(f, "read"),
            Operation::Write => write!(f, "write"),
        }
    }
}

/// Statistics about the memory store
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryStats {
    pub total_memories: usize,
    pub memories_by_type: HashMap<String, usize>,
    pub avg_importance: f64,
    /// Bucket label and count, youngest bucket first
    pub memory_age_distribution: Vec<(String, usize)>,
    pub top_contexts: Vec<String>,
    pub total_size_bytes: usize,
    pub compression_ratio: f64,
}

/// Usage figures for a single memory
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccessPatterns {
    pub total_reads: u64,
    pub total_writes: u64,
    pub last_accessed: Option<DateTime<Utc>>,
    /// Accesses per day
    pub access_frequency: f64,
    pub peak_usage_times: Vec<String>,
}

/// One calendar day of compression activity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyCompression {
    pub date: String,
    pub original_size: u64,
    pub compressed_size: u64,
    pub count: u64,
    pub ratio: f64,
}

/// Live figures reported by the codec
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompressionReport {
    pub ratio: f64,
    pub space_saved: i64,
    pub total_original_size: u64,
    pub total_compressed_size: u64,
    pub compression_count: u64,
    pub last_compression: Option<DateTime<Utc>>,
    pub daily: Vec<DailyCompression>,
}

/// Combined view returned by `MemoryStore::get_stats`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub memory: MemoryStats,
    pub compression: CompressionReport,
}
