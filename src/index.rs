use crate::error::{MemoryError, MemoryResult};
use crate::types::Memory;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

/// Memory type -> ids of that type, oldest first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeIndex {
    buckets: BTreeMap<String, Vec<String>>,
}

impl TypeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from records in id order
    pub fn rebuild<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a Memory)>,
    {
        let mut index = Self::new();
        for (id, memory) in records {
            index.insert(&memory.memory_type, id);
        }
        index
    }

    pub fn insert(&mut self, memory_type: &str, memory_id: &str) {
        let bucket = self.buckets.entry(memory_type.to_string()).or_default();
        if !bucket.iter().any(|id| id == memory_id) {
            bucket.push(memory_id.to_string());
        }
    }

    /// Remove an id from its type bucket; empty buckets are dropped
    pub fn remove(&mut self, memory_type: &str, memory_id: &str) -> bool {
        let Some(bucket) = self.buckets.get_mut(memory_type) else {
            return false;
        };

        let before = bucket.len();
        bucket.retain(|id| id != memory_id);
        let removed = bucket.len() != before;

        if bucket.is_empty() {
            self.buckets.remove(memory_type);
        }
        removed
    }

    pub fn ids(&self, memory_type: &str) -> &[String] {
        self.buckets
            .get(memory_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains(&self, memory_type: &str, memory_id: &str) -> bool {
        self.ids(memory_type).iter().any(|id| id == memory_id)
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.buckets.keys().map(String::as_str)
    }

    /// Total number of indexed ids
    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Whether every record is indexed under its type and every indexed
    /// id is a record of that type
    pub fn is_consistent_with(&self, records: &BTreeMap<String, Memory>) -> bool {
        let mut seen = HashSet::new();
        for (memory_type, ids) in &self.buckets {
            for id in ids {
                match records.get(id) {
                    Some(m) if &m.memory_type == memory_type => {}
                    _ => return false,
                }
                if !seen.insert(id.as_str()) {
                    return false;
                }
            }
        }
        seen.len() == records.len()
    }

    pub fn load(path: &Path) -> MemoryResult<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| MemoryError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn save(&self, path: &Path) -> MemoryResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
