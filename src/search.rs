//! Ranking of candidate memories against a query.
//!
//! Three strategies: lexical token matching (`fuzzy_search`), embedding
//! similarity (`semantic_search`) and a weighted blend of both
//! (`hybrid_search`). The engine only borrows candidates; the one thing it
//! keeps is a cache of content embeddings keyed by memory id.

use crate::embeddings::{cosine_similarity, Embedder, EmbedderLoader};
use crate::error::{MemoryError, MemoryResult};
use crate::types::{Memory, SearchResult, SearchType};
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, OnceLock};

pub const DEFAULT_MIN_SCORE: f64 = 60.0;
pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_FUZZY_WEIGHT: f64 = 0.3;
pub const DEFAULT_SEMANTIC_WEIGHT: f64 = 0.7;

/// A memory id paired with its record
pub type Candidate<'a> = (&'a str, &'a Memory);

fn token_regex() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"\w+").expect("static token pattern"))
}

fn tokenize(text: &str) -> Vec<String> {
    token_regex()
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Length of the longest common subsequence of two char sequences
fn lcs_len(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut row = vec![0usize; b.len() + 1];
    for x in a {
        for (j, y) in b.iter().enumerate() {
            row[j + 1] = if x == y {
                prev[j] + 1
            } else {
                prev[j + 1].max(row[j])
            };
        }
        std::mem::swap(&mut prev, &mut row);
    }
    prev[b.len()]
}

/// Indel similarity, 0-100: a substitution costs one deletion plus one insertion
fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }
    200.0 * lcs_len(&a, &b) as f64 / total as f64
}

fn token_sort_ratio(a: &[String], b: &[String]) -> f64 {
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort();
    b.sort();
    ratio(&a.join(" "), &b.join(" "))
}

fn token_set_ratio(a: &[String], b: &[String]) -> f64 {
    let a: BTreeSet<&str> = a.iter().map(String::as_str).collect();
    let b: BTreeSet<&str> = b.iter().map(String::as_str).collect();

    let sect: Vec<&str> = a.intersection(&b).copied().collect();
    let diff_ab: Vec<&str> = a.difference(&b).copied().collect();
    let diff_ba: Vec<&str> = b.difference(&a).copied().collect();

    // One side's tokens are all contained in the other's
    if !sect.is_empty() && (diff_ab.is_empty() || diff_ba.is_empty()) {
        return 100.0;
    }

    let ab = diff_ab.join(" ");
    let ba = diff_ba.join(" ");
    let mut best = ratio(&ab, &ba);

    if !sect.is_empty() {
        let sect = sect.join(" ");
        let combined_ab = format!("{} {}", sect, ab);
        let combined_ba = format!("{} {}", sect, ba);
        best = best
            .max(ratio(&sect, &combined_ab))
            .max(ratio(&sect, &combined_ba));
    }

    best
}

/// Token-overlap similarity of two texts on a 0-100 scale
pub fn token_ratio(query: &str, content: &str) -> f64 {
    let a = tokenize(query);
    let b = tokenize(content);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    token_sort_ratio(&a, &b).max(token_set_ratio(&a, &b))
}

fn sort_desc(results: &mut [SearchResult]) {
    // sort_by is stable, so equal scores keep candidate order
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Fuzzy, semantic and hybrid search over memories
pub struct SearchEngine {
    loader: EmbedderLoader,
    model: OnceLock<Option<Box<dyn Embedder>>>,
    embeddings: Mutex<HashMap<String, Vec<f32>>>,
}

impl SearchEngine {
    /// Engine whose model is built by `loader` on first semantic search
    pub fn new(loader: EmbedderLoader) -> Self {
        Self {
            loader,
            model: OnceLock::new(),
            embeddings: Mutex::new(HashMap::new()),
        }
    }

    /// Engine with an already constructed model
    pub fn with_model(model: Box<dyn Embedder>) -> Self {
        let engine = Self::new(Box::new(|| -> MemoryResult<Box<dyn Embedder>> {
            Err(MemoryError::ModelUnavailable("model was preloaded".to_string()))
        }));
        let _ = engine.model.set(Some(model));
        engine
    }

    /// The model, loading it if this is the first call.
    ///
    /// Concurrent first callers block on a single load. A failed load is
    /// remembered and not retried.
    fn model(&self) -> Option<&dyn Embedder> {
        self.model
            .get_or_init(|| match (self.loader)() {
                Ok(model) => {
                    tracing::info!("embedding model loaded");
                    Some(model)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "embedding model unavailable, semantic search disabled");
                    None
                }
            })
            .as_deref()
    }

    /// Force the model load; returns whether a model is usable
    pub fn initialize(&self) -> bool {
        self.model().is_some()
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<String, Vec<f32>>> {
        self.embeddings.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn cached_embeddings(&self) -> usize {
        self.cache().len()
    }

    /// Drop the cached embedding of a deleted memory
    pub fn forget(&self, memory_id: &str) {
        self.cache().remove(memory_id);
    }

    /// Rank candidates by token overlap with the query.
    ///
    /// `min_score` is on the 0-100 scale; returned scores are 0-1.
    pub fn fuzzy_search(
        &self,
        query: &str,
        candidates: &[Candidate<'_>],
        min_score: f64,
    ) -> Vec<SearchResult> {
        let mut results: Vec<SearchResult> = candidates
            .iter()
            .filter_map(|(id, memory)| {
                let score = token_ratio(query, &memory.content);
                (score >= min_score).then(|| SearchResult::from_memory(id, memory, score / 100.0))
            })
            .collect();

        sort_desc(&mut results);
        results
    }

    /// Rank candidates by cosine similarity of embeddings
    pub fn semantic_search(
        &self,
        query: &str,
        candidates: &[Candidate<'_>],
        top_k: usize,
    ) -> Vec<SearchResult> {
        let Some(model) = self.model() else {
            return Vec::new();
        };

        let query_embedding = match model.embed(query) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "failed to embed query");
                return Vec::new();
            }
        };

        let mut cache = self.cache();
        self.update_embeddings(model, &mut cache, candidates);

        let mut results: Vec<SearchResult> = candidates
            .iter()
            .filter_map(|(id, memory)| {
                let embedding = cache.get(*id)?;
                let score = cosine_similarity(&query_embedding, embedding).clamp(0.0, 1.0);
                Some(SearchResult::from_memory(id, memory, score))
            })
            .collect();
        drop(cache);

        sort_desc(&mut results);
        results.truncate(top_k);
        results
    }

    /// Embed every candidate not yet cached, in one batch
    fn update_embeddings(
        &self,
        model: &dyn Embedder,
        cache: &mut HashMap<String, Vec<f32>>,
        candidates: &[Candidate<'_>],
    ) {
        let missing: Vec<&Candidate<'_>> = candidates
            .iter()
            .filter(|(id, _)| !cache.contains_key(*id))
            .collect();
        if missing.is_empty() {
            return;
        }

        let texts: Vec<&str> = missing.iter().map(|(_, m)| m.content.as_str()).collect();
        let count = texts.len();
        match model.embed_batch(&texts) {
            Ok(embeddings) => {
                tracing::debug!(count = embeddings.len(), "cached new embeddings");
                for ((id, _), embedding) in missing.into_iter().zip(embeddings) {
                    cache.insert(id.to_string(), embedding);
                }
            }
            Err(e) => tracing::warn!(error = %e, count, "failed to embed memories"),
        }
    }

    /// Weighted blend of fuzzy and semantic scores.
    ///
    /// A candidate found by only one strategy scores 0 on the other.
    pub fn hybrid_search(
        &self,
        query: &str,
        candidates: &[Candidate<'_>],
        weights: HybridWeights,
        top_k: usize,
        min_score: f64,
    ) -> Vec<SearchResult> {
        let fuzzy: HashMap<String, f64> = self
            .fuzzy_search(query, candidates, min_score)
            .into_iter()
            .map(|r| (r.memory_id, r.score))
            .collect();
        let semantic: HashMap<String, f64> = self
            .semantic_search(query, candidates, top_k)
            .into_iter()
            .map(|r| (r.memory_id, r.score))
            .collect();

        let mut results: Vec<SearchResult> = candidates
            .iter()
            .filter_map(|(id, memory)| {
                let f = fuzzy.get(*id);
                let s = semantic.get(*id);
                if f.is_none() && s.is_none() {
                    return None;
                }
                let score = f.copied().unwrap_or(0.0) * weights.fuzzy
                    + s.copied().unwrap_or(0.0) * weights.semantic;
                Some(SearchResult::from_memory(id, memory, score))
            })
            .collect();

        sort_desc(&mut results);
        results.truncate(top_k);
        results
    }
}

/// Relative weight of each strategy in a hybrid search
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HybridWeights {
    pub fuzzy: f64,
    pub semantic: f64,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            fuzzy: DEFAULT_FUZZY_WEIGHT,
            semantic: DEFAULT_SEMANTIC_WEIGHT,
        }
    }
}

/// Parameters of `MemoryStore::search`
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub search_type: SearchType,
    /// Only consider memories of this type
    pub memory_type: Option<String>,
    pub min_importance: f64,
    pub top_k: usize,
    /// Fuzzy cut-off on the 0-100 scale
    pub min_score: f64,
    pub weights: HybridWeights,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            search_type: SearchType::default(),
            memory_type: None,
            min_importance: 0.0,
            top_k: DEFAULT_TOP_K,
            min_score: DEFAULT_MIN_SCORE,
            weights: HybridWeights::default(),
        }
    }
}

impl SearchOptions {
    pub fn new(search_type: SearchType) -> Self {
        Self {
            search_type,
            ..Self::default()
        }
    }

    pub fn memory_type(mut self, memory_type: impl Into<String>) -> Self {
        self.memory_type = Some(memory_type.into());
        self
    }

    pub fn min_importance(mut self, min_importance: f64) -> Self {
        self.min_importance = min_importance;
        self
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn weights(mut self, fuzzy: f64, semantic: f64) -> Self {
        self.weights = HybridWeights { fuzzy, semantic };
        self
    }

    /// Rank `candidates` with the configured strategy, best first
    pub fn rank(
        &self,
        engine: &SearchEngine,
        query: &str,
        candidates: &[Candidate<'_>],
    ) -> Vec<SearchResult> {
        let mut results = match self.search_type {
            SearchType::Fuzzy => engine.fuzzy_search(query, candidates, self.min_score),
            SearchType::Semantic => engine.semantic_search(query, candidates, self.top_k),
            SearchType::Hybrid => {
                engine.hybrid_search(query, candidates, self.weights, self.top_k, self.min_score)
            }
        };
        results.truncate(self.top_k);
        results
    }
}
