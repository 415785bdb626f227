//! Usage analytics for stored memories.
//!
//! Access timelines live only in memory and start empty each process run.
//! `calculate_stats` summarizes the record table itself.
use crate::types::{AccessPatterns, Memory, MemoryStats, Operation};
use chrono::{DateTime, Timelike, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Placeholder ratio reported in `MemoryStats`; live figures come from the codec
pub const PLACEHOLDER_COMPRESSION_RATIO: f64 = 0.4;

const PEAK_HOURS: usize = 3;
const TOP_CONTEXTS: usize = 5;
const SECS_PER_DAY: f64 = 86_400.0;

/// Age buckets as (label, inclusive upper bound in seconds)
const AGE_BUCKETS: &[(&str, i64)] = &[
    ("<1 hour", 3_600),
    ("1-24 hours", 86_400),
    ("1-7 days", 604_800),
    ("1-4 weeks", 2_592_000),
    ("1-12 months", 31_536_000),
];
const OLDEST_BUCKET: &str = ">1 year";

/// Access history of a single memory
#[derive(Debug, Clone, Default)]
struct AccessLog {
    events: Vec<DateTime<Utc>>,
    reads: u64,
    writes: u64,
    last_accessed: Option<DateTime<Utc>>,
}

/// Tracks reads and writes per memory id
#[derive(Default)]
pub struct UsageAnalytics {
    logs: Mutex<HashMap<String, AccessLog>>,
}

impl UsageAnalytics {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, AccessLog>> {
        self.logs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record an access happening now
    pub fn track_access(&self, memory_id: &str, operation: Operation) {
        self.track_access_at(memory_id, operation, Utc::now());
    }

    /// Record an access at a given time
    pub fn track_access_at(&self, memory_id: &str, operation: Operation, at: DateTime<Utc>) {
        let mut logs = self.lock();
        let log = logs.entry(memory_id.to_string()).or_default();

        log.events.push(at);
        log.last_accessed = Some(at);
        match operation {
            Operation::Read => log.reads += 1,
            Operation::Write => log.writes += 1,
        }
    }

    /// Drop the timeline of a deleted memory
    pub fn forget(&self, memory_id: &str) {
        self.lock().remove(memory_id);
    }

    pub fn get_access_patterns(&self, memory_id: &str) -> AccessPatterns {
        let logs = self.lock();
        let Some(log) = logs.get(memory_id) else {
            return AccessPatterns::default();
        };
        let (Some(first), Some(last)) = (log.events.iter().min(), log.events.iter().max()) else {
            return AccessPatterns::default();
        };
        let elapsed_days = (*last - *first).num_milliseconds() as f64 / 1000.0 / SECS_PER_DAY;
        let access_frequency = log.events.len() as f64 / elapsed_days.max(1.0);

        AccessPatterns {
            total_reads: log.reads,
            total_writes: log.writes,
            last_accessed: log.last_accessed,
            access_frequency,
            peak_usage_times: peak_hours(&log.events),
        }
    }

    /// Summarize a set of records as of now
    pub fn calculate_stats<'a, I>(&self, records: I) -> MemoryStats
    where
        I: IntoIterator<Item = &'a Memory>,
    {
        calculate_stats_at(records, Utc::now())
    }
}

/// Busiest hours of day, most events first
fn peak_hours(events: &[DateTime<Utc>]) -> Vec<String> {
    let mut counts = [0usize; 24];
    for event in events {
        counts[event.hour() as usize] += 1;
    }

    let mut hours: Vec<(usize, usize)> = counts
        .iter()
        .enumerate()
        .filter(|(_, count)| **count > 0)
        .map(|(hour, count)| (hour, *count))
        .collect();
    hours.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    hours
        .into_iter()
        .take(PEAK_HOURS)
        .map(|(hour, _)| format!("{:02}:00", hour))
        .collect()
}

fn age_bucket(age_secs: i64) -> &'static str {
    AGE_BUCKETS
        .iter()
        .find(|(_, upper)| age_secs <= *upper)
        .map(|(label, _)| *label)
        .unwrap_or(OLDEST_BUCKET)
}

/// Summarize a set of records relative to `now`
pub fn calculate_stats_at<'a, I>(records: I, now: DateTime<Utc>) -> MemoryStats
where
    I: IntoIterator<Item = &'a Memory>,
{
    let mut total = 0usize;
    let mut by_type: HashMap<String, usize> = HashMap::new();
    let mut importance_sum = 0.0;
    let mut total_size_bytes = 0usize;
    let mut ages: HashMap<&'static str, usize> = HashMap::new();
    // (count, first seen position) per context rendering
    let mut contexts: HashMap<String, (usize, usize)> = HashMap::new();

    for memory in records {
        *by_type.entry(memory.memory_type.clone()).or_insert(0) += 1;
        importance_sum += memory.importance;
        total_size_bytes += memory.content.len();

        let age = (now - memory.timestamp).num_seconds();
        *ages.entry(age_bucket(age)).or_insert(0) += 1;

        let position = total;
        contexts
            .entry(memory.context_key())
            .or_insert((0, position))
            .0 += 1;

        total += 1;
    }

    if total == 0 {
        return MemoryStats::default();
    }

    let memory_age_distribution = AGE_BUCKETS
        .iter()
        .map(|(label, _)| *label)
        .chain(std::iter::once(OLDEST_BUCKET))
        .map(|label| (label.to_string(), ages.get(label).copied().unwrap_or(0)))
        .collect();

    let mut ranked: Vec<(String, (usize, usize))> = contexts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    let top_contexts = ranked
        .into_iter()
        .take(TOP_CONTEXTS)
        .map(|(context, _)| context)
        .collect();

    MemoryStats {
        total_memories: total,
        memories_by_type: by_type,
        avg_importance: importance_sum / total as f64,
        memory_age_distribution,
        top_contexts,
        total_size_bytes,
        compression_ratio: PLACEHOLDER_COMPRESSION_RATIO,
    }
}
