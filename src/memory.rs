//! The memory store: an in-memory table of records, mirrored to disk.
//!
//! Every public operation takes the store lock for its full duration, so
//! readers never observe a half-applied save or delete. Listener callbacks run
//! after the lock is released.

use crate::analytics::UsageAnalytics;
use crate::backup::{spawn_backup_loop, BackupHandle, BackupManager};
use crate::compression::Codec;
use crate::config::MemoryConfig;
use crate::embeddings::{loader_for, EmbedderLoader};
use crate::error::{MemoryError, MemoryResult};
use crate::events::{notify, MemoryListener, MemoryStored};
use crate::index::TypeIndex;
use crate::search::{Candidate, SearchEngine, SearchOptions};
use crate::storage::{StorageLayout, Table};
use crate::types::{AccessPatterns, Memory, NewMemory, Operation, SearchResult, StoreStats};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

/// Days of compression history included in `get_stats`
const REPORT_DAYS: usize = 7;

struct State {
    records: Table,
    index: TypeIndex,
    /// Last id stamp handed out; stamps strictly increase
    last_stamp: i64,
}

impl State {
    fn next_stamp(&mut self, at: DateTime<Utc>) -> i64 {
        let nanos = at
            .timestamp_nanos_opt()
            .unwrap_or(self.last_stamp.saturating_add(1));
        let stamp = nanos.max(self.last_stamp.saturating_add(1));
        self.last_stamp = stamp;
        stamp
    }
}

struct Inner {
    layout: StorageLayout,
    state: Mutex<State>,
    codec: Codec,
    analytics: UsageAnalytics,
    search: SearchEngine,
    backups: BackupManager,
    listeners: RwLock<Vec<Arc<dyn MemoryListener>>>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Write table and index; failures are logged and the cache stays authoritative
    fn persist(&self, state: &State) {
        if let Err(e) = self.layout.write_table(&state.records, &self.codec) {
            tracing::error!(error = %e, path = %self.layout.table_path().display(), "failed to write memory table");
        }
        if let Err(e) = self.layout.write_index(&state.index) {
            tracing::error!(error = %e, path = %self.layout.index_path().display(), "failed to write type index");
        }
    }

    /// One backup cycle, taken under the store lock so the copy never sees a
    /// partially renamed table
    fn backup(&self) -> MemoryResult<Option<PathBuf>> {
        let _state = self.lock();
        self.backups.snapshot()
    }
}

/// Persistent store of memories with search, analytics and backups
pub struct MemoryStore {
    inner: Arc<Inner>,
    backup_loop: Mutex<Option<BackupHandle>>,
}

impl MemoryStore {
    /// Open (or create) the store at `config.base_path`
    pub fn open(config: MemoryConfig) -> MemoryResult<Self> {
        let (model_name, model_type) = config.get_resolved_model();
        Self::with_embedder_loader(config, loader_for(model_name, model_type))
    }

    /// Open the store with a custom embedding model factory.
    ///
    /// The factory runs at most once, on the first semantic or hybrid search.
    pub fn with_embedder_loader(config: MemoryConfig, loader: EmbedderLoader) -> MemoryResult<Self> {
        let layout = StorageLayout::new(&config.base_path);
        layout.create_dirs()?;

        let codec = Codec::new(config.compression_level);
        let backups = BackupManager::new(
            layout.table_path(),
            layout.backup_dir(),
            config.backup_retention(),
        );
        let state = restore(&layout, &codec, &backups);

        tracing::info!(
            path = %layout.base().display(),
            memories = state.records.len(),
            "memory store opened"
        );

        let inner = Arc::new(Inner {
            layout,
            state: Mutex::new(state),
            codec,
            analytics: UsageAnalytics::new(),
            search: SearchEngine::new(loader),
            backups,
            listeners: RwLock::new(Vec::new()),
        });

        let backup_loop = config
            .backup_interval()
            .and_then(|interval| start_backup_loop(&inner, interval));

        Ok(Self {
            inner,
            backup_loop: Mutex::new(backup_loop),
        })
    }

    pub fn base_path(&self) -> &Path {
        self.inner.layout.base()
    }

    /// Store a new memory and return its id
    pub fn save(&self, new: NewMemory) -> MemoryResult<String> {
        validate(&new)?;

        let timestamp = Utc::now();
        let event = {
            let mut state = self.inner.lock();
            let memory_id = format!("{}_{}", new.memory_type, state.next_stamp(timestamp));

            let memory = Memory {
                content: new.content,
                timestamp,
                importance: new.importance,
                context: new.context,
                source: new.source,
                memory_type: new.memory_type,
            };

            state.index.insert(&memory.memory_type, &memory_id);
            let event = MemoryStored {
                memory_id: memory_id.clone(),
                content: memory.content.clone(),
                timestamp,
            };
            state.records.insert(memory_id.clone(), memory);

            self.inner.analytics.track_access(&memory_id, Operation::Write);
            self.inner.persist(&state);
            tracing::debug!(memory_id = %memory_id, "memory saved");
            event
        };

        let listeners = self
            .inner
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        notify(&listeners, &event);

        Ok(event.memory_id)
    }

    /// A cached record by id
    pub fn load(&self, memory_id: &str) -> Option<Memory> {
        self.inner.lock().records.get(memory_id).cloned()
    }

    /// Remove a memory; returns whether it existed
    pub fn delete(&self, memory_id: &str) -> bool {
        let mut state = self.inner.lock();
        let Some(memory) = state.records.remove(memory_id) else {
            return false;
        };

        state.index.remove(&memory.memory_type, memory_id);
        self.inner.search.forget(memory_id);
        self.inner.analytics.forget(memory_id);
        self.inner.persist(&state);
        tracing::debug!(memory_id = %memory_id, "memory deleted");
        true
    }

    /// Search memories, best match first
    pub fn search(&self, query: &str, options: &SearchOptions) -> Vec<SearchResult> {
        let state = self.inner.lock();

        let mut candidates: Vec<Candidate<'_>> = match &options.memory_type {
            Some(memory_type) => state
                .index
                .ids(memory_type)
                .iter()
                .filter_map(|id| state.records.get_key_value(id))
                .map(|(id, memory)| (id.as_str(), memory))
                .collect(),
            None => state
                .records
                .iter()
                .map(|(id, memory)| (id.as_str(), memory))
                .collect(),
        };
        candidates.retain(|(_, memory)| memory.importance >= options.min_importance);
        candidates.sort_by_key(|(id, memory)| (memory.timestamp, id_stamp(id)));

        let results = options.rank(&self.inner.search, query, &candidates);
        for result in &results {
            self.inner.analytics.track_access(&result.memory_id, Operation::Read);
        }

        tracing::debug!(
            search_type = ?options.search_type,
            candidates = candidates.len(),
            results = results.len(),
            "search complete"
        );
        results
    }

    /// Usage and compression statistics
    pub fn get_stats(&self) -> StoreStats {
        let memory = {
            let state = self.inner.lock();
            self.inner.analytics.calculate_stats(state.records.values())
        };

        StoreStats {
            memory,
            compression: self.inner.codec.report(REPORT_DAYS),
        }
    }

    pub fn get_memory_usage(&self, memory_id: &str) -> AccessPatterns {
        self.inner.analytics.get_access_patterns(memory_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids indexed under `memory_type`, oldest first
    pub fn ids_for_type(&self, memory_type: &str) -> Vec<String> {
        self.inner.lock().index.ids(memory_type).to_vec()
    }

    /// Register a listener for "stored" events
    pub fn subscribe(&self, listener: Arc<dyn MemoryListener>) {
        self.inner
            .listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    /// Run one backup cycle now.
    ///
    /// Returns `None` when nothing has been persisted yet.
    pub fn backup_now(&self) -> MemoryResult<Option<PathBuf>> {
        self.inner.backup()
    }

    /// Backups on disk, oldest first
    pub fn backups(&self) -> MemoryResult<Vec<PathBuf>> {
        self.inner.backups.list()
    }

    /// Stop the background backup loop, if one is running
    pub fn stop_backups(&self) {
        let handle = self
            .backup_loop
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.stop();
        }
    }
}

/// Numeric suffix of a `{type}_{stamp}` id; 0 when absent
fn id_stamp(memory_id: &str) -> i64 {
    memory_id
        .rsplit_once('_')
        .and_then(|(_, stamp)| stamp.parse().ok())
        .unwrap_or(0)
}

fn validate(new: &NewMemory) -> MemoryResult<()> {
    if new.content.trim().is_empty() {
        return Err(MemoryError::InvalidInput("content is empty".to_string()));
    }
    if new.memory_type.trim().is_empty() {
        return Err(MemoryError::InvalidInput("memory type is empty".to_string()));
    }
    if !new.importance.is_finite() || !(0.0..=1.0).contains(&new.importance) {
        return Err(MemoryError::InvalidInput(format!(
            "importance must be within 0.0..=1.0, got {}",
            new.importance
        )));
    }
    Ok(())
}

/// Load table and index from disk.
///
/// An unreadable table is copied into the backups directory and the store
/// starts empty; the file itself is reset only when the copy survived
/// retention. A missing, unreadable or stale index is rebuilt.
fn restore(layout: &StorageLayout, codec: &Codec, backups: &BackupManager) -> State {
    let (records, reset) = match layout.read_table(codec) {
        Ok(Some(records)) => (records, false),
        Ok(None) => (Table::new(), false),
        Err(e) => {
            tracing::error!(error = %e, "memory table unreadable, starting empty");
            // The table file is only replaced once a copy of it is known to exist
            let preserved = match backups.quarantine() {
                Ok(path) if path.exists() => {
                    tracing::warn!(backup = %path.display(), "corrupt table preserved");
                    true
                }
                Ok(path) => {
                    tracing::error!(backup = %path.display(), "quarantined table was pruned, leaving it in place");
                    false
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to preserve corrupt table, leaving it in place");
                    false
                }
            };
            (Table::new(), preserved)
        }
    };

    let index = match layout.read_index() {
        Ok(Some(index)) if index.is_consistent_with(&records) => Some(index),
        Ok(Some(_)) => {
            tracing::warn!("type index out of sync with table, rebuilding");
            None
        }
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(error = %e, "type index unreadable, rebuilding");
            None
        }
    };

    let rebuilt = index.is_none();
    let last_stamp = records.keys().map(|id| id_stamp(id)).max().unwrap_or(0);
    let state = State {
        index: index.unwrap_or_else(|| TypeIndex::rebuild(&records)),
        records,
        last_stamp,
    };

    if reset {
        if let Err(e) = layout.write_table(&state.records, codec) {
            tracing::error!(error = %e, "failed to reset memory table");
        }
    }
    if rebuilt && (reset || !state.records.is_empty() || layout.index_path().exists()) {
        if let Err(e) = layout.write_index(&state.index) {
            tracing::error!(error = %e, "failed to write rebuilt type index");
        }
    }
    state
}

fn start_backup_loop(inner: &Arc<Inner>, interval: std::time::Duration) -> Option<BackupHandle> {
    let weak: Weak<Inner> = Arc::downgrade(inner);
    let task = move || {
        if let Some(inner) = weak.upgrade() {
            if let Err(e) = inner.backup() {
                tracing::error!(error = %e, "scheduled backup failed");
            }
        }
    };

    match spawn_backup_loop(interval, task) {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::error!(error = %e, "failed to start backup loop");
            None
        }
    }
}
