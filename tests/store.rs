use memvault::{
    Embedder, EmbedderLoader, LiteEmbedder, MemoryConfig, MemoryError, MemoryListener,
    MemoryResult, MemoryStore, MemoryStored, NewMemory, SearchOptions, SearchType,
};
use proptest::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Maps texts mentioning "alpha" or "delta" to one axis and "gamma" to the other
struct KeywordEmbedder;

impl Embedder for KeywordEmbedder {
    fn embed(&self, text: &str) -> MemoryResult<Vec<f32>> {
        let text = text.to_lowercase();
        let first = if text.contains("alpha") || text.contains("delta") { 1.0 } else { 0.0 };
        let second = if text.contains("gamma") { 1.0 } else { 0.0 };
        Ok(vec![first, second])
    }
}

fn config(dir: &Path) -> MemoryConfig {
    let mut config = MemoryConfig::at(dir);
    config.backup_interval_hours = 0.0;
    config
}

fn open_with(dir: &Path, loader: EmbedderLoader) -> MemoryStore {
    MemoryStore::with_embedder_loader(config(dir), loader).unwrap()
}

fn open(dir: &Path) -> MemoryStore {
    open_with(
        dir,
        Box::new(|| -> MemoryResult<Box<dyn Embedder>> { Ok(Box::new(LiteEmbedder::new())) }),
    )
}

fn keyword_store(dir: &Path) -> MemoryStore {
    open_with(
        dir,
        Box::new(|| -> MemoryResult<Box<dyn Embedder>> { Ok(Box::new(KeywordEmbedder)) }),
    )
}

#[test]
fn test_boston_weather_fuzzy() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path());
    let id = store
        .save(
            NewMemory::new("The weather in Boston is sunny")
                .memory_type("weather")
                .importance(0.7),
        )
        .unwrap();

    let options = SearchOptions::new(SearchType::Fuzzy).min_score(50.0);
    let results = store.search("Boston weather", &options);

    assert!(!results.is_empty());
    assert_eq!(results[0].memory_id, id);
    assert!(results[0].score >= 0.5);
    assert_eq!(results[0].memory_type, "weather");
}

#[test]
fn test_sunny_boston_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path());
    let id = store
        .save(
            NewMemory::new("Boston weather is sunny")
                .importance(0.6)
                .memory_type("weather"),
        )
        .unwrap();

    let options = SearchOptions::new(SearchType::Fuzzy).min_score(50.0);
    let results = store.search("weather in Boston", &options);

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].memory_id, id);
    assert_eq!(results[0].content, "Boston weather is sunny");
    assert_eq!(results[0].importance, 0.6);
    assert!(results[0].score >= 0.5);
}

#[test]
fn test_equal_scores_keep_save_order_across_types() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path());
    let first = store.save(NewMemory::new("Boston weather").memory_type("weather")).unwrap();
    let second = store.save(NewMemory::new("Boston weather").memory_type("general")).unwrap();
    let third = store.save(NewMemory::new("Boston weather").memory_type("alerts")).unwrap();

    let options = SearchOptions::new(SearchType::Fuzzy);
    let results = store.search("Boston weather", &options.clone().top_k(1));
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].memory_id, first);

    let ids: Vec<String> = store
        .search("Boston weather", &options)
        .into_iter()
        .map(|r| r.memory_id)
        .collect();
    assert_eq!(ids, vec![first, second, third]);
}

#[test]
fn test_hybrid_blends_scores() {
    let dir = tempfile::tempdir().unwrap();
    let store = keyword_store(dir.path());

    let both = store.save(NewMemory::new("alpha beta")).unwrap();
    let neither = store.save(NewMemory::new("gamma")).unwrap();
    let semantic_only = store.save(NewMemory::new("delta")).unwrap();

    let results = store.search("alpha", &SearchOptions::default());
    let ids: Vec<&str> = results.iter().map(|r| r.memory_id.as_str()).collect();
    assert_eq!(ids, vec![both.as_str(), semantic_only.as_str(), neither.as_str()]);
    assert!((results[0].score - 1.0).abs() < 1e-6);
    assert!((results[1].score - 0.7).abs() < 1e-6);
    assert!(results[2].score.abs() < 1e-6);

    let tilted = SearchOptions::default().weights(0.9, 0.1);
    let results = store.search("alpha", &tilted);
    assert_eq!(results[0].memory_id, both);
    assert!((results[1].score - 0.1).abs() < 1e-6);
}

#[test]
fn test_hybrid_without_model_is_fuzzy_only() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_with(
        dir.path(),
        Box::new(|| -> MemoryResult<Box<dyn Embedder>> {
            Err(MemoryError::ModelUnavailable("offline".to_string()))
        }),
    );
    let id = store.save(NewMemory::new("alpha beta")).unwrap();
    store.save(NewMemory::new("gamma")).unwrap();

    let results = store.search("alpha", &SearchOptions::default());
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].memory_id, id);
    assert!((results[0].score - 0.3).abs() < 1e-6);

    let semantic = store.search("alpha", &SearchOptions::new(SearchType::Semantic));
    assert!(semantic.is_empty());
}

#[test]
fn test_results_truncated_to_top_k() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path());
    for i in 0..8 {
        store.save(NewMemory::new(format!("meeting notes {}", i))).unwrap();
    }

    let fuzzy = store.search("meeting notes", &SearchOptions::new(SearchType::Fuzzy));
    assert_eq!(fuzzy.len(), 5);

    let three = SearchOptions::new(SearchType::Semantic).top_k(3);
    assert_eq!(store.search("meeting notes", &three).len(), 3);
}

#[test]
fn test_delete_removes_everywhere() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path());
    let id = store.save(NewMemory::new("temporary").memory_type("scratch")).unwrap();
    let keep = store.save(NewMemory::new("permanent")).unwrap();

    assert!(store.delete(&id));
    assert!(!store.delete(&id));
    assert!(store.load(&id).is_none());
    assert!(store.ids_for_type("scratch").is_empty());
    assert_eq!(store.get_memory_usage(&id).total_writes, 0);
    drop(store);

    let reopened = open(dir.path());
    assert!(reopened.load(&id).is_none());
    assert!(reopened.load(&keep).is_some());
    assert_eq!(reopened.len(), 1);
}

#[test]
fn test_corrupt_table_is_quarantined() {
    let dir = tempfile::tempdir().unwrap();
    let garbage = b"\x00\x01not a table".to_vec();
    fs::write(dir.path().join("memories.bin"), &garbage).unwrap();

    let store = open(dir.path());
    assert!(store.is_empty());

    let backups = store.backups().unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(fs::read(&backups[0]).unwrap(), garbage);

    let id = store.save(NewMemory::new("fresh start")).unwrap();
    drop(store);
    assert_eq!(open(dir.path()).load(&id).unwrap().content, "fresh start");
}

#[test]
fn test_corrupt_table_survives_zero_retention() {
    let dir = tempfile::tempdir().unwrap();
    let garbage = b"\x00\x01not a table".to_vec();
    let table = dir.path().join("memories.bin");
    fs::write(&table, &garbage).unwrap();

    let mut config = config(dir.path());
    config.max_backups = 0;
    let store = MemoryStore::with_embedder_loader(
        config,
        Box::new(|| -> MemoryResult<Box<dyn Embedder>> { Ok(Box::new(LiteEmbedder::new())) }),
    )
    .unwrap();
    assert!(store.is_empty());

    let backups = store.backups().unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(fs::read(&backups[0]).unwrap(), garbage);
}

#[test]
fn test_background_backups_run_and_stop_on_drop() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.backup_interval_hours = 0.02 / 3600.0;

    let store = MemoryStore::with_embedder_loader(
        config,
        Box::new(|| -> MemoryResult<Box<dyn Embedder>> { Ok(Box::new(LiteEmbedder::new())) }),
    )
    .unwrap();
    store.save(NewMemory::new("back me up")).unwrap();

    let mut waited = 0;
    while store.backups().unwrap().is_empty() && waited < 100 {
        thread::sleep(Duration::from_millis(20));
        waited += 1;
    }
    assert!(!store.backups().unwrap().is_empty());

    let backup_dir = dir.path().join("backups");
    drop(store);
    let after_drop = list_dir(&backup_dir);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(list_dir(&backup_dir), after_drop);
}

fn list_dir(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn test_backup_rotation() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path());
    assert_eq!(store.backup_now().unwrap(), None);

    store.save(NewMemory::new("worth keeping")).unwrap();
    for _ in 0..7 {
        assert!(store.backup_now().unwrap().is_some());
    }

    let backups = store.backups().unwrap();
    assert_eq!(backups.len(), 5);
    for backup in &backups {
        assert_eq!(
            fs::read(backup).unwrap(),
            fs::read(dir.path().join("memories.bin")).unwrap()
        );
    }
}

struct Broken;

impl MemoryListener for Broken {
    fn on_stored(&self, _event: &MemoryStored) -> Result<(), String> {
        Err("downstream offline".to_string())
    }
}

#[test]
fn test_listener_failure_does_not_fail_save() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    store.subscribe(Arc::new(Broken));
    store.subscribe(Arc::new(move |event: &MemoryStored| {
        sink.lock().unwrap().push((event.memory_id.clone(), event.content.clone()));
    }));

    let id = store.save(NewMemory::new("notify me")).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![(id, "notify me".to_string())]);
}

#[test]
fn test_stats_and_compression_report() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path());
    store.save(NewMemory::new("one").importance(0.2)).unwrap();
    store.save(NewMemory::new("two").importance(0.4).memory_type("task")).unwrap();
    store.save(NewMemory::new("three").importance(0.6).memory_type("task")).unwrap();

    let stats = store.get_stats();
    assert_eq!(stats.memory.total_memories, 3);
    assert_eq!(stats.memory.memories_by_type["task"], 2);
    assert_eq!(stats.memory.memories_by_type["general"], 1);
    assert!((stats.memory.avg_importance - 0.4).abs() < 1e-9);

    let compression = &stats.compression;
    assert!(compression.compression_count >= 3);
    assert!(compression.total_original_size > 0);
    assert!(compression.last_compression.is_some());
    assert_eq!(compression.daily.len(), 1);
}

#[test]
fn test_concurrent_saves_get_unique_ids() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(open(dir.path()));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                (0..10)
                    .map(|i| store.save(NewMemory::new(format!("thread {} item {}", t, i))).unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let ids: HashSet<String> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    assert_eq!(ids.len(), 40);
    assert_eq!(store.len(), 40);
    assert_eq!(store.ids_for_type("general").len(), 40);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_saved_memories_survive_reopen(
        content in "[a-z][a-z0-9 ]{0,40}",
        importance in 0.0f64..=1.0,
        memory_type in "[a-z]{1,10}",
    ) {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = open(dir.path());
            store
                .save(NewMemory::new(content.clone()).importance(importance).memory_type(memory_type.clone()))
                .unwrap()
        };

        let store = open(dir.path());
        let memory = store.load(&id).unwrap();
        prop_assert_eq!(memory.content, content);
        prop_assert_eq!(memory.importance, importance);
        prop_assert_eq!(&memory.memory_type, &memory_type);
        prop_assert_eq!(store.ids_for_type(&memory_type), vec![id]);
    }
}
