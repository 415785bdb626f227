//! memvault - persistent memory for assistants.
//!
//! A `MemoryStore` keeps short text records with metadata, persists them as a
//! compressed table, ranks them with fuzzy, semantic or hybrid search, and
//! rotates timestamped backups in the background.
//!
//! ```no_run
//! use memvault::{MemoryConfig, MemoryStore, NewMemory, SearchOptions};
//!
//! let store = MemoryStore::open(MemoryConfig::at("/tmp/memvault"))?;
//! store.save(NewMemory::new("The weather in Boston is sunny").memory_type("weather"))?;
//! let hits = store.search("Boston weather", &SearchOptions::default());
//! # Ok::<(), memvault::MemoryError>(())
//! ```

pub mod analytics;
pub mod backup;
pub mod compression;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod events;
pub mod index;
pub mod memory;
pub mod search;
pub mod storage;
pub mod types;

pub use config::MemoryConfig;
pub use embeddings::{Embedder, EmbedderLoader, LiteEmbedder};
pub use error::{MemoryError, MemoryResult};
pub use events::{MemoryListener, MemoryStored};
pub use memory::MemoryStore;
pub use search::{HybridWeights, SearchOptions};
pub use types::{
    AccessPatterns, CompressionReport, Context, Memory, MemoryStats, NewMemory, SearchResult,
    SearchType, StoreStats,
};
