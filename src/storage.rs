//! On-disk layout of a memory store.
//!
//! ```text
//! <base>/memories.bin        zlib-compressed JSON table (id -> record)
//! <base>/memory_index.json   type -> ids, plain JSON
//! <base>/backups/            timestamped copies of memories.bin
//! ```

use crate::compression::Codec;
use crate::error::{MemoryError, MemoryResult};
use crate::index::TypeIndex;
use crate::types::Memory;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const TABLE_FILE: &str = "memories.bin";
pub const INDEX_FILE: &str = "memory_index.json";
pub const BACKUP_DIR: &str = "backups";

/// The record table, keyed by memory id
pub type Table = BTreeMap<String, Memory>;

/// Paths of the persisted state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    base: PathBuf,
}

impl StorageLayout {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn table_path(&self) -> PathBuf {
        self.base.join(TABLE_FILE)
    }

    pub fn index_path(&self) -> PathBuf {
        self.base.join(INDEX_FILE)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.base.join(BACKUP_DIR)
    }

    fn plain_temp(&self) -> PathBuf {
        self.base.join(format!("{}.json.tmp", TABLE_FILE))
    }

    fn packed_temp(&self) -> PathBuf {
        self.base.join(format!("{}.tmp", TABLE_FILE))
    }

    pub fn create_dirs(&self) -> MemoryResult<()> {
        fs::create_dir_all(&self.base)?;
        fs::create_dir_all(self.backup_dir())?;
        Ok(())
    }

    /// Write the whole table: JSON to a temp file, stream-compress it to a
    /// second temp file, then rename over the table
    pub fn write_table(&self, table: &Table, codec: &Codec) -> MemoryResult<()> {
        let plain = self.plain_temp();
        let packed = self.packed_temp();

        let result = (|| -> MemoryResult<()> {
            let mut writer = BufWriter::new(File::create(&plain)?);
            serde_json::to_writer(&mut writer, table)?;
            writer.flush()?;
            drop(writer);
            codec.compress_file(&plain, &packed)?;
            fs::rename(&packed, self.table_path())?;
            Ok(())
        })();

        let _ = fs::remove_file(&plain);
        if result.is_err() {
            let _ = fs::remove_file(&packed);
        }
        result
    }

    /// Read the table; `Ok(None)` when nothing has been persisted yet.
    ///
    /// Any decompression or parse failure is reported as `Corrupt`.
    pub fn read_table(&self, codec: &Codec) -> MemoryResult<Option<Table>> {
        let path = self.table_path();
        if !path.exists() {
            return Ok(None);
        }

        let plain = self.plain_temp();
        let corrupt = |reason: String| MemoryError::Corrupt {
            path: path.clone(),
            reason,
        };

        let result = codec
            .decompress_file(&path, &plain)
            .map_err(|e| corrupt(e.to_string()))
            .and_then(|_| {
                let file = File::open(&plain)?;
                serde_json::from_reader::<_, Table>(BufReader::new(file))
                    .map_err(|e| corrupt(e.to_string()))
            });

        let _ = fs::remove_file(&plain);
        result.map(Some)
    }

    pub fn write_index(&self, index: &TypeIndex) -> MemoryResult<()> {
        index.save(&self.index_path())
    }

    /// Read the index; `Ok(None)` when the file does not exist
    pub fn read_index(&self) -> MemoryResult<Option<TypeIndex>> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(None);
        }
        TypeIndex::load(&path).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn table() -> Table {
        let mut table = Table::new();
        table.insert(
            "general_1".to_string(),
            Memory {
                content: "hello".to_string(),
                timestamp: Utc::now(),
                importance: 0.5,
                context: None,
                source: Some("test".to_string()),
                memory_type: "general".to_string(),
            },
        );
        table
    }

    #[test]
    fn test_table_roundtrip_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        layout.create_dirs().unwrap();
        let codec = Codec::default();

        let table = table();
        layout.write_table(&table, &codec).unwrap();
        assert_eq!(layout.read_table(&codec).unwrap(), Some(table));

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec![BACKUP_DIR, TABLE_FILE]);
    }

    #[test]
    fn test_table_file_is_compressed() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        layout.create_dirs().unwrap();

        layout.write_table(&table(), &Codec::default()).unwrap();
        let raw = fs::read(layout.table_path()).unwrap();
        assert!(serde_json::from_slice::<Table>(&raw).is_err());
    }

    #[test]
    fn test_missing_files_read_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());

        assert_eq!(layout.read_table(&Codec::default()).unwrap(), None);
        assert_eq!(layout.read_index().unwrap(), None);
    }

    #[test]
    fn test_garbage_table_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        layout.create_dirs().unwrap();
        fs::write(layout.table_path(), b"\x00\x01garbage bytes").unwrap();

        let err = layout.read_table(&Codec::default()).unwrap_err();
        assert!(matches!(err, MemoryError::Corrupt { .. }));
    }

    #[test]
    fn test_valid_zlib_invalid_json_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        layout.create_dirs().unwrap();
        let codec = Codec::default();
        fs::write(layout.table_path(), codec.compress(b"[1, 2, 3]").unwrap()).unwrap();

        assert!(matches!(
            layout.read_table(&codec),
            Err(MemoryError::Corrupt { .. })
        ));
    }
}
