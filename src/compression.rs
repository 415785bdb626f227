//! zlib codec for the persisted memory table.
//!
//! The codec keeps running statistics of everything it compresses or
//! decompresses, bucketed per calendar day (UTC).

use crate::error::MemoryResult;
use crate::types::{CompressionReport, DailyCompression, Memory};
use chrono::{DateTime, Utc};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

pub const DEFAULT_LEVEL: u32 = 3;
const MAX_LEVEL: u32 = 9;

/// Totals for one calendar day
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DayBucket {
    pub original_size: u64,
    pub compressed_size: u64,
    pub count: u64,
}

/// Running compression statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompressionStats {
    pub total_original_size: u64,
    pub total_compressed_size: u64,
    pub compression_count: u64,
    pub last_compression: Option<DateTime<Utc>>,
    history: BTreeMap<String, DayBucket>,
}

impl CompressionStats {
    pub fn update(&mut self, original_size: u64, compressed_size: u64) {
        self.update_at(original_size, compressed_size, Utc::now());
    }

    pub fn update_at(&mut self, original_size: u64, compressed_size: u64, at: DateTime<Utc>) {
        self.total_original_size += original_size;
        self.total_compressed_size += compressed_size;
        self.compression_count += 1;
        self.last_compression = Some(at);

        let bucket = self
            .history
            .entry(at.format("%Y-%m-%d").to_string())
            .or_default();
        bucket.original_size += original_size;
        bucket.compressed_size += compressed_size;
        bucket.count += 1;
    }

    /// Compressed size over original size; 0 before any data
    pub fn ratio(&self) -> f64 {
        if self.total_original_size == 0 {
            return 0.0;
        }
        self.total_compressed_size as f64 / self.total_original_size as f64
    }

    /// Bytes saved; negative when tiny inputs grew
    pub fn space_saved(&self) -> i64 {
        self.total_original_size as i64 - self.total_compressed_size as i64
    }

    /// The most recent `days` buckets, newest first
    pub fn get_daily_stats(&self, days: usize) -> Vec<DailyCompression> {
        self.history
            .iter()
            .rev()
            .take(days)
            .map(|(date, b)| DailyCompression {
                date: date.clone(),
                original_size: b.original_size,
                compressed_size: b.compressed_size,
                count: b.count,
                ratio: if b.original_size > 0 {
                    b.compressed_size as f64 / b.original_size as f64
                } else {
                    0.0
                },
            })
            .collect()
    }
}

/// Lossless codec with a fixed compression level
pub struct Codec {
    level: Compression,
    stats: Mutex<CompressionStats>,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(DEFAULT_LEVEL)
    }
}

impl Codec {
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(MAX_LEVEL)),
            stats: Mutex::new(CompressionStats::default()),
        }
    }

    pub fn level(&self) -> u32 {
        self.level.level()
    }

    // Held for the whole call so stats always match the bytes produced
    fn lock(&self) -> MutexGuard<'_, CompressionStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn compress(&self, data: &[u8]) -> MemoryResult<Vec<u8>> {
        let mut stats = self.lock();

        let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), self.level);
        encoder.write_all(data)?;
        let compressed = encoder.finish()?;

        stats.update(data.len() as u64, compressed.len() as u64);
        Ok(compressed)
    }

    pub fn decompress(&self, data: &[u8]) -> MemoryResult<Vec<u8>> {
        let mut stats = self.lock();

        let mut decoder = ZlibDecoder::new(data);
        let mut out = Vec::with_capacity(data.len() * 2);
        decoder.read_to_end(&mut out)?;

        stats.update(out.len() as u64, data.len() as u64);
        Ok(out)
    }

    /// Stream-compress `input` into `output`
    pub fn compress_file(&self, input: &Path, output: &Path) -> MemoryResult<()> {
        let mut stats = self.lock();

        let mut reader = BufReader::new(File::open(input)?);
        let writer = BufWriter::new(File::create(output)?);
        let mut encoder = ZlibEncoder::new(writer, self.level);

        let original = io::copy(&mut reader, &mut encoder)?;
        let mut writer = encoder.finish()?;
        writer.flush()?;
        drop(writer);

        let compressed = fs::metadata(output)?.len();
        stats.update(original, compressed);
        Ok(())
    }

    /// Stream-decompress `input` into `output`
    pub fn decompress_file(&self, input: &Path, output: &Path) -> MemoryResult<()> {
        let mut stats = self.lock();

        let compressed = fs::metadata(input)?.len();
        let mut decoder = ZlibDecoder::new(BufReader::new(File::open(input)?));
        let mut writer = BufWriter::new(File::create(output)?);

        let original = io::copy(&mut decoder, &mut writer)?;
        writer.flush()?;

        stats.update(original, compressed);
        Ok(())
    }

    /// Compress a single record as JSON
    pub fn compress_record(&self, memory: &Memory) -> MemoryResult<Vec<u8>> {
        let json = memory.to_json()?;
        self.compress(json.as_bytes())
    }

    /// Invalid UTF-8 or JSON in the payload is a `Serialization` error
    pub fn decompress_record(&self, data: &[u8]) -> MemoryResult<Memory> {
        let raw = self.decompress(data)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Snapshot of the running statistics
    pub fn stats(&self) -> CompressionStats {
        self.lock().clone()
    }

    pub fn get_daily_stats(&self, days: usize) -> Vec<DailyCompression> {
        self.lock().get_daily_stats(days)
    }

    pub fn report(&self, days: usize) -> CompressionReport {
        let stats = self.lock();
        CompressionReport {
            ratio: stats.ratio(),
            space_saved: stats.space_saved(),
            total_original_size: stats.total_original_size,
            total_compressed_size: stats.total_compressed_size,
            compression_count: stats.compression_count,
            last_compression: stats.last_compression,
            daily: stats.get_daily_stats(days),
        }
    }
}
