//! Writes a sorted run of `(key, value)` pairs to a new SSTable file.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::bloom::BloomFilter;

use super::{FOOTER_SIZE, MAGIC, SSTableError};

/// Summary returned after a successful build, used by the caller to record
/// file metadata without reopening the file.
#[derive(Debug, Clone)]
pub struct SstInfo {
    pub smallest_key: Vec<u8>,
    pub largest_key: Vec<u8>,
    pub entry_count: u64,
    pub file_size: u64,
}

/// One-shot builder: consumes an already-deduplicated, arbitrary-order set
/// of entries and writes them out as a single immutable SSTable file.
///
/// Construction is atomic from the point of view of readers: the file is
/// built under a `.tmp` name and renamed into place only once every byte
/// has been fsynced.
pub struct SstWriter {
    path: PathBuf,
    bloom_fp_rate: Option<f64>,
}

impl SstWriter {
    /// `bloom_fp_rate`: `Some(rate)` to build a Bloom filter sized for the
    /// entry count at that false-positive rate, `None` to omit one.
    pub fn new(path: impl Into<PathBuf>, bloom_fp_rate: Option<f64>) -> Self {
        Self {
            path: path.into(),
            bloom_fp_rate,
        }
    }

    /// Builds the file from `entries`. `entries` need not be pre-sorted;
    /// they are sorted here and the last write for a duplicate key wins,
    /// matching memtable-flush semantics.
    pub fn build(self, mut entries: Vec<(Vec<u8>, Vec<u8>)>) -> Result<SstInfo, SSTableError> {
        if entries.is_empty() {
            return Err(SSTableError::Corrupt(
                "cannot build an sstable with no entries".into(),
            ));
        }

        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.dedup_by(|a, b| {
            if a.0 == b.0 {
                std::mem::swap(a, b);
                true
            } else {
                false
            }
        });

        let tmp_path = tmp_path_for(&self.path);
        let file = File::create(&tmp_path)?;
        let mut w = BufWriter::new(file);

        let mut offsets = Vec::with_capacity(entries.len());
        let mut pos: u64 = 0;
        for (key, value) in &entries {
            offsets.push(pos);
            w.write_all(&(key.len() as u32).to_be_bytes())?;
            w.write_all(&(value.len() as u32).to_be_bytes())?;
            w.write_all(key)?;
            w.write_all(value)?;
            pos += 8 + key.len() as u64 + value.len() as u64;
        }

        let bloom_offset = if let Some(fp_rate) = self.bloom_fp_rate {
            let mut filter = BloomFilter::with_capacity(entries.len(), fp_rate);
            for (key, _) in &entries {
                filter.add(key);
            }
            let bytes = filter.serialize();
            let offset = pos;
            w.write_all(&(bytes.len() as u32).to_be_bytes())?;
            w.write_all(&bytes)?;
            pos += 4 + bytes.len() as u64;
            offset
        } else {
            0
        };

        let index_offset = pos;
        w.write_all(&(entries.len() as u32).to_be_bytes())?;
        for ((key, _), offset) in entries.iter().zip(&offsets) {
            w.write_all(&(key.len() as u32).to_be_bytes())?;
            w.write_all(key)?;
            w.write_all(&offset.to_be_bytes())?;
        }

        w.write_all(&index_offset.to_be_bytes())?;
        w.write_all(&bloom_offset.to_be_bytes())?;
        w.write_all(&MAGIC)?;

        w.flush()?;
        w.get_ref().sync_all()?;
        drop(w);

        fs::rename(&tmp_path, &self.path)?;
        sync_parent_dir(&self.path)?;

        let file_size = fs::metadata(&self.path)?.len();
        debug_assert!(file_size as usize >= FOOTER_SIZE);

        let smallest_key = entries.first().unwrap().0.clone();
        let largest_key = entries.last().unwrap().0.clone();
        debug!(
            path = %self.path.display(),
            entries = entries.len(),
            file_size,
            "sstable written"
        );

        Ok(SstInfo {
            smallest_key,
            largest_key,
            entry_count: entries.len() as u64,
            file_size,
        })
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn sync_parent_dir(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}
