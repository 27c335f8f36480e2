//! Leveled compaction: trigger policy, file selection, and the k-way merge
//! that moves data one level deeper.
//!
//! `pick_compaction` is the seam between "what to compact" and "how to
//! merge it" — selection only reads a `Version` snapshot, and the merge
//! step in [`execute`] is the only part that touches the filesystem. A
//! single background worker drains jobs from a bounded `crossbeam_channel`
//! so automatic compaction never runs on the caller's write path.


use std::collections::BinaryHeap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{Sender, bounded};
use thiserror::Error;
use tracing::{debug, info};

use crate::sstable::{SSTableError, SstReader, SstWriter};
use crate::version::{FileMetadata, Version, VersionEdit, VersionError, VersionSet};

/// Errors produced while picking or executing a compaction.
#[derive(Debug, Error)]
pub enum CompactionError {
    #[error("compaction sstable error: {0}")]
    SSTable(#[from] SSTableError),

    #[error("compaction version error: {0}")]
    Version(#[from] VersionError),
}

/// Tunables governing the trigger policy and merge output sizing.
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    pub l0_compaction_trigger: usize,
    pub max_level: usize,
    pub level_size_multiplier: u64,
    pub level_target_file_size_base: u64,
    pub bloom_fp_rate: Option<f64>,
}

impl CompactionConfig {
    /// Trigger threshold for `level >= 1`: `base * multiplier^(level - 1)`.
    pub fn level_trigger_size(&self, level: usize) -> u64 {
        self.level_target_file_size_base
            * self
                .level_size_multiplier
                .saturating_pow((level - 1) as u32)
    }

    /// Target per-file byte size for compaction output written at `level`.
    pub fn target_file_size(&self, level: usize) -> u64 {
        self.level_target_file_size_base
            * self.level_size_multiplier.saturating_pow(level as u32)
    }
}

/// A selected set of input files to merge from `input_level` into
/// `output_level`.
#[derive(Debug)]
pub struct CompactionJob {
    pub input_level: usize,
    pub output_level: usize,
    pub inputs: Vec<Arc<FileMetadata>>,
}

/// Evaluates the trigger policy against `version`: L0 file count first,
/// then per-level byte size for levels `>= 1`.
pub fn needs_compaction(version: &Version, config: &CompactionConfig) -> bool {
    pick_compaction(version, config).is_some()
}

/// Picks the next compaction job, if any level satisfies its trigger.
pub fn pick_compaction(version: &Version, config: &CompactionConfig) -> Option<CompactionJob> {
    if version.files(0).len() > config.l0_compaction_trigger {
        return Some(pick_l0(version, config));
    }
    for level in 1..config.max_level {
        if version.level_size(level) > config.level_trigger_size(level) {
            return Some(pick_level(version, level));
        }
    }
    None
}

fn pick_l0(version: &Version, config: &CompactionConfig) -> CompactionJob {
    let mut l0_files: Vec<Arc<FileMetadata>> = version.files(0).to_vec();
    l0_files.sort_by_key(|f| f.file_number);
    l0_files.truncate(config.l0_compaction_trigger.max(1));

    let lo = l0_files
        .iter()
        .map(|f| f.smallest_key.clone())
        .min()
        .unwrap_or_default();
    let hi = l0_files
        .iter()
        .map(|f| f.largest_key.clone())
        .max()
        .unwrap_or_default();

    let mut inputs = l0_files;
    for f in version.files(1) {
        if f.overlaps_range(Some(&lo), Some(&hi)) {
            inputs.push(Arc::clone(f));
        }
    }

    CompactionJob {
        input_level: 0,
        output_level: 1,
        inputs,
    }
}

fn pick_level(version: &Version, level: usize) -> CompactionJob {
    let files = version.files(level);
    // Round-robin by smallest-key policy: always take the first (levels
    // are kept sorted ascending by smallest key), which cycles through the
    // level over successive compactions as files are replaced.
    let chosen = files.first().cloned();
    // No level below the bottommost one: merge in place there instead.
    let output_level = if level + 1 < version.level_count() {
        level + 1
    } else {
        level
    };

    let mut inputs = Vec::new();
    if let Some(chosen) = chosen {
        let overlap_lo = chosen.smallest_key.clone();
        let overlap_hi = chosen.largest_key.clone();
        inputs.push(chosen);
        if output_level != level {
            for f in version.files(output_level) {
                if f.overlaps_range(Some(&overlap_lo), Some(&overlap_hi)) {
                    inputs.push(Arc::clone(f));
                }
            }
        }
    }

    CompactionJob {
        input_level: level,
        output_level,
        inputs,
    }
}

/// Source of one merge input: its level (for recency precedence) and file
/// number (for L0 tie-breaking), plus an ascending `(key, value)` cursor.
struct MergeSource<'a> {
    level: u32,
    file_number: u64,
    iter: crate::sstable::RangeIter<'a>,
    peeked: Option<(Vec<u8>, Vec<u8>)>,
}

impl<'a> MergeSource<'a> {
    fn new(level: u32, file_number: u64, mut iter: crate::sstable::RangeIter<'a>) -> Self {
        let peeked = iter.next();
        Self {
            level,
            file_number,
            iter,
            peeked,
        }
    }

    fn advance(&mut self) {
        self.peeked = self.iter.next();
    }
}

/// Heap entry ordered so that `BinaryHeap` (a max-heap) pops the
/// lexicographically smallest key first, with ties broken toward the
/// newer source (lower level; within equal level, higher file number).
struct HeapEntry {
    key: Vec<u8>,
    level: u32,
    file_number: u64,
    source_idx: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse key order (max-heap -> smallest key first), then prefer
        // the newer source on ties so it is popped first.
        other
            .key
            .cmp(&self.key)
            .then_with(|| self.level.cmp(&other.level).reverse())
            .then_with(|| self.file_number.cmp(&other.file_number))
    }
}

/// Runs the k-way merge described by `job` and writes the result as one or
/// more SSTables at `job.output_level`, bounded by `target_file_size`.
/// Tombstones are dropped when `job.output_level` is the deepest level
/// this compaction can reach (the conservative, spec-sanctioned policy).
pub fn execute(
    job: CompactionJob,
    db_path: &Path,
    version_set: &VersionSet,
    config: &CompactionConfig,
) -> Result<VersionEdit, CompactionError> {
    let readers: Vec<SstReader> = job
        .inputs
        .iter()
        .map(|f| SstReader::open(VersionSet::sst_path(db_path, f.file_number)))
        .collect::<Result<_, _>>()?;

    let drop_tombstones = job.output_level >= config.max_level - 1;

    let mut sources: Vec<MergeSource<'_>> = readers
        .iter()
        .zip(&job.inputs)
        .map(|(reader, meta)| {
            MergeSource::new(meta.level, meta.file_number, reader.range(None, None))
        })
        .collect();

    let mut heap = BinaryHeap::new();
    for (idx, source) in sources.iter().enumerate() {
        if let Some((key, _)) = &source.peeked {
            heap.push(HeapEntry {
                key: key.clone(),
                level: source.level,
                file_number: source.file_number,
                source_idx: idx,
            });
        }
    }

    let target_file_size = config.target_file_size(job.output_level);
    let mut outputs = Vec::new();
    let mut current_batch: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    let mut current_batch_size: u64 = 0;
    let mut last_key: Option<Vec<u8>> = None;

    while let Some(top) = heap.pop() {
        let (key, value) = sources[top.source_idx]
            .peeked
            .clone()
            .expect("heap entry always mirrors a peeked value");
        sources[top.source_idx].advance();
        if let Some((next_key, _)) = &sources[top.source_idx].peeked {
            heap.push(HeapEntry {
                key: next_key.clone(),
                level: sources[top.source_idx].level,
                file_number: sources[top.source_idx].file_number,
                source_idx: top.source_idx,
            });
        }

        // Drain and discard every stale duplicate of this key from other
        // sources: the newest value (this `top` entry) already won.
        while let Some(dup) = heap.peek() {
            if dup.key != key {
                break;
            }
            let dup = heap.pop().expect("peeked entry exists");
            sources[dup.source_idx].advance();
            if let Some((next_key, _)) = &sources[dup.source_idx].peeked {
                heap.push(HeapEntry {
                    key: next_key.clone(),
                    level: sources[dup.source_idx].level,
                    file_number: sources[dup.source_idx].file_number,
                    source_idx: dup.source_idx,
                });
            }
        }

        if last_key.as_ref() == Some(&key) {
            continue;
        }
        last_key = Some(key.clone());

        if value.is_empty() && drop_tombstones {
            continue;
        }

        current_batch_size += key.len() as u64 + value.len() as u64;
        current_batch.push((key, value));

        if current_batch_size >= target_file_size {
            outputs.push(std::mem::take(&mut current_batch));
            current_batch_size = 0;
        }
    }
    if !current_batch.is_empty() {
        outputs.push(current_batch);
    }

    let mut added = Vec::with_capacity(outputs.len());
    let mut next_file_number = None;
    for batch in outputs {
        let file_number = version_set.new_file_number();
        next_file_number = Some(file_number + 1);
        let path = VersionSet::sst_path(db_path, file_number);
        let smallest_key = batch.first().unwrap().0.clone();
        let largest_key = batch.last().unwrap().0.clone();
        let info = SstWriter::new(&path, config.bloom_fp_rate).build(batch)?;
        added.push(FileMetadata {
            file_number,
            file_size: info.file_size,
            smallest_key,
            largest_key,
            level: job.output_level as u32,
        });
    }

    let deleted = job
        .inputs
        .iter()
        .map(|f| (f.level, f.file_number))
        .collect();

    info!(
        input_level = job.input_level,
        output_level = job.output_level,
        inputs = deleted.len(),
        outputs = added.len(),
        "compaction merge complete"
    );

    Ok(VersionEdit {
        deleted,
        added,
        next_file_number,
        last_sequence: None,
    })
}

/// Runs one compaction pass (pick + execute + commit) if any level needs
/// it. Returns `true` if a compaction ran.
pub fn run_once(
    version_set: &VersionSet,
    db_path: &Path,
    config: &CompactionConfig,
) -> Result<bool, CompactionError> {
    let version = version_set.current();
    let Some(job) = pick_compaction(&version, config) else {
        return Ok(false);
    };
    debug!(
        input_level = job.input_level,
        inputs = job.inputs.len(),
        "compaction starting"
    );
    let edit = execute(job, db_path, version_set, config)?;
    version_set.apply(edit)?;
    Ok(true)
}

/// Repeatedly runs compactions until no level satisfies its trigger.
pub fn run_until_settled(
    version_set: &VersionSet,
    db_path: &Path,
    config: &CompactionConfig,
) -> Result<(), CompactionError> {
    while run_once(version_set, db_path, config)? {}
    Ok(())
}

/// A job sent to the background compaction worker.
enum Job {
    /// Run compactions until no level needs one.
    RunUntilSettled,
    Shutdown,
}

/// A handle to the single background compaction thread. Dropping it
/// requests a graceful shutdown and joins the thread.
pub struct CompactionHandle {
    sender: Sender<Job>,
    join: Option<JoinHandle<()>>,
}

impl CompactionHandle {
    /// Spawns the worker thread, fed by a bounded channel (capacity 1:
    /// only one pending compaction request is ever meaningful, since a
    /// request just means "check again").
    pub fn spawn(version_set: Arc<VersionSet>, db_path: PathBuf, config: CompactionConfig) -> Self {
        let (sender, receiver) = bounded::<Job>(1);
        let join = std::thread::spawn(move || {
            for job in receiver {
                match job {
                    Job::RunUntilSettled => {
                        if let Err(e) = run_until_settled(&version_set, &db_path, &config) {
                            tracing::warn!(error = %e, "background compaction failed");
                        }
                    }
                    Job::Shutdown => break,
                }
            }
        });
        Self {
            sender,
            join: Some(join),
        }
    }

    /// Enqueues a compaction check. Non-blocking: if one is already
    /// pending, this is a no-op (the pending one will observe the same
    /// trigger state this call would have).
    pub fn request(&self) {
        let _ = self.sender.try_send(Job::RunUntilSettled);
    }
}

impl Drop for CompactionHandle {
    fn drop(&mut self) {
        let _ = self.sender.send(Job::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
