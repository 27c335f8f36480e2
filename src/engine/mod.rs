//! Engine façade — binds the WAL, memtable, version set, and compaction
//! into the single entry point the rest of the world sees.
//!
//! # Write path
//! `put` appends to the WAL, inserts into the memtable, flushes to a new
//! L0 SSTable once the memtable's byte footprint crosses
//! [`EngineConfig::memtable_size_threshold`], and every
//! [`EngineConfig::compaction_check_interval`] writes asks the compaction
//! worker to check the trigger policy.
//!
//! # Read path
//! `get` checks the memtable first, then SSTables newest-to-oldest: L0
//! files in reverse file-number order, then levels `>= 1` via binary
//! search over their (non-overlapping) key ranges. `scan` merges the
//! memtable with the per-level union, letting newer sources shadow older
//! ones, and drops tombstones from the result.
//!
//! # Concurrency
//! A single `RwLock<ActiveState>` stands in for the "coarse engine-level
//! mutex" in the design: writers take it exclusively for the WAL-append +
//! memtable-insert + (possibly) flush sequence; readers take it briefly
//! to clone out `Arc<Memtable>` and snapshot the current `Version`, then
//! release it before doing any I/O. A version snapshot pins every file it
//! references even if a concurrent compaction installs a newer version.


use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{debug, info};

use crate::compaction::{self, CompactionConfig, CompactionError, CompactionHandle};
use crate::memtable::{Memtable, MemtableError};
use crate::sstable::{SSTableError, SstReader, SstWriter};
use crate::version::{FileMetadata, VersionEdit, VersionError, VersionSet};
use crate::wal::{self, Wal, WalEntry, WalError};

/// Active WAL filename under the database directory.
const WAL_FILENAME: &str = "wal";

/// Errors produced by engine operations. Aggregates every subsystem error
/// plus the boundary-level kinds spec'd at the engine façade.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("wal error: {0}")]
    Wal(#[from] WalError),

    #[error("memtable error: {0}")]
    Memtable(#[from] MemtableError),

    #[error("sstable error: {0}")]
    SSTable(#[from] SSTableError),

    #[error("version error: {0}")]
    Version(#[from] VersionError),

    #[error("compaction error: {0}")]
    Compaction(#[from] CompactionError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A caller-supplied argument violated a boundary invariant (empty key,
    /// inverted scan range).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `EngineConfig` carried a nonsensical combination of tunables.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation attempted on an engine past [`Engine::close`].
    #[error("engine is closed")]
    Closed,
}

/// Tunables for an [`Engine`] instance. Every field maps to a spec'd
/// configuration option; defaults match spec §6 exactly.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Memtable byte footprint that triggers a flush.
    pub memtable_size_threshold: usize,
    /// Fixed block size for the WAL and SSTable on-disk layout.
    pub sstable_block_size: u32,
    /// Whether flushed/compacted SSTables carry a Bloom filter.
    pub use_bloom_filter: bool,
    /// Target bits-per-key when `use_bloom_filter` sizing is driven by the
    /// false-positive rate rather than an explicit bits-per-key knob.
    pub bloom_filter_bits_per_key: u32,
    /// Target false-positive rate used to size new Bloom filters.
    pub bloom_filter_false_positive_rate: f64,
    /// Whether a background worker checks the compaction trigger policy.
    pub enable_automatic_compaction: bool,
    /// L0 file count that triggers an L0→L1 compaction.
    pub l0_compaction_trigger: usize,
    /// Number of levels tracked, `0..compaction_max_level`.
    pub compaction_max_level: usize,
    /// Per-level size multiplier: level `L`'s trigger is
    /// `base * multiplier^(L-1)`.
    pub compaction_level_size_multiplier: u64,
    /// Base byte size `compaction_level_size_multiplier` scales from.
    pub compaction_level_target_file_size_base: u64,
    /// Writes between automatic compaction-trigger checks.
    pub compaction_check_interval: u64,
    /// WAL append fsync policy: force an fsync once the file has grown by
    /// this many bytes since the last one.
    pub write_buffer_size: u64,
    /// WAL append fsync policy: force an fsync once this much time has
    /// elapsed since the last one. Zero means "every append" (the
    /// conservative spec'd default).
    pub wal_flush_interval_ms: u64,
    /// Soft cap on cached SSTable reader handles.
    pub max_open_files: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memtable_size_threshold: 4 * 1024 * 1024,
            sstable_block_size: 4096,
            use_bloom_filter: true,
            bloom_filter_bits_per_key: 10,
            bloom_filter_false_positive_rate: 0.01,
            enable_automatic_compaction: true,
            l0_compaction_trigger: 4,
            compaction_max_level: 7,
            compaction_level_size_multiplier: 10,
            compaction_level_target_file_size_base: 1024 * 1024,
            compaction_check_interval: 100,
            write_buffer_size: 64 * 1024,
            wal_flush_interval_ms: 0,
            max_open_files: 256,
        }
    }
}

impl EngineConfig {
    fn validate(&self) -> Result<(), EngineError> {
        if self.memtable_size_threshold == 0 {
            return Err(EngineError::InvalidConfig(
                "memtable_size_threshold must be > 0".into(),
            ));
        }
        if self.sstable_block_size < 32 {
            return Err(EngineError::InvalidConfig(
                "sstable_block_size must be >= 32".into(),
            ));
        }
        if self.l0_compaction_trigger == 0 {
            return Err(EngineError::InvalidConfig(
                "l0_compaction_trigger must be >= 1".into(),
            ));
        }
        if self.compaction_max_level < 2 {
            return Err(EngineError::InvalidConfig(
                "compaction_max_level must be >= 2".into(),
            ));
        }
        if self.compaction_level_size_multiplier < 1 {
            return Err(EngineError::InvalidConfig(
                "compaction_level_size_multiplier must be >= 1".into(),
            ));
        }
        if self.compaction_level_target_file_size_base == 0 {
            return Err(EngineError::InvalidConfig(
                "compaction_level_target_file_size_base must be > 0".into(),
            ));
        }
        if self.compaction_check_interval == 0 {
            return Err(EngineError::InvalidConfig(
                "compaction_check_interval must be >= 1".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.bloom_filter_false_positive_rate) {
            return Err(EngineError::InvalidConfig(
                "bloom_filter_false_positive_rate must be in [0.0, 1.0)".into(),
            ));
        }
        Ok(())
    }

    fn compaction_config(&self) -> CompactionConfig {
        CompactionConfig {
            l0_compaction_trigger: self.l0_compaction_trigger,
            max_level: self.compaction_max_level,
            level_size_multiplier: self.compaction_level_size_multiplier,
            level_target_file_size_base: self.compaction_level_target_file_size_base,
            bloom_fp_rate: self
                .use_bloom_filter
                .then_some(self.bloom_filter_false_positive_rate),
        }
    }
}

/// Per-level file counts and byte sizes, plus in-memory footprint. Backs
/// the engine `info` operation and the CLI's `info` subcommand.
#[derive(Debug, Clone)]
pub struct EngineStats {
    pub level_file_counts: Vec<usize>,
    pub level_byte_sizes: Vec<u64>,
    pub memtable_entries: usize,
    pub memtable_bytes: usize,
}

struct ActiveState {
    memtable: Arc<Memtable>,
    wal: Arc<Wal<WalEntry>>,
}

/// A small fixed-capacity cache of open [`SstReader`] handles, keyed by
/// file number, approximating [`EngineConfig::max_open_files`].
struct ReaderCache {
    handles: HashMap<u64, Arc<SstReader>>,
    order: VecDeque<u64>,
    capacity: usize,
}

impl ReaderCache {
    fn new(capacity: usize) -> Self {
        Self {
            handles: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn get_or_open(&mut self, db_path: &Path, file_number: u64) -> Result<Arc<SstReader>, SSTableError> {
        if let Some(reader) = self.handles.get(&file_number) {
            return Ok(Arc::clone(reader));
        }
        let reader = Arc::new(SstReader::open(VersionSet::sst_path(db_path, file_number))?);
        if self.handles.len() >= self.capacity
            && let Some(evicted) = self.order.pop_front()
        {
            self.handles.remove(&evicted);
        }
        self.handles.insert(file_number, Arc::clone(&reader));
        self.order.push_back(file_number);
        Ok(reader)
    }

    /// Drops every cached handle referencing `file_number` (called after a
    /// compaction removes that file, so a stale mmap is not reused).
    fn invalidate(&mut self, file_number: u64) {
        self.handles.remove(&file_number);
        self.order.retain(|n| *n != file_number);
    }
}

/// The embedded LSM storage engine: binds the WAL, memtable, version set,
/// and compaction into one façade.
pub struct Engine {
    db_path: PathBuf,
    config: EngineConfig,
    compaction_config: CompactionConfig,
    active: RwLock<ActiveState>,
    version_set: Arc<VersionSet>,
    readers: Mutex<ReaderCache>,
    write_count: AtomicU64,
    compaction_handle: Option<CompactionHandle>,
    closed: AtomicBool,
}

impl Engine {
    /// Opens (or creates) a database at `db_path`, recovering the
    /// MANIFEST and replaying the WAL into a fresh memtable.
    pub fn open(db_path: impl AsRef<Path>, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let db_path = db_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&db_path)?;

        let version_set = Arc::new(VersionSet::recover(&db_path, config.compaction_max_level)?);
        version_set.cleanup_orphans()?;

        let wal_path = db_path.join(WAL_FILENAME);
        let entries = Wal::<WalEntry>::replay(&wal_path)?;
        let memtable = Memtable::new();
        for entry in entries {
            match entry.value {
                Some(value) => memtable.put(entry.key, value)?,
                None => memtable.delete(entry.key)?,
            }
        }
        info!(
            path = %db_path.display(),
            recovered_entries = memtable.len(),
            "engine recovered"
        );

        let wal = Wal::<WalEntry>::open(
            &wal_path,
            config.sstable_block_size,
            Duration::from_millis(config.wal_flush_interval_ms),
            config.write_buffer_size,
        )?;

        let compaction_config = config.compaction_config();
        let compaction_handle = config.enable_automatic_compaction.then(|| {
            CompactionHandle::spawn(
                Arc::clone(&version_set),
                db_path.clone(),
                compaction_config.clone(),
            )
        });

        Ok(Self {
            db_path,
            readers: Mutex::new(ReaderCache::new(config.max_open_files)),
            compaction_config,
            active: RwLock::new(ActiveState {
                memtable: Arc::new(memtable),
                wal: Arc::new(wal),
            }),
            version_set,
            write_count: AtomicU64::new(0),
            compaction_handle,
            closed: AtomicBool::new(false),
            config,
        })
    }

    fn check_open(&self) -> Result<(), EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(EngineError::Closed)
        } else {
            Ok(())
        }
    }

    /// WAL append, then memtable insert; flushes inline if the byte
    /// threshold is crossed, then asks the compaction worker to check the
    /// trigger policy every `compaction_check_interval` writes.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), EngineError> {
        self.check_open()?;
        if key.is_empty() {
            return Err(EngineError::InvalidArgument("key must not be empty".into()));
        }

        {
            let mut guard = self.active.write().expect("active state lock poisoned");
            guard.wal.append(&WalEntry {
                key: key.to_vec(),
                value: Some(value.to_vec()),
            })?;
            guard.memtable.put(key.to_vec(), value.to_vec())?;
            if guard.memtable.byte_size() >= self.config.memtable_size_threshold {
                self.flush_locked(&mut guard)?;
            }
        }

        let n = self.write_count.fetch_add(1, Ordering::SeqCst) + 1;
        if n % self.config.compaction_check_interval == 0 {
            self.request_compaction_check()?;
        }
        Ok(())
    }

    /// Equivalent to `put(key, &[])`: an empty value is a tombstone.
    pub fn delete(&self, key: &[u8]) -> Result<(), EngineError> {
        self.put(key, &[])
    }

    fn request_compaction_check(&self) -> Result<(), EngineError> {
        match &self.compaction_handle {
            Some(handle) => {
                handle.request();
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Flushes the active memtable to a new L0 SSTable and rotates the
    /// WAL. Caller must already hold the write lock on `active`.
    fn flush_locked(&self, guard: &mut ActiveState) -> Result<(), EngineError> {
        if guard.memtable.is_empty() {
            return Ok(());
        }
        let entries = guard.memtable.snapshot();
        let file_number = self.version_set.new_file_number();
        let path = VersionSet::sst_path(&self.db_path, file_number);
        let bloom_fp_rate = self
            .config
            .use_bloom_filter
            .then_some(self.config.bloom_filter_false_positive_rate);
        let info = SstWriter::new(&path, bloom_fp_rate).build(entries)?;

        self.version_set.apply(VersionEdit {
            added: vec![FileMetadata {
                file_number,
                file_size: info.file_size,
                smallest_key: info.smallest_key,
                largest_key: info.largest_key,
                level: 0,
            }],
            next_file_number: Some(file_number + 1),
            ..Default::default()
        })?;

        guard.wal.close()?;
        let wal_path = self.db_path.join(WAL_FILENAME);
        let unix_seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let archived = wal::rotate(&wal_path, unix_seconds)?;
        let fresh_wal = Wal::<WalEntry>::open(
            &wal_path,
            self.config.sstable_block_size,
            Duration::from_millis(self.config.wal_flush_interval_ms),
            self.config.write_buffer_size,
        )?;

        debug!(
            file_number,
            archived = %archived.display(),
            "memtable flushed, wal rotated"
        );

        guard.memtable = Arc::new(Memtable::new());
        guard.wal = Arc::new(fresh_wal);
        Ok(())
    }

    /// Forces the active memtable out to an L0 SSTable even if below
    /// threshold. A no-op if the memtable is empty.
    pub fn flush(&self) -> Result<(), EngineError> {
        self.check_open()?;
        let mut guard = self.active.write().expect("active state lock poisoned");
        self.flush_locked(&mut guard)
    }

    /// Repeatedly runs `pick_compaction` + execute until no level
    /// satisfies its trigger.
    pub fn compact(&self) -> Result<(), EngineError> {
        self.check_open()?;
        compaction::run_until_settled(&self.version_set, &self.db_path, &self.compaction_config)?;
        self.invalidate_stale_readers();
        Ok(())
    }

    /// Drops cached reader handles for files no longer in the current
    /// version (a compaction may have removed them).
    fn invalidate_stale_readers(&self) {
        let version = self.version_set.current();
        let mut live = std::collections::HashSet::new();
        for level in 0..version.level_count() {
            for f in version.files(level) {
                live.insert(f.file_number);
            }
        }
        let mut cache = self.readers.lock().expect("reader cache lock poisoned");
        let stale: Vec<u64> = cache
            .handles
            .keys()
            .filter(|n| !live.contains(n))
            .copied()
            .collect();
        for n in stale {
            cache.invalidate(n);
        }
    }

    fn reader_for(&self, file_number: u64) -> Result<Arc<SstReader>, EngineError> {
        let mut cache = self.readers.lock().expect("reader cache lock poisoned");
        Ok(cache.get_or_open(&self.db_path, file_number)?)
    }

    /// Point lookup: memtable first, then L0 newest-to-oldest, then levels
    /// `>= 1` via binary search over non-overlapping key ranges. The first
    /// non-absent hit wins; a tombstone hit yields `None`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        self.check_open()?;
        if key.is_empty() {
            return Err(EngineError::InvalidArgument("key must not be empty".into()));
        }

        let memtable = {
            let guard = self.active.read().expect("active state lock poisoned");
            Arc::clone(&guard.memtable)
        };
        if let Some(value) = memtable.get(key) {
            return Ok(Self::live_value(value));
        }

        let version = self.version_set.current();

        let mut l0: Vec<_> = version.files(0).to_vec();
        l0.sort_by_key(|f| std::cmp::Reverse(f.file_number));
        for file in l0 {
            let reader = self.reader_for(file.file_number)?;
            if let Some(value) = reader.get(key)? {
                return Ok(Self::live_value(value));
            }
        }

        for level in 1..version.level_count() {
            let files = version.files(level);
            let idx = files.partition_point(|f| f.smallest_key.as_slice() <= key);
            let candidate = idx
                .checked_sub(1)
                .and_then(|i| files.get(i))
                .filter(|f| f.overlaps_key(key));
            if let Some(file) = candidate {
                let reader = self.reader_for(file.file_number)?;
                if let Some(value) = reader.get(key)? {
                    return Ok(Self::live_value(value));
                }
            }
        }

        Ok(None)
    }

    fn live_value(value: Vec<u8>) -> Option<Vec<u8>> {
        if value.is_empty() { None } else { Some(value) }
    }

    /// Ascending `(key, value)` pairs for `lo <= key <= hi` (either bound
    /// optional), tombstones filtered out.
    /// Precedence: memtable > L0 (newest file first) > L1 > L2 > ….
    pub fn range(
        &self,
        lo: Option<&[u8]>,
        hi: Option<&[u8]>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, EngineError> {
        self.check_open()?;
        if let (Some(lo), Some(hi)) = (lo, hi)
            && lo > hi
        {
            return Ok(Vec::new());
        }

        let memtable = {
            let guard = self.active.read().expect("active state lock poisoned");
            Arc::clone(&guard.memtable)
        };
        let version = self.version_set.current();

        // Lowest precedence first so later inserts into `combined` win:
        // deepest level up to L1, then L0 oldest-to-newest, then memtable.
        let mut combined: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        for level in (1..version.level_count()).rev() {
            for file in version.files(level) {
                if !file.overlaps_range(lo, hi) {
                    continue;
                }
                let reader = self.reader_for(file.file_number)?;
                for (k, v) in reader.range(lo, hi) {
                    combined.insert(k, v);
                }
            }
        }
        let mut l0: Vec<_> = version.files(0).to_vec();
        l0.sort_by_key(|f| f.file_number);
        for file in l0 {
            if !file.overlaps_range(lo, hi) {
                continue;
            }
            let reader = self.reader_for(file.file_number)?;
            for (k, v) in reader.range(lo, hi) {
                combined.insert(k, v);
            }
        }
        for (k, v) in memtable.range(lo, hi) {
            combined.insert(k, v);
        }

        Ok(combined.into_iter().filter(|(_, v)| !v.is_empty()).collect())
    }

    /// Thin wrapper over [`Engine::range`] that caps the result at `limit`
    /// entries — an external-interface convenience for the CLI, not a new
    /// core semantic.
    pub fn scan(
        &self,
        lo: Option<&[u8]>,
        hi: Option<&[u8]>,
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, EngineError> {
        let mut out = self.range(lo, hi)?;
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    /// Snapshot of per-level file counts/sizes and the active memtable's
    /// footprint.
    pub fn info(&self) -> Result<EngineStats, EngineError> {
        self.check_open()?;
        let version = self.version_set.current();
        let mut level_file_counts = Vec::with_capacity(version.level_count());
        let mut level_byte_sizes = Vec::with_capacity(version.level_count());
        for level in 0..version.level_count() {
            level_file_counts.push(version.files(level).len());
            level_byte_sizes.push(version.level_size(level));
        }
        let memtable = {
            let guard = self.active.read().expect("active state lock poisoned");
            Arc::clone(&guard.memtable)
        };
        Ok(EngineStats {
            level_file_counts,
            level_byte_sizes,
            memtable_entries: memtable.len(),
            memtable_bytes: memtable.byte_size(),
        })
    }

    /// Best-effort flush, then closes the WAL and the version set's
    /// MANIFEST. Idempotent: calling `close` twice is a no-op the second
    /// time.
    pub fn close(&self) -> Result<(), EngineError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut guard = self.active.write().expect("active state lock poisoned");
        self.flush_locked(&mut guard)?;
        guard.wal.close()?;
        drop(guard);
        self.version_set.close()?;
        info!(path = %self.db_path.display(), "engine closed");
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
