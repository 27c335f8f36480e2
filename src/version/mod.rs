//! Version set — the catalog of live SSTables per level, its edit log
//! (the MANIFEST), and file-number allocation.
//!
//! The MANIFEST reuses [`crate::wal::Wal`] as its storage layer: a version
//! edit is just another `Encode`/`Decode` payload, and the WAL's existing
//! block framing already gives the MANIFEST a self-delimiting, torn-tail
//! tolerant envelope for free.
//!
//! # Safe deletion across concurrent readers
//!
//! A reader snapshots `Arc<Version>` under a shared lock and then drops the
//! lock; a concurrent compaction may install a newer version that drops a
//! file from the catalog while that reader is still using it. Every file
//! still referenced by *some* live version is kept on disk: the set keeps
//! one canonical `Arc<FileMetadata>` per file number in a registry, and a
//! file queued for deletion is only unlinked once its `Arc` strong count
//! drops to 1 (held solely by the registry's own pending-deletion entry).
//! Because nothing notifies the set when a reader drops its `Arc<Version>`,
//! pending deletions are rechecked opportunistically on every `apply`.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::wal::{Wal, WalError};

/// Active MANIFEST filename under the database directory.
pub const MANIFEST_FILENAME: &str = "MANIFEST";

/// Errors produced by version set operations.
#[derive(Debug, Error)]
pub enum VersionError {
    /// Underlying MANIFEST I/O failure.
    #[error("manifest wal error: {0}")]
    Wal(#[from] WalError),

    /// Underlying filesystem error.
    #[error("version set io error: {0}")]
    Io(#[from] std::io::Error),

    /// A MANIFEST record failed to decode as a well-formed edit.
    #[error("manifest replay error: {0}")]
    Replay(#[from] EncodingError),
}

/// Metadata describing one live SSTable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub file_number: u64,
    pub file_size: u64,
    pub smallest_key: Vec<u8>,
    pub largest_key: Vec<u8>,
    pub level: u32,
}

impl FileMetadata {
    /// Returns whether `key` could fall within `[smallest_key, largest_key]`.
    pub fn overlaps_key(&self, key: &[u8]) -> bool {
        key >= self.smallest_key.as_slice() && key <= self.largest_key.as_slice()
    }

    /// Returns whether `[lo, hi]` (either bound optional, meaning unbounded)
    /// intersects this file's key range.
    pub fn overlaps_range(&self, lo: Option<&[u8]>, hi: Option<&[u8]>) -> bool {
        if let Some(hi) = hi
            && self.smallest_key.as_slice() > hi
        {
            return false;
        }
        if let Some(lo) = lo
            && self.largest_key.as_slice() < lo
        {
            return false;
        }
        true
    }
}

impl Encode for FileMetadata {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.file_number.encode_to(buf)?;
        self.file_size.encode_to(buf)?;
        self.smallest_key.encode_to(buf)?;
        self.largest_key.encode_to(buf)?;
        self.level.encode_to(buf)
    }
}

impl Decode for FileMetadata {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (file_number, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (file_size, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (smallest_key, n) = Vec::<u8>::decode_from(&buf[offset..])?;
        offset += n;
        let (largest_key, n) = Vec::<u8>::decode_from(&buf[offset..])?;
        offset += n;
        let (level, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                file_number,
                file_size,
                smallest_key,
                largest_key,
                level,
            },
            offset,
        ))
    }
}

/// A delta between two versions: files removed, files added, and
/// optional advances of the monotonic counters.
#[derive(Debug, Clone, Default)]
pub struct VersionEdit {
    pub deleted: Vec<(u32, u64)>,
    pub added: Vec<FileMetadata>,
    pub next_file_number: Option<u64>,
    pub last_sequence: Option<u64>,
}

impl Encode for VersionEdit {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        (self.deleted.len() as u32).encode_to(buf)?;
        for (level, file_number) in &self.deleted {
            level.encode_to(buf)?;
            file_number.encode_to(buf)?;
        }
        encoding::encode_vec(&self.added, buf)?;
        self.next_file_number.encode_to(buf)?;
        self.last_sequence.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for VersionEdit {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (count, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let mut deleted = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (level, n) = u32::decode_from(&buf[offset..])?;
            offset += n;
            let (file_number, n) = u64::decode_from(&buf[offset..])?;
            offset += n;
            deleted.push((level, file_number));
        }
        let (added, n) = encoding::decode_vec::<FileMetadata>(&buf[offset..])?;
        offset += n;
        let (next_file_number, n) = Option::<u64>::decode_from(&buf[offset..])?;
        offset += n;
        let (last_sequence, n) = Option::<u64>::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                deleted,
                added,
                next_file_number,
                last_sequence,
            },
            offset,
        ))
    }
}

/// A snapshot of the live file set, one list per level.
///
/// Level 0 is kept in ascending file-number order (oldest first); levels
/// `>= 1` are kept sorted ascending by smallest key and are internally
/// non-overlapping.
#[derive(Debug)]
pub struct Version {
    levels: Vec<Vec<Arc<FileMetadata>>>,
}

impl Version {
    fn with_levels(count: usize) -> Self {
        Self {
            levels: vec![Vec::new(); count],
        }
    }

    /// Files at `level`, empty slice if the level index is out of range.
    pub fn files(&self, level: usize) -> &[Arc<FileMetadata>] {
        self.levels.get(level).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Number of levels this version tracks (including empty ones).
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Total byte size of all files at `level`.
    pub fn level_size(&self, level: usize) -> u64 {
        self.files(level).iter().map(|f| f.file_size).sum()
    }

    fn clone_levels(&self) -> Vec<Vec<Arc<FileMetadata>>> {
        self.levels.clone()
    }
}

/// Persistent metadata manager for the LSM engine: current version, file
/// number/sequence counters, and the durable MANIFEST log.
pub struct VersionSet {
    db_path: PathBuf,
    current: RwLock<Arc<Version>>,
    next_file_number: AtomicU64,
    last_sequence: AtomicU64,
    manifest: Mutex<Wal<VersionEdit>>,
    file_registry: Mutex<HashMap<u64, Arc<FileMetadata>>>,
    pending_deletions: Mutex<Vec<(u64, PathBuf)>>,
    level_count: usize,
}

impl VersionSet {
    /// Path of the SSTable file for `file_number` under `db_path`.
    pub fn sst_path(db_path: &Path, file_number: u64) -> PathBuf {
        db_path.join(format!("{file_number}.sst"))
    }

    /// Opens (or creates) the MANIFEST at `db_path` and replays it into a
    /// `Version`. If no MANIFEST exists yet, writes a bootstrap edit first.
    pub fn recover(db_path: impl AsRef<Path>, level_count: usize) -> Result<Self, VersionError> {
        let db_path = db_path.as_ref().to_path_buf();
        fs::create_dir_all(&db_path)?;
        let manifest_path = db_path.join(MANIFEST_FILENAME);
        let is_fresh = !manifest_path.exists() || fs::metadata(&manifest_path)?.len() == 0;

        // Every append must be immediately durable: flush_interval = 0
        // forces `maybe_fsync` to trigger on every write.
        let manifest = Wal::<VersionEdit>::open(&manifest_path, 4096, Duration::ZERO, 0)?;

        let edits = Wal::<VersionEdit>::replay(&manifest_path)?;
        let mut version = Version::with_levels(level_count);
        let mut next_file_number = 1u64;
        let mut last_sequence = 0u64;
        let mut registry = HashMap::new();

        for edit in &edits {
            Self::fold_edit(&mut version, &mut registry, edit);
            if let Some(n) = edit.next_file_number {
                next_file_number = next_file_number.max(n);
            }
            if let Some(s) = edit.last_sequence {
                last_sequence = last_sequence.max(s);
            }
        }

        let set = Self {
            db_path,
            current: RwLock::new(Arc::new(version)),
            next_file_number: AtomicU64::new(next_file_number),
            last_sequence: AtomicU64::new(last_sequence),
            manifest: Mutex::new(manifest),
            file_registry: Mutex::new(registry),
            pending_deletions: Mutex::new(Vec::new()),
            level_count,
        };

        if is_fresh {
            info!(path = %set.db_path.display(), "bootstrapping fresh manifest");
            set.apply(VersionEdit {
                next_file_number: Some(1),
                last_sequence: Some(0),
                ..Default::default()
            })?;
        } else {
            info!(
                path = %set.db_path.display(),
                edits = edits.len(),
                next_file_number,
                last_sequence,
                "manifest recovered"
            );
        }

        Ok(set)
    }

    fn fold_edit(
        version: &mut Version,
        registry: &mut HashMap<u64, Arc<FileMetadata>>,
        edit: &VersionEdit,
    ) {
        for (level, file_number) in &edit.deleted {
            if let Some(level_files) = version.levels.get_mut(*level as usize) {
                level_files.retain(|f| f.file_number != *file_number);
            }
            registry.remove(file_number);
        }
        for meta in &edit.added {
            let arc = Arc::new(meta.clone());
            registry.insert(meta.file_number, Arc::clone(&arc));
            if let Some(level_files) = version.levels.get_mut(meta.level as usize) {
                level_files.push(arc);
            }
        }
        for level_files in version.levels.iter_mut() {
            if level_files.len() > 1 {
                Self::resort_level(level_files);
            }
        }
    }

    fn resort_level(level_files: &mut [Arc<FileMetadata>]) {
        let is_l0 = level_files
            .iter()
            .map(|f| f.level)
            .all(|l| l == level_files[0].level)
            && level_files[0].level == 0;
        if is_l0 {
            level_files.sort_by_key(|f| f.file_number);
        } else {
            level_files.sort_by(|a, b| a.smallest_key.cmp(&b.smallest_key));
        }
    }

    /// Atomically allocates and returns the next file number.
    pub fn new_file_number(&self) -> u64 {
        self.next_file_number.fetch_add(1, Ordering::SeqCst)
    }

    /// Bumps and returns the monotonic write-sequence counter.
    pub fn next_sequence(&self) -> u64 {
        self.last_sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// The current live version.
    pub fn current(&self) -> Arc<Version> {
        Arc::clone(&self.current.read().expect("version set lock poisoned"))
    }

    /// Number of levels tracked (including empty ones).
    pub fn level_count(&self) -> usize {
        self.level_count
    }

    /// Applies `edit`: builds the next version from deletes-then-adds over
    /// the current one, persists the edit to the MANIFEST with a forced
    /// fsync, and only then installs the new version. If the fsync fails,
    /// `current` is left untouched.
    pub fn apply(&self, edit: VersionEdit) -> Result<(), VersionError> {
        let current = self.current();
        let mut levels = current.clone_levels();

        for (level, file_number) in &edit.deleted {
            if let Some(level_files) = levels.get_mut(*level as usize) {
                level_files.retain(|f| f.file_number != *file_number);
            }
        }

        let mut registry = self.file_registry.lock().expect("registry lock poisoned");
        for (_level, file_number) in &edit.deleted {
            if registry.contains_key(file_number) {
                let path = Self::sst_path(&self.db_path, *file_number);
                self.pending_deletions
                    .lock()
                    .expect("pending deletions lock poisoned")
                    .push((*file_number, path));
            }
        }

        for meta in &edit.added {
            let arc = Arc::new(meta.clone());
            registry.insert(meta.file_number, Arc::clone(&arc));
            if let Some(level_files) = levels.get_mut(meta.level as usize) {
                level_files.push(arc);
            }
        }
        for level_files in levels.iter_mut() {
            if level_files.len() > 1 {
                Self::resort_level(level_files);
            }
        }
        drop(registry);

        {
            let manifest = self.manifest.lock().expect("manifest lock poisoned");
            manifest.append(&edit)?;
            manifest.sync()?;
        }

        if let Some(n) = edit.next_file_number {
            self.next_file_number.fetch_max(n, Ordering::SeqCst);
        }
        if let Some(s) = edit.last_sequence {
            self.last_sequence.fetch_max(s, Ordering::SeqCst);
        }

        *self.current.write().expect("version set lock poisoned") = Arc::new(Version { levels });

        debug!(
            deleted = edit.deleted.len(),
            added = edit.added.len(),
            "version edit applied"
        );

        self.reclaim_pending();
        Ok(())
    }

    /// Unlinks any pending-deletion file whose `Arc<FileMetadata>` is no
    /// longer referenced by any live version.
    fn reclaim_pending(&self) {
        let mut pending = self
            .pending_deletions
            .lock()
            .expect("pending deletions lock poisoned");
        let mut registry = self.file_registry.lock().expect("registry lock poisoned");
        pending.retain(|(file_number, path)| {
            let Some(arc) = registry.get(file_number) else {
                return false;
            };
            if Arc::strong_count(arc) > 1 {
                return true;
            }
            registry.remove(file_number);
            match fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "reclaimed unreferenced sstable"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to reclaim sstable"),
            }
            false
        });
    }

    /// Scans the database directory for `*.sst` files not referenced by the
    /// current version and removes them. Call once at startup, after the
    /// MANIFEST has been recovered: it repairs the orphan files a crash
    /// mid-compaction can leave behind (output written, edit never applied).
    pub fn cleanup_orphans(&self) -> Result<(), VersionError> {
        let current = self.current();
        let mut referenced: std::collections::HashSet<u64> = std::collections::HashSet::new();
        for level in 0..current.level_count() {
            for f in current.files(level) {
                referenced.insert(f.file_number);
            }
        }

        for entry in fs::read_dir(&self.db_path)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("sst") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(file_number) = stem.parse::<u64>() else {
                continue;
            };
            if !referenced.contains(&file_number) {
                warn!(path = %path.display(), "removing orphaned sstable");
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    /// Flushes and fsyncs the MANIFEST. Called from `Engine::close`.
    pub fn close(&self) -> Result<(), VersionError> {
        let manifest = self.manifest.lock().expect("manifest lock poisoned");
        manifest.sync()?;
        manifest.close()?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn manifest_file_for_test(set: &VersionSet) -> File {
    File::open(set.db_path.join(MANIFEST_FILENAME)).expect("manifest file must exist")
}
