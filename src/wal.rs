//! Write-ahead log — a durable, append-only, block-framed record stream.
//!
//! Every mutation is appended here before it reaches the memtable, so a
//! crash between the two never loses an acknowledged write. The file is
//! partitioned into fixed-size blocks; a logical record is split across
//! one or more physical records so that recovery can resynchronize after
//! a torn tail without scanning for magic bytes.
//!
//! ```text
//! physical record: [crc u32 be][length u32 be][type u8][payload]
//! type ∈ {FULL, FIRST, MIDDLE, LAST}
//! ```

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::encoding::{Decode, Encode, EncodingError, decode_from_slice, encode_to_vec};

/// Size of a physical record header: `crc(4) + length(4) + type(1)`.
const HEADER_SIZE: u32 = 9;

/// Default block size, also the default SSTable block size per config.
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;

/// Errors produced by WAL append and recovery.
#[derive(Debug, Error)]
pub enum WalError {
    /// Underlying filesystem error.
    #[error("wal io error: {0}")]
    Io(#[from] io::Error),

    /// A payload could not be encoded.
    #[error("wal encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Operation attempted on a WAL that was already closed/rotated.
    #[error("wal is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordType {
    Full = 1,
    First = 2,
    Middle = 3,
    Last = 4,
}

impl RecordType {
    fn from_u8(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Full),
            2 => Some(Self::First),
            3 => Some(Self::Middle),
            4 => Some(Self::Last),
            _ => None,
        }
    }
}

/// The logical payload stored in a single WAL entry: a key and an
/// optional value. `None` marks a delete (tombstone).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalEntry {
    /// The mutated key.
    pub key: Vec<u8>,
    /// `Some(value)` for a put, `None` for a delete.
    pub value: Option<Vec<u8>>,
}

impl Encode for WalEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.key.encode_to(buf)?;
        self.value.encode_to(buf)
    }
}

impl Decode for WalEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (key, n1) = Vec::<u8>::decode_from(buf)?;
        let (value, n2) = Option::<Vec<u8>>::decode_from(&buf[n1..])?;
        Ok((WalEntry { key, value }, n1 + n2))
    }
}

struct WalWriterState {
    file: File,
    offset: u64,
    last_fsync_at: Instant,
    last_fsync_offset: u64,
}

/// A crash-safe, block-framed append-only log over records of type `T`.
///
/// `T` carries its own wire format via [`Encode`]/[`Decode`]; the WAL
/// itself only manages block framing, CRCs, and fsync policy.
pub struct Wal<T: Encode + Decode> {
    path: PathBuf,
    block_size: u32,
    flush_interval: Duration,
    size_threshold: u64,
    state: Mutex<Option<WalWriterState>>,
    _marker: PhantomData<T>,
}

impl<T: Encode + Decode> Wal<T> {
    /// Opens (creating if absent) a WAL file at `path` for appending.
    pub fn open(
        path: impl Into<PathBuf>,
        block_size: u32,
        flush_interval: Duration,
        size_threshold: u64,
    ) -> Result<Self, WalError> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(false)
            .open(&path)?;
        let offset = file.metadata()?.len();
        debug!(path = %path.display(), offset, "wal opened");

        Ok(Self {
            path,
            block_size: block_size.max(HEADER_SIZE + 1),
            flush_interval,
            size_threshold,
            state: Mutex::new(Some(WalWriterState {
                file,
                offset,
                last_fsync_at: Instant::now(),
                last_fsync_offset: offset,
            })),
            _marker: PhantomData,
        })
    }

    /// Path of the underlying WAL file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current file length in bytes.
    pub fn len(&self) -> Result<u64, WalError> {
        let guard = self.state.lock().map_err(|_| WalError::Closed)?;
        let state = guard.as_ref().ok_or(WalError::Closed)?;
        Ok(state.offset)
    }

    /// Whether the file currently has zero bytes.
    pub fn is_empty(&self) -> Result<bool, WalError> {
        Ok(self.len()? == 0)
    }

    /// Appends one logical record, fragmenting it across physical records
    /// and blocks as needed. Applies the fsync policy before returning.
    pub fn append(&self, record: &T) -> Result<(), WalError> {
        let payload = encode_to_vec(record)?;
        let mut guard = self.state.lock().map_err(|_| WalError::Closed)?;
        let state = guard.as_mut().ok_or(WalError::Closed)?;
        Self::write_payload(state, self.block_size, &payload)?;
        Self::maybe_fsync(state, self.flush_interval, self.size_threshold)?;
        trace!(bytes = payload.len(), "wal record appended");
        Ok(())
    }

    fn write_payload(
        state: &mut WalWriterState,
        block_size: u32,
        payload: &[u8],
    ) -> Result<(), WalError> {
        let mut pos_in_payload = 0usize;
        let mut is_first = true;

        loop {
            let remaining_in_block = block_size - (state.offset % block_size as u64) as u32;

            if remaining_in_block < HEADER_SIZE {
                let pad = vec![0u8; remaining_in_block as usize];
                state.file.write_all(&pad)?;
                state.offset += remaining_in_block as u64;
                continue;
            }

            let max_chunk = (remaining_in_block - HEADER_SIZE) as usize;
            let remaining_payload = payload.len() - pos_in_payload;

            if is_first && remaining_payload <= max_chunk {
                Self::write_physical(
                    &mut state.file,
                    RecordType::Full,
                    &payload[pos_in_payload..],
                )?;
                state.offset += HEADER_SIZE as u64 + remaining_payload as u64;
                return Ok(());
            }

            let chunk_len = max_chunk.min(remaining_payload).max(0);
            // A block with fewer than HEADER_SIZE bytes free is padded above;
            // here max_chunk is always > 0 because remaining_in_block >= HEADER_SIZE + 1.
            let chunk = &payload[pos_in_payload..pos_in_payload + chunk_len];
            let is_last = pos_in_payload + chunk_len == payload.len();
            let rtype = if is_first {
                RecordType::First
            } else if is_last {
                RecordType::Last
            } else {
                RecordType::Middle
            };

            Self::write_physical(&mut state.file, rtype, chunk)?;
            state.offset += HEADER_SIZE as u64 + chunk_len as u64;
            pos_in_payload += chunk_len;
            is_first = false;

            if is_last {
                return Ok(());
            }
        }
    }

    fn write_physical(file: &mut File, rtype: RecordType, chunk: &[u8]) -> Result<(), WalError> {
        let crc = crc32fast::hash(chunk);
        let mut header = [0u8; HEADER_SIZE as usize];
        header[0..4].copy_from_slice(&crc.to_be_bytes());
        header[4..8].copy_from_slice(&(chunk.len() as u32).to_be_bytes());
        header[8] = rtype as u8;
        file.write_all(&header)?;
        file.write_all(chunk)?;
        Ok(())
    }

    fn maybe_fsync(
        state: &mut WalWriterState,
        flush_interval: Duration,
        size_threshold: u64,
    ) -> Result<(), WalError> {
        let elapsed = state.last_fsync_at.elapsed();
        let grown = state.offset.saturating_sub(state.last_fsync_offset);
        if elapsed >= flush_interval || grown >= size_threshold.max(1) {
            state.file.flush()?;
            state.file.sync_data()?;
            state.last_fsync_at = Instant::now();
            state.last_fsync_offset = state.offset;
        }
        Ok(())
    }

    /// Forces a flush and fsync regardless of policy thresholds.
    pub fn sync(&self) -> Result<(), WalError> {
        let mut guard = self.state.lock().map_err(|_| WalError::Closed)?;
        let state = guard.as_mut().ok_or(WalError::Closed)?;
        state.file.flush()?;
        state.file.sync_data()?;
        state.last_fsync_at = Instant::now();
        state.last_fsync_offset = state.offset;
        Ok(())
    }

    /// Closes the underlying file handle. Further appends return [`WalError::Closed`].
    pub fn close(&self) -> Result<(), WalError> {
        let mut guard = self.state.lock().map_err(|_| WalError::Closed)?;
        if let Some(mut state) = guard.take() {
            state.file.flush()?;
            state.file.sync_data()?;
        }
        Ok(())
    }

    /// Replays every recoverable record in `path`, in file order.
    ///
    /// Records whose CRC does not match are skipped with a warning. A torn
    /// tail (truncated header or payload) ends recovery cleanly without
    /// invalidating prior records.
    pub fn replay(path: impl AsRef<Path>) -> Result<Vec<T>, WalError> {
        let path = path.as_ref();
        let mut file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(Self::replay_bytes(&buf, DEFAULT_BLOCK_SIZE))
    }

    /// Replays records from an in-memory buffer using an explicit block size.
    pub fn replay_bytes(buf: &[u8], block_size: u32) -> Vec<T> {
        let mut out = Vec::new();
        let mut pos: u64 = 0;
        let mut pending: Option<Vec<u8>> = None;
        let len = buf.len() as u64;

        loop {
            if pos >= len {
                break;
            }
            let remaining_in_block = block_size - (pos % block_size as u64) as u32;
            if remaining_in_block < HEADER_SIZE {
                pos += remaining_in_block as u64;
                continue;
            }

            let start = pos as usize;
            if start + HEADER_SIZE as usize > buf.len() {
                break; // torn header
            }
            let header = &buf[start..start + HEADER_SIZE as usize];
            let crc = u32::from_be_bytes(header[0..4].try_into().unwrap());
            let rec_len = u32::from_be_bytes(header[4..8].try_into().unwrap()) as usize;
            let rtype = match RecordType::from_u8(header[8]) {
                Some(t) => t,
                None => break, // corrupt type byte, treat as end
            };

            let payload_start = start + HEADER_SIZE as usize;
            if payload_start + rec_len > buf.len() {
                break; // torn payload
            }
            let payload = &buf[payload_start..payload_start + rec_len];
            let crc_ok = crc32fast::hash(payload) == crc;

            pos = (payload_start + rec_len) as u64;

            if !crc_ok {
                warn!(offset = start, "wal record crc mismatch, skipping");
                pending = None;
                continue;
            }

            match rtype {
                RecordType::Full => {
                    pending = None;
                    Self::try_decode_push(payload, &mut out);
                }
                RecordType::First => {
                    pending = Some(payload.to_vec());
                }
                RecordType::Middle => {
                    if let Some(buf) = pending.as_mut() {
                        buf.extend_from_slice(payload);
                    }
                }
                RecordType::Last => {
                    if let Some(mut buf) = pending.take() {
                        buf.extend_from_slice(payload);
                        Self::try_decode_push(&buf, &mut out);
                    }
                }
            }
        }

        out
    }

    fn try_decode_push(payload: &[u8], out: &mut Vec<T>) {
        match decode_from_slice::<T>(payload) {
            Ok((record, _)) => out.push(record),
            Err(e) => warn!(?e, "wal payload decode error, skipping"),
        }
    }
}

/// Renames an archived WAL so a fresh segment can replace it.
///
/// Called as part of the flush protocol: finalize the SSTable and version
/// edit first, then rotate the WAL (rename, then create a new active one).
pub fn archive_name(active_path: &Path, unix_seconds: u64) -> PathBuf {
    let mut name = active_path.as_os_str().to_owned();
    name.push(format!(".{unix_seconds}"));
    PathBuf::from(name)
}

/// Renames `active_path` to its archived name. The caller is responsible
/// for creating a fresh WAL at `active_path` afterward.
pub fn rotate(active_path: &Path, unix_seconds: u64) -> Result<PathBuf, WalError> {
    let archived = archive_name(active_path, unix_seconds);
    std::fs::rename(active_path, &archived)?;
    Ok(archived)
}

/// Truncates the file at `path` to zero length in place (used by the
/// version set's MANIFEST, which shares this module's physical framing).
pub fn truncate_to_empty(path: &Path) -> Result<(), WalError> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(0)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(k: &str, v: Option<&str>) -> WalEntry {
        WalEntry {
            key: k.as_bytes().to_vec(),
            value: v.map(|s| s.as_bytes().to_vec()),
        }
    }

    #[test]
    fn append_and_replay_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal");
        let wal: Wal<WalEntry> = Wal::open(&path, 256, Duration::ZERO, 0).unwrap();
        wal.append(&entry("a", Some("1"))).unwrap();
        wal.append(&entry("b", Some("2"))).unwrap();
        wal.append(&entry("a", None)).unwrap();
        wal.close().unwrap();

        let replayed = Wal::<WalEntry>::replay(&path).unwrap();
        assert_eq!(replayed, vec![entry("a", Some("1")), entry("b", Some("2")), entry("a", None)]);
    }

    #[test]
    fn large_record_spans_multiple_blocks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal");
        let wal: Wal<WalEntry> = Wal::open(&path, 64, Duration::ZERO, 0).unwrap();
        let big_value = vec![b'x'; 1000];
        wal.append(&entry("k", None)).unwrap(); // small record first
        wal.append(&WalEntry {
            key: b"big".to_vec(),
            value: Some(big_value.clone()),
        })
        .unwrap();
        wal.close().unwrap();

        let replayed = Wal::<WalEntry>::replay(&path).unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[1].value, Some(big_value));
    }

    #[test]
    fn torn_tail_preserves_prior_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal");
        {
            let wal: Wal<WalEntry> = Wal::open(&path, 256, Duration::ZERO, 0).unwrap();
            wal.append(&entry("a", Some("1"))).unwrap();
            wal.append(&entry("b", Some("2"))).unwrap();
            wal.close().unwrap();
        }

        // Truncate off the tail of the last physical record.
        let full_len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(full_len - 3).unwrap();

        let replayed = Wal::<WalEntry>::replay(&path).unwrap();
        assert_eq!(replayed, vec![entry("a", Some("1"))]);
    }

    #[test]
    fn crc_mismatch_is_skipped_not_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal");
        {
            let wal: Wal<WalEntry> = Wal::open(&path, 256, Duration::ZERO, 0).unwrap();
            wal.append(&entry("a", Some("1"))).unwrap();
            wal.append(&entry("b", Some("2"))).unwrap();
            wal.close().unwrap();
        }

        let mut bytes = std::fs::read(&path).unwrap();
        // Flip a byte inside the second record's payload to break its CRC.
        let mid = bytes.len() - 2;
        bytes[mid] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let replayed = Wal::<WalEntry>::replay(&path).unwrap();
        assert_eq!(replayed, vec![entry("a", Some("1"))]);
    }

    #[test]
    fn missing_file_replays_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("does-not-exist");
        let replayed = Wal::<WalEntry>::replay(&path).unwrap();
        assert!(replayed.is_empty());
    }

    #[test]
    fn rotate_archives_with_timestamp_suffix() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal");
        std::fs::write(&path, b"data").unwrap();
        let archived = rotate(&path, 1_700_000_000).unwrap();
        assert!(!path.exists());
        assert!(archived.exists());
        assert!(archived.to_string_lossy().ends_with(".1700000000"));
    }
}
