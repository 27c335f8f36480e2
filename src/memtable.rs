//! In-memory sorted write buffer fronting all engine writes.
//!
//! A tombstone is represented as an entry with an empty value, distinct
//! from key absence. The memtable carries no multi-version history and no
//! WAL handle of its own — the engine is responsible for sequencing
//! `WAL append` before `memtable insert` for a single write.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;

use thiserror::Error;
use tracing::trace;

/// Errors produced by memtable operations.
#[derive(Debug, Error)]
pub enum MemtableError {
    /// The key was empty, which is rejected at the engine boundary but
    /// checked here too since the memtable is usable standalone.
    #[error("key must not be empty")]
    EmptyKey,
}

/// An ordered, single-version in-memory map from key to value-or-tombstone.
///
/// Only the latest write per key is retained; insertion order does not
/// matter. Guarded by a single `RwLock` since writes are already
/// serialized by the engine's write path.
pub struct Memtable {
    inner: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl Memtable {
    /// Creates an empty memtable.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(BTreeMap::new()),
        }
    }

    /// Inserts or replaces `key`'s value. An empty `value` is a tombstone.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), MemtableError> {
        if key.is_empty() {
            return Err(MemtableError::EmptyKey);
        }
        trace!(key = %hex_key(&key), bytes = value.len(), "memtable put");
        let mut guard = self.inner.write().expect("memtable lock poisoned");
        guard.insert(key, value);
        Ok(())
    }

    /// Marks `key` deleted; equivalent to `put(key, [])`.
    pub fn delete(&self, key: Vec<u8>) -> Result<(), MemtableError> {
        self.put(key, Vec::new())
    }

    /// Returns the current value for `key`: `Some(empty)` for a tombstone,
    /// `Some(bytes)` for a live value, `None` if the key has no entry here.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let guard = self.inner.read().expect("memtable lock poisoned");
        guard.get(key).cloned()
    }

    /// Ascending iterator over `lo <= key <= hi` (either bound optional).
    ///
    /// Snapshots the current contents into an owned vector so the result
    /// does not hold the lock across iteration.
    pub fn range(&self, lo: Option<&[u8]>, hi: Option<&[u8]>) -> Vec<(Vec<u8>, Vec<u8>)> {
        let guard = self.inner.read().expect("memtable lock poisoned");
        let start = match lo {
            Some(k) => Bound::Included(k.to_vec()),
            None => Bound::Unbounded,
        };
        let end = match hi {
            Some(k) => Bound::Included(k.to_vec()),
            None => Bound::Unbounded,
        };
        guard
            .range::<Vec<u8>, _>((start, end))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Sum of key+value byte lengths across all currently stored entries.
    pub fn byte_size(&self) -> usize {
        let guard = self.inner.read().expect("memtable lock poisoned");
        guard.iter().map(|(k, v)| k.len() + v.len()).sum()
    }

    /// Number of entries (puts and tombstones alike).
    pub fn len(&self) -> usize {
        let guard = self.inner.read().expect("memtable lock poisoned");
        guard.len()
    }

    /// `true` when no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains the memtable into an owned, ascending `(key, value)` vector.
    /// Used when flushing to an SSTable.
    pub fn snapshot(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        let guard = self.inner.read().expect("memtable lock poisoned");
        guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

impl Default for Memtable {
    fn default() -> Self {
        Self::new()
    }
}

fn hex_key(key: &[u8]) -> String {
    key.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get() {
        let mt = Memtable::new();
        mt.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        assert_eq!(mt.get(b"a"), Some(b"1".to_vec()));
    }

    #[test]
    fn put_overwrites() {
        let mt = Memtable::new();
        mt.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        mt.put(b"a".to_vec(), b"2".to_vec()).unwrap();
        assert_eq!(mt.get(b"a"), Some(b"2".to_vec()));
        assert_eq!(mt.len(), 1);
    }

    #[test]
    fn delete_is_tombstone_not_absent() {
        let mt = Memtable::new();
        mt.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        mt.delete(b"a".to_vec()).unwrap();
        assert_eq!(mt.get(b"a"), Some(Vec::new()));
        assert_eq!(mt.get(b"missing"), None);
    }

    #[test]
    fn empty_key_rejected() {
        let mt = Memtable::new();
        assert!(matches!(mt.put(Vec::new(), b"1".to_vec()), Err(MemtableError::EmptyKey)));
    }

    #[test]
    fn byte_size_tracks_entries() {
        let mt = Memtable::new();
        assert_eq!(mt.byte_size(), 0);
        mt.put(b"ab".to_vec(), b"cde".to_vec()).unwrap();
        assert_eq!(mt.byte_size(), 5);
        mt.put(b"ab".to_vec(), b"z".to_vec()).unwrap();
        assert_eq!(mt.byte_size(), 3);
    }

    #[test]
    fn range_is_ascending_and_bounded() {
        let mt = Memtable::new();
        for k in ["a", "b", "c", "d"] {
            mt.put(k.as_bytes().to_vec(), b"v".to_vec()).unwrap();
        }
        let got = mt.range(Some(b"b"), Some(b"c"));
        let keys: Vec<Vec<u8>> = got.into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn range_unbounded_returns_everything() {
        let mt = Memtable::new();
        mt.put(b"z".to_vec(), b"1".to_vec()).unwrap();
        mt.put(b"a".to_vec(), b"2".to_vec()).unwrap();
        let got = mt.range(None, None);
        let keys: Vec<Vec<u8>> = got.into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"z".to_vec()]);
    }

    #[test]
    fn snapshot_is_ascending() {
        let mt = Memtable::new();
        mt.put(b"b".to_vec(), b"1".to_vec()).unwrap();
        mt.put(b"a".to_vec(), b"2".to_vec()).unwrap();
        let snap = mt.snapshot();
        assert_eq!(snap[0].0, b"a".to_vec());
        assert_eq!(snap[1].0, b"b".to_vec());
    }
}
