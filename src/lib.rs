//! # AeternusDB
//!
//! An embeddable, persistent key-value storage engine built on a
//! **Log-Structured Merge Tree (LSM-tree)** architecture. Designed for
//! fast writes and crash-safe operation, single process, single writer.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     Engine                           │
//! │  ┌────────────┐                      ┌─────────────┐ │
//! │  │  Memtable   │   flush on threshold │  SSTables   │ │
//! │  │  + active   │ ───────────────────► │  L0, L1, …  │ │
//! │  │  WAL        │                      └──────┬──────┘ │
//! │  └─────────────┘                              │        │
//! │                                                │        │
//! │  ┌──────────────────────────────────────────────┘        │
//! │  │  Leveled compaction (background worker)               │
//! │  └────────────────────────────────────────────────────────┘
//! │                                                           │
//! │  ┌─────────────────────────────────────────────────────┐  │
//! │  │  Version set (MANIFEST: file catalog per level)      │  │
//! │  └─────────────────────────────────────────────────────┘  │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Core storage engine — open, read, write, scan, flush, compact |
//! | [`memtable`] | In-memory sorted write buffer fronting all writes |
//! | [`wal`] | Generic, CRC-protected write-ahead log for crash recovery |
//! | [`sstable`] | Immutable, sorted, on-disk tables with bloom filters and block indices |
//! | [`bloom`] | Space-efficient probabilistic set membership for negative lookups |
//! | [`version`] | Version set: per-level file catalog, MANIFEST, file numbering |
//! | [`compaction`] | Leveled compaction: trigger policy, selection, and k-way merge |
//! | [`encoding`] | Zero-dependency binary `Encode`/`Decode` used by the WAL and MANIFEST |
//!
//! ## Key Features
//!
//! - **Write-ahead logging** — every mutation is persisted to a WAL before
//!   being acknowledged, guaranteeing durability and crash recovery.
//! - **Leveled compaction** — L0 overlapping runs, L1+ non-overlapping and
//!   size-triggered, merged with a k-way streaming merge.
//! - **Tombstone deletes** — an empty value marks a key deleted; tombstones
//!   are dropped once compacted into the bottommost reachable level.
//! - **Bloom filter lookups** — each SSTable carries a bloom filter for
//!   fast negative point-lookup responses.
//! - **Block-level CRC32 integrity** — every on-disk block (WAL records,
//!   SSTable data blocks, headers, footers) is checksummed.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use aeternusdb::engine::{Engine, EngineConfig};
//!
//! let config = EngineConfig::default();
//! let engine = Engine::open("/tmp/my_db", config).unwrap();
//!
//! // Write
//! engine.put(b"hello", b"world").unwrap();
//!
//! // Read
//! assert_eq!(engine.get(b"hello").unwrap(), Some(b"world".to_vec()));
//!
//! // Delete
//! engine.delete(b"hello").unwrap();
//! assert_eq!(engine.get(b"hello").unwrap(), None);
//!
//! // Scan
//! engine.put(b"a", b"1").unwrap();
//! engine.put(b"b", b"2").unwrap();
//! let results = engine.scan(Some(b"a"), Some(b"c"), None).unwrap();
//!
//! // Graceful shutdown
//! engine.close().unwrap();
//! ```

#![allow(dead_code)]

pub mod bloom;
pub mod compaction;
pub mod encoding;
pub mod engine;
pub mod memtable;
pub mod sstable;
pub mod version;
pub mod wal;
