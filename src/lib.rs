//! # durawal
//!
//! A durable, block-chunked write-ahead log for the storage layer of a
//! key-value store or any system that needs crash-safe, append-only
//! persistence of arbitrary-length records.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                            Wal                              │
//! │  ┌────────────┐   ┌────────────┐        ┌────────────┐    │
//! │  │ Segment 1   │   │ Segment 2   │  ...   │ Segment N   │    │
//! │  │ (sealed)    │   │ (sealed)    │        │ (active)    │    │
//! │  └────────────┘   └────────────┘        └────────────┘    │
//! │         roster: BTreeMap<u32, Segment>, keyed by segment id │
//! │                                                              │
//! │  write() ──► active segment, rolls over on max_segment_size  │
//! │  read(segment_id, offset) ──► any segment, lock-free          │
//! │  sync() / background sync thread ──► durability on a policy   │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each segment is one file made of 32 KiB blocks, each block a sequence
//! of CRC-protected chunks (`FULL`/`FIRST`/`MIDDLE`/`LAST`). See
//! [`segment`] for the on-disk format and [`wal`] for roster management,
//! rollover, and sync policy.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`segment`] | On-disk chunked record format for a single append-only file |
//! | [`wal`] | Segment roster, rollover, sync policy, background durability |
//!
//! ## Key Features
//!
//! - **Chunked records** — a record of any length is split into
//!   block-aligned chunks so no chunk ever straddles a block boundary.
//! - **CRC-32 integrity** — every chunk is checksummed; corruption is
//!   detected at read time rather than silently returned.
//! - **Crash-safe appends** — a record's full chunk chain is written in
//!   one syscall, so a crash mid-append can only truncate the tail of a
//!   segment, never interleave a torn record with later data.
//! - **Numeric segment ordering** — segments are addressed and rolled
//!   over by numeric id, not lexicographic filename, so id 10 correctly
//!   sorts after id 9.
//! - **Configurable sync policy** — per-write, byte-threshold, and
//!   periodic background sync, composable and independently disableable.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use durawal::wal::{Wal, WalOptions};
//!
//! let wal = Wal::open(WalOptions::new("/tmp/my-wal")).unwrap();
//!
//! let location = wal.write(b"hello, write-ahead log").unwrap();
//! assert_eq!(wal.read_at(location).unwrap(), b"hello, write-ahead log");
//!
//! wal.sync().unwrap();
//! ```

#![allow(dead_code)]

pub mod segment;
pub mod wal;

pub use segment::{ChunkType, Segment, SegmentError};
pub use wal::{IoStats, RecordLocation, Wal, WalError, WalOptions};
