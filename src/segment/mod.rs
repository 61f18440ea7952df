//! Segment — the on-disk chunked record format.
//!
//! A segment owns one file. Records are encoded into a stream of
//! block-aligned chunks and appended sequentially; the file offset of a
//! record's first chunk is the value callers must retain to read it back.
//!
//! # On-disk layout
//!
//! ```text
//! [block 0: 32 KiB][block 1: 32 KiB][block 2: 32 KiB]...
//! ```
//!
//! Each block holds a sequence of chunks:
//!
//! ```text
//! [CRC32_LE][LEN_LE][TYPE][PAYLOAD] [CRC32_LE][LEN_LE][TYPE][PAYLOAD] ... [PADDING?]
//! ```
//!
//! A chunk never straddles a block boundary — if fewer than
//! [`HEADER_SIZE`] bytes remain in the current block after a chunk is
//! written, the remainder is zero-padded and the next chunk starts in the
//! following block. A record longer than one chunk's payload capacity is
//! split into `FIRST`, zero or more `MIDDLE`, and one `LAST` chunk.
//!
//! # Concurrency model
//!
//! `Segment` is single-writer by construction — only [`crate::wal::Wal`]
//! calls [`Segment::append`], always serialized under its own write lock.
//! Reads are safe to call concurrently with a write in progress: the file
//! is opened once and shared by reference, writes go through the OS
//! append-mode cursor, and reads use positional (`pread`-style) reads that
//! do not disturb the writer's cursor. No read buffer is held across
//! calls, so arbitrarily many readers may call [`Segment::read_at`] at
//! once without contending on a shared scratch buffer.
//!
//! # Guarantees
//!
//! - **Integrity:** every chunk carries a CRC-32 covering `len || type ||
//!   payload`; [`Segment::read_at`] verifies it before handing back bytes.
//! - **Durability:** data is visible to a future process only after
//!   [`Segment::sync`] returns successfully.
//! - **Crash safety:** a record's chunk chain is built in memory and
//!   written in a single `write` call, so a crash mid-append can only ever
//!   truncate the tail of the file, never interleave a partial record with
//!   later data.

#[cfg(test)]
mod tests;

use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
    sync::Mutex,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{trace, warn};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Size of a block. Chunks never straddle a block boundary.
pub const BLOCK_SIZE: u64 = 32 * 1024;

/// Size of a chunk header: 4-byte CRC32, 2-byte length, 1-byte type.
pub const HEADER_SIZE: u64 = 7;

/// Maximum payload a single chunk can carry (one block minus its header).
pub const MAX_PAYLOAD_PER_CHUNK: u64 = BLOCK_SIZE - HEADER_SIZE;

/// Default filename extension for segment files.
pub const DEFAULT_FILE_EXTENSION: &str = ".seg";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by [`Segment`] operations.
#[derive(Debug, Error)]
pub enum SegmentError {
    /// Underlying I/O error (read, write, or flush returned fewer bytes
    /// than expected, or failed outright).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The segment file could not be opened or created.
    #[error("failed to open segment file {path}: {source}")]
    OpenFailed {
        /// Path of the segment file that failed to open.
        path: PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: io::Error,
    },

    /// A chunk's CRC did not match its payload, or its type did not form a
    /// valid chain (e.g. a `FULL` chunk following a `FIRST`).
    #[error("corruption detected in chunk at offset {offset}")]
    Corruption {
        /// Byte offset of the offending chunk header.
        offset: u64,
    },

    /// `read_at` was called with an offset that does not begin a valid
    /// chunk, or that lies outside the segment's written range.
    #[error("invalid read offset {offset}: {reason}")]
    InvalidOffset {
        /// The offset the caller supplied.
        offset: u64,
        /// Human-readable explanation.
        reason: String,
    },

    /// The segment has already been closed.
    #[error("segment is closed")]
    Closed,
}

// ------------------------------------------------------------------------------------------------
// Chunk type
// ------------------------------------------------------------------------------------------------

/// The role a chunk plays within a (possibly multi-chunk) record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkType {
    /// The record fits entirely in this one chunk.
    Full = 0,
    /// The first chunk of a multi-chunk record.
    First = 1,
    /// An interior chunk of a multi-chunk record.
    Middle = 2,
    /// The final chunk of a multi-chunk record.
    Last = 3,
}

impl TryFrom<u8> for ChunkType {
    /// The raw, out-of-range tag byte — callers attach the chunk's file
    /// offset to build a [`SegmentError::Corruption`].
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Full),
            1 => Ok(Self::First),
            2 => Ok(Self::Middle),
            3 => Ok(Self::Last),
            other => Err(other),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Chunk encode / decode helpers
// ------------------------------------------------------------------------------------------------

/// CRC-32 (IEEE 802.3) over `len || type || payload`, matching the variant
/// `crc32fast::Hasher` already computes (reflected, init `0xFFFFFFFF`,
/// xor-out `0xFFFFFFFF`).
fn checksum(header_tail: &[u8], payload: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(header_tail);
    hasher.update(payload);
    hasher.finalize()
}

/// Appends one chunk (header + payload) to `buf`.
fn encode_chunk(buf: &mut Vec<u8>, chunk_type: ChunkType, payload: &[u8]) {
    let len = payload.len() as u16;
    let mut header_tail = [0u8; 3];
    header_tail[0..2].copy_from_slice(&len.to_le_bytes());
    header_tail[2] = chunk_type as u8;

    let crc = checksum(&header_tail, payload);

    buf.extend_from_slice(&crc.to_le_bytes());
    buf.extend_from_slice(&header_tail);
    buf.extend_from_slice(payload);
}

/// Payload capacity of the chunk starting at file position `pos`.
fn avail_at(pos: u64) -> u64 {
    let remainder = BLOCK_SIZE - pos % BLOCK_SIZE;
    remainder.saturating_sub(HEADER_SIZE)
}

/// If `pos` falls within a block's padding tail (fewer than
/// [`HEADER_SIZE`] bytes remain before the next block boundary), skip to
/// the start of the next block.
fn align_for_read(pos: u64) -> u64 {
    let remainder = BLOCK_SIZE - pos % BLOCK_SIZE;
    if remainder <= HEADER_SIZE {
        pos + remainder
    } else {
        pos
    }
}

/// Bytes a segment grows by when appending a record of length `len` at a
/// block-aligned offset. Used by the WAL to decide whether a record will
/// fit before the configured segment size limit.
///
/// The base formula (full chunks of `MAX_PAYLOAD_PER_CHUNK` bytes each
/// consume exactly one `BLOCK_SIZE`, plus a trailing partial chunk's
/// payload and header) degenerates for `len == 0`: a zero-length record
/// still costs one chunk header, which the general formula — driven by
/// `len % MAX_PAYLOAD_PER_CHUNK` — cannot express, so it is special-cased.
pub fn required_space(len: usize) -> u64 {
    if len == 0 {
        return HEADER_SIZE;
    }

    let max_payload = MAX_PAYLOAD_PER_CHUNK as usize;
    let full_chunks = (len / max_payload) as u64;
    let remainder = (len % max_payload) as u64;

    let mut total = full_chunks * BLOCK_SIZE + remainder;
    if remainder != 0 {
        total += HEADER_SIZE;
    }
    total
}

// ------------------------------------------------------------------------------------------------
// Segment
// ------------------------------------------------------------------------------------------------

/// One append-only, block-chunked log file.
#[derive(Debug)]
pub struct Segment {
    id: u32,
    path: PathBuf,
    file: File,
    next_write_offset: AtomicU64,
    closed: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl Segment {
    /// Opens (creating if missing) the segment file `<dir>/<id><ext>`.
    ///
    /// `next_write_offset` is initialized from the file's current size, so
    /// reopening an existing segment resumes appending after its last
    /// record rather than overwriting from the start.
    pub fn open(dir: &Path, id: u32, ext: &str) -> Result<Self, SegmentError> {
        let path = dir.join(format!("{id}{ext}"));

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|source| SegmentError::OpenFailed {
                path: path.clone(),
                source,
            })?;

        let size = file
            .metadata()
            .map_err(|source| SegmentError::OpenFailed {
                path: path.clone(),
                source,
            })?
            .len();

        trace!(id, size, path = %path.display(), "opened segment");

        Ok(Self {
            id,
            path,
            file,
            next_write_offset: AtomicU64::new(size),
            closed: AtomicBool::new(false),
            last_error: Mutex::new(None),
        })
    }

    /// This segment's numeric id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size of the segment, in bytes. Equal to the offset the next
    /// `append` would return.
    pub fn size(&self) -> u64 {
        self.next_write_offset.load(Ordering::Acquire)
    }

    /// Whether [`Segment::close`] has already been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Whether the segment is still usable (i.e. not closed).
    pub fn is_valid(&self) -> bool {
        !self.is_closed()
    }

    /// The last filesystem error recorded against this segment, if any.
    pub fn error_detail(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }

    fn record_error(&self, detail: impl Into<String>) {
        let mut guard = self
            .last_error
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        *guard = Some(detail.into());
    }

    /// Appends `record` as one or more chunks and returns the file offset
    /// of the first chunk's header — the value `read_at` expects back.
    ///
    /// The full chunk chain is built in memory and written in a single
    /// `write_all` call: either the whole record lands on disk, or (on
    /// error) none of it does, and `next_write_offset` is left unchanged.
    pub fn append(&self, record: &[u8]) -> Result<u64, SegmentError> {
        if self.is_closed() {
            return Err(SegmentError::Closed);
        }

        let start = self.next_write_offset.load(Ordering::Acquire);
        let mut buf = Vec::with_capacity(record.len() + HEADER_SIZE as usize + 8);
        let mut pos = start;
        let mut consumed = 0usize;

        loop {
            let avail = avail_at(pos) as usize;
            let remaining = record.len() - consumed;
            let is_first = consumed == 0;

            let (chunk_len, chunk_type) = if remaining <= avail {
                (remaining, if is_first { ChunkType::Full } else { ChunkType::Last })
            } else {
                (avail, if is_first { ChunkType::First } else { ChunkType::Middle })
            };

            encode_chunk(&mut buf, chunk_type, &record[consumed..consumed + chunk_len]);
            consumed += chunk_len;
            pos += HEADER_SIZE + chunk_len as u64;

            let remainder_to_block_end = BLOCK_SIZE - pos % BLOCK_SIZE;
            if remainder_to_block_end <= HEADER_SIZE {
                buf.resize(buf.len() + remainder_to_block_end as usize, 0);
                pos += remainder_to_block_end;
            }

            if consumed == record.len() {
                break;
            }
        }

        // Writing through `&File` (rather than `&mut File`) lets readers
        // call `read_exact_at` concurrently without contending on a lock;
        // the OS append-mode cursor makes this single `write_all` atomic
        // with respect to the file's length as observed by other threads.
        (&self.file).write_all(&buf).map_err(|e| {
            self.record_error(e.to_string());
            SegmentError::Io(e)
        })?;

        self.next_write_offset.store(pos, Ordering::Release);
        trace!(start, len = record.len(), "appended record");
        Ok(start)
    }

    /// Reconstructs the record whose first chunk begins at `offset`
    /// (a value previously returned by [`Segment::append`]).
    pub fn read_at(&self, offset: u64) -> Result<Vec<u8>, SegmentError> {
        if self.is_closed() {
            return Err(SegmentError::Closed);
        }

        let size = self.size();
        let mut o = align_for_read(offset);
        let mut result = Vec::new();

        loop {
            if o + HEADER_SIZE > size {
                return Err(SegmentError::InvalidOffset {
                    offset,
                    reason: "offset is outside the segment's written range".into(),
                });
            }

            let mut header = [0u8; HEADER_SIZE as usize];
            self.file.read_exact_at(&mut header, o)?;

            let crc = u32::from_le_bytes(header[0..4].try_into().unwrap());
            let len = u16::from_le_bytes(header[4..6].try_into().unwrap()) as usize;
            let chunk_type =
                ChunkType::try_from(header[6]).map_err(|_| SegmentError::Corruption { offset: o })?;

            if o + HEADER_SIZE + len as u64 > size {
                return Err(SegmentError::Corruption { offset: o });
            }

            let mut payload = vec![0u8; len];
            self.file.read_exact_at(&mut payload, o + HEADER_SIZE)?;

            if checksum(&header[4..7], &payload) != crc {
                return Err(SegmentError::Corruption { offset: o });
            }

            result.extend_from_slice(&payload);

            match chunk_type {
                ChunkType::Full | ChunkType::Last => return Ok(result),
                ChunkType::First | ChunkType::Middle => {
                    o = align_for_read(o + HEADER_SIZE + len as u64);
                }
            }
        }
    }

    /// Flushes buffered data to durable storage.
    pub fn sync(&self) -> Result<(), SegmentError> {
        if self.is_closed() {
            return Err(SegmentError::Closed);
        }
        self.file.sync_all().map_err(|e| {
            self.record_error(e.to_string());
            SegmentError::Io(e)
        })
    }

    /// Best-effort sync followed by marking the segment closed. Idempotent
    /// — calling `close` more than once is a no-op after the first call.
    pub fn close(&self) -> Result<(), SegmentError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Err(e) = self.file.sync_all() {
            warn!(id = self.id, error = %e, "sync failed during segment close");
            self.record_error(e.to_string());
            return Err(SegmentError::Io(e));
        }
        Ok(())
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        if let Err(e) = self.close() {
            warn!(id = self.id, error = %e, "failed to close segment on drop");
        }
    }
}
