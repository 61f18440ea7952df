//! WAL manager — segment roster, rollover, and sync policy.
//!
//! A [`Wal`] owns an ordered set of [`Segment`]s keyed by numeric segment
//! id. Every [`Wal::write`] routes to the active segment — the segment
//! with the greatest id — creating a new one first if the record would
//! not fit within [`WalOptions::max_segment_size`]. A [`RecordLocation`]
//! (segment id + file offset) is returned so callers can retain it and
//! later call [`Wal::read`] to get the record back, from this process or
//! a future one (after a successful [`Wal::sync`]).
//!
//! # On-disk layout
//!
//! The WAL directory contains segment files named `<id><ext>` (default
//! `<id>.seg`); other files are ignored. See [`crate::segment`] for the
//! on-disk chunk format within one segment file.
//!
//! # Sync policy
//!
//! A write triggers an immediate sync of the active segment when either:
//! - [`WalOptions::sync_per_write`] is set, or
//! - [`WalOptions::sync_bytes_threshold`] is nonzero and the cumulative
//!   bytes written since the last sync have reached it.
//!
//! Independently, if [`WalOptions::sync_interval`] is nonzero, a single
//! background thread wakes on that period and syncs every segment in the
//! roster, bounding durability delay regardless of write traffic.
//!
//! # Concurrency model
//!
//! All mutable WAL state (the segment roster, `next_id`) lives behind one
//! `RwLock`: `write` takes it exclusively (segment creation and append are
//! serialized), while `sync` and `read` take it only for shared access to
//! look up segments — once a segment handle is borrowed, its own I/O does
//! not require holding the WAL lock. Running counters (`IoStats`) are
//! plain atomics so the background sync thread and foreground writers
//! never contend on them.

#[cfg(test)]
mod tests;

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    thread,
    time::Duration,
};

use crossbeam::channel::{self, RecvTimeoutError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::segment::{self, HEADER_SIZE, Segment, SegmentError};

// ------------------------------------------------------------------------------------------------
// Options
// ------------------------------------------------------------------------------------------------

/// Configuration for a [`Wal`] instance.
#[derive(Debug, Clone)]
pub struct WalOptions {
    /// Base directory holding this WAL's segment files. Required.
    pub wal_dir: PathBuf,

    /// Segment filename extension, including the leading dot.
    pub file_extension: String,

    /// Upper bound on a single segment file's size, in bytes.
    pub max_segment_size: u64,

    /// Cumulative bytes written since the last sync that trigger a sync
    /// inside `write`. `0` disables the threshold.
    pub sync_bytes_threshold: u64,

    /// Period of the background sync task. `Duration::ZERO` disables it.
    pub sync_interval: Duration,

    /// If `true`, every `write` syncs the active segment before returning.
    pub sync_per_write: bool,

    /// Advisory: permits external compression of sealed segments. Core
    /// behavior is unaffected.
    pub compression_enabled: bool,

    /// Advisory: requests more verbose logging from embedders that honor it.
    pub verbose_logging: bool,
}

impl WalOptions {
    /// Options for `wal_dir` with every other field at its documented
    /// default.
    pub fn new(wal_dir: impl Into<PathBuf>) -> Self {
        Self {
            wal_dir: wal_dir.into(),
            ..Self::default()
        }
    }
}

impl Default for WalOptions {
    fn default() -> Self {
        Self {
            wal_dir: PathBuf::new(),
            file_extension: segment::DEFAULT_FILE_EXTENSION.to_string(),
            max_segment_size: 64 * 1024 * 1024,
            sync_bytes_threshold: 0,
            sync_interval: Duration::ZERO,
            sync_per_write: false,
            compression_enabled: false,
            verbose_logging: false,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Error types
// ------------------------------------------------------------------------------------------------

/// Errors returned by [`Wal`] operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// Error bubbled up from the active or addressed segment.
    #[error("segment error: {0}")]
    Segment(#[from] SegmentError),

    /// The record does not fit even in a freshly rolled-over segment.
    #[error(
        "record of {len} bytes (+ {HEADER_SIZE}-byte header) cannot fit in a segment bounded by max_segment_size={max_segment_size}"
    )]
    TooLargeData {
        /// Length of the rejected record.
        len: usize,
        /// The configured `max_segment_size`.
        max_segment_size: u64,
    },

    /// `read` was called with a segment id not present in the roster.
    #[error("unknown segment id {segment_id}")]
    UnknownSegment {
        /// The requested segment id.
        segment_id: u32,
    },

    /// Internal invariant violation (poisoned lock, unexpected state).
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Record location
// ------------------------------------------------------------------------------------------------

/// Identifies one record: the segment it was written to, and the file
/// offset of its first chunk within that segment.
///
/// Offsets are segment-local, so a caller that wants to read a record
/// back later must retain both fields, not just the offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLocation {
    /// The segment the record was appended to.
    pub segment_id: u32,
    /// Byte offset of the record's first chunk header within that segment.
    pub offset: u64,
}

// ------------------------------------------------------------------------------------------------
// IoStats
// ------------------------------------------------------------------------------------------------

/// A point-in-time snapshot of [`Wal`] I/O counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoStats {
    /// Total payload bytes written across all `write` calls.
    pub total_bytes_written: u64,
    /// Total number of successful `write` calls.
    pub total_write_ops: u64,
    /// Payload bytes written since the last sync.
    pub bytes_since_last_sync: u64,
    /// `write` calls since the last sync.
    pub ops_since_last_sync: u64,
    /// Total number of sync operations performed (foreground or background).
    pub sync_ops: u64,
}

/// Atomic counters backing [`IoStats`]; mutated without holding the WAL's
/// `RwLock` so the background sync thread and foreground writers never
/// contend on them.
#[derive(Debug, Default)]
struct IoStatsInner {
    total_bytes_written: AtomicU64,
    total_write_ops: AtomicU64,
    bytes_since_last_sync: AtomicU64,
    ops_since_last_sync: AtomicU64,
    sync_ops: AtomicU64,
}

impl IoStatsInner {
    fn snapshot(&self) -> IoStats {
        IoStats {
            total_bytes_written: self.total_bytes_written.load(Ordering::Relaxed),
            total_write_ops: self.total_write_ops.load(Ordering::Relaxed),
            bytes_since_last_sync: self.bytes_since_last_sync.load(Ordering::Relaxed),
            ops_since_last_sync: self.ops_since_last_sync.load(Ordering::Relaxed),
            sync_ops: self.sync_ops.load(Ordering::Relaxed),
        }
    }

    fn record_write(&self, len: u64) {
        self.total_bytes_written.fetch_add(len, Ordering::Relaxed);
        self.total_write_ops.fetch_add(1, Ordering::Relaxed);
        self.bytes_since_last_sync.fetch_add(len, Ordering::Relaxed);
        self.ops_since_last_sync.fetch_add(1, Ordering::Relaxed);
    }

    fn record_sync(&self) {
        self.sync_ops.fetch_add(1, Ordering::Relaxed);
        self.bytes_since_last_sync.store(0, Ordering::Relaxed);
        self.ops_since_last_sync.store(0, Ordering::Relaxed);
    }
}

// ------------------------------------------------------------------------------------------------
// Wal
// ------------------------------------------------------------------------------------------------

struct WalInner {
    /// Segment roster, keyed by numeric id. `BTreeMap` keeps the greatest
    /// key — the active segment — directly addressable via
    /// `iter().next_back()`, independent of how the basename formats.
    segments: BTreeMap<u32, Segment>,
    next_id: u32,
}

struct WalShared {
    options: WalOptions,
    inner: RwLock<WalInner>,
    io_stats: IoStatsInner,
    last_error: Mutex<Option<String>>,
}

/// A durable, append-only record store backed by one or more [`Segment`]s.
///
/// See the [module-level documentation](self) for the on-disk layout,
/// sync policy, and concurrency model.
pub struct Wal {
    shared: Arc<WalShared>,
    stop_tx: Option<channel::Sender<()>>,
    sync_thread: Option<thread::JoinHandle<()>>,
}

impl Wal {
    /// Opens (creating if missing) the WAL directory named by `options`,
    /// loads any existing segment files into the roster, and — if
    /// `options.sync_interval` is nonzero — starts the background sync
    /// thread.
    ///
    /// If the directory cannot be created, the error is recorded in
    /// [`Wal::last_error`] rather than failing construction; the instance
    /// is left in a degraded state where the first `write` will fail
    /// (segment creation under a missing directory fails the same way).
    pub fn open(options: WalOptions) -> Result<Self, WalError> {
        let last_error = Mutex::new(None);

        if let Err(e) = fs::create_dir_all(&options.wal_dir) {
            warn!(
                dir = %options.wal_dir.display(),
                error = %e,
                "failed to create WAL directory; WAL is degraded until this is resolved"
            );
            *last_error.lock().unwrap_or_else(|p| p.into_inner()) = Some(e.to_string());
        }

        let mut segments = BTreeMap::new();
        let mut next_id = 0u32;

        if let Ok(entries) = fs::read_dir(&options.wal_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                let Some(id) = parse_segment_id(&path, &options.file_extension) else {
                    debug!(path = %path.display(), "ignoring file with unrecognized extension");
                    continue;
                };
                let segment = Segment::open(&options.wal_dir, id, &options.file_extension)?;
                next_id = next_id.max(id);
                segments.insert(id, segment);
            }
        }

        info!(
            dir = %options.wal_dir.display(),
            segments = segments.len(),
            "opened WAL"
        );

        let shared = Arc::new(WalShared {
            options,
            inner: RwLock::new(WalInner { segments, next_id }),
            io_stats: IoStatsInner::default(),
            last_error,
        });

        let (stop_tx, sync_thread) = if shared.options.sync_interval > Duration::ZERO {
            let shared_clone = Arc::clone(&shared);
            let interval = shared.options.sync_interval;
            let (tx, rx) = channel::bounded::<()>(0);
            let handle = thread::Builder::new()
                .name("wal-sync".to_string())
                .spawn(move || background_sync_loop(shared_clone, interval, rx))
                .expect("failed to spawn WAL background sync thread");
            (Some(tx), Some(handle))
        } else {
            (None, None)
        };

        Ok(Self {
            shared,
            stop_tx,
            sync_thread,
        })
    }

    /// Appends `record` to the active segment, rolling over to a new
    /// segment first if it would not otherwise fit, and applying the sync
    /// policy (see [module docs](self)) before returning.
    pub fn write(&self, record: &[u8]) -> Result<RecordLocation, WalError> {
        if record.len() as u64 + HEADER_SIZE > self.shared.options.max_segment_size {
            return Err(WalError::TooLargeData {
                len: record.len(),
                max_segment_size: self.shared.options.max_segment_size,
            });
        }

        let mut inner = self
            .shared
            .inner
            .write()
            .map_err(|_| WalError::Internal("WAL lock poisoned".into()))?;

        let needs_rollover = match inner.segments.iter().next_back() {
            None => true,
            Some((_, active)) => {
                active.size() + segment::required_space(record.len())
                    > self.shared.options.max_segment_size
            }
        };

        if needs_rollover {
            inner.next_id += 1;
            let id = inner.next_id;
            let segment = Segment::open(
                &self.shared.options.wal_dir,
                id,
                &self.shared.options.file_extension,
            )?;
            info!(id, "WAL rolled over to new segment");
            inner.segments.insert(id, segment);
        }

        let (segment_id, offset) = {
            let (id, active) = inner
                .segments
                .iter()
                .next_back()
                .expect("a segment was just ensured to exist");
            (*id, active.append(record)?)
        };

        self.shared.io_stats.record_write(record.len() as u64);

        if self.need_sync() {
            if let Some((_, active)) = inner.segments.iter().next_back() {
                active.sync()?;
            }
            self.shared.io_stats.record_sync();
        }

        Ok(RecordLocation { segment_id, offset })
    }

    /// Reads back the record at `offset` within segment `segment_id`, as
    /// previously returned in a [`RecordLocation`] by [`Wal::write`].
    ///
    /// Offsets are segment-local (non-goal: no cross-segment logical
    /// record), so both fields of the original `RecordLocation` must be
    /// supplied — see [`Wal::read_at`] for a convenience overload that
    /// takes the struct directly.
    pub fn read(&self, segment_id: u32, offset: u64) -> Result<Vec<u8>, WalError> {
        let inner = self
            .shared
            .inner
            .read()
            .map_err(|_| WalError::Internal("WAL lock poisoned".into()))?;
        let segment = inner
            .segments
            .get(&segment_id)
            .ok_or(WalError::UnknownSegment { segment_id })?;
        Ok(segment.read_at(offset)?)
    }

    /// Convenience wrapper over [`Wal::read`] taking a [`RecordLocation`]
    /// directly, as returned by [`Wal::write`].
    pub fn read_at(&self, location: RecordLocation) -> Result<Vec<u8>, WalError> {
        self.read(location.segment_id, location.offset)
    }

    /// Flushes every segment in the roster to durable storage.
    ///
    /// Safe to call concurrently with reads and with the background sync
    /// thread; serializes against a `write` in progress only for the
    /// duration of the roster lookup, not the underlying segment I/O.
    pub fn sync(&self) -> Result<(), WalError> {
        let inner = self
            .shared
            .inner
            .read()
            .map_err(|_| WalError::Internal("WAL lock poisoned".into()))?;
        for segment in inner.segments.values() {
            segment.sync()?;
        }
        self.shared.io_stats.record_sync();
        Ok(())
    }

    /// A snapshot of the running I/O counters.
    pub fn stats(&self) -> IoStats {
        self.shared.io_stats.snapshot()
    }

    /// The last filesystem error recorded against this WAL (directory
    /// creation at construction, or a background sync failure), if any.
    pub fn last_error(&self) -> Option<String> {
        self.shared
            .last_error
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// The id of the active (greatest-id) segment, if any segment exists yet.
    pub fn active_segment_id(&self) -> Option<u32> {
        self.shared
            .inner
            .read()
            .ok()
            .and_then(|inner| inner.segments.keys().next_back().copied())
    }

    fn need_sync(&self) -> bool {
        if self.shared.options.sync_per_write {
            return true;
        }
        self.shared.options.sync_bytes_threshold > 0
            && self
                .shared
                .io_stats
                .bytes_since_last_sync
                .load(Ordering::Relaxed)
                >= self.shared.options.sync_bytes_threshold
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            // A disconnected receiver (thread already exited) makes this a
            // no-op; either way the thread is about to stop.
            let _ = tx.send(());
        }
        if let Some(handle) = self.sync_thread.take() {
            if handle.join().is_err() {
                warn!("WAL background sync thread panicked");
            }
        }

        let inner = match self.shared.inner.read() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };
        for segment in inner.segments.values() {
            if let Err(e) = segment.sync() {
                warn!(error = %e, "failed to sync segment during WAL shutdown");
            }
        }
    }
}

fn background_sync_loop(
    shared: Arc<WalShared>,
    interval: Duration,
    stop_rx: channel::Receiver<()>,
) {
    loop {
        match stop_rx.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                let inner = match shared.inner.read() {
                    Ok(guard) => guard,
                    Err(poison) => poison.into_inner(),
                };
                let mut any_failed = false;
                for segment in inner.segments.values() {
                    if let Err(e) = segment.sync() {
                        warn!(error = %e, "background WAL sync failed");
                        any_failed = true;
                    }
                }
                drop(inner);
                if any_failed {
                    continue;
                }
                shared.io_stats.record_sync();
            }
        }
    }
}

/// Parses the numeric id out of a segment filename `<id><ext>`.
fn parse_segment_id(path: &Path, ext: &str) -> Option<u32> {
    let name = path.file_name()?.to_str()?;
    name.strip_suffix(ext)?.parse::<u32>().ok()
}
