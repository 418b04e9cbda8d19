//! Ingestion counters.
//!
//! Workers never share mutable state: each returns a `ChunkTally`, which the
//! file orchestrator folds into its `FileCounters` after the join barrier and
//! also adds to the process-wide `RunCounters`.
//!
//! Notes:
//! - `processed` counts successful bulk writes (one per endpoint per chunk),
//!   not records. `entries` counts the records those writes carried.
//! - `errors` counts rejected lines, unroutable lines and failed bulk writes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Counts produced by one worker over one chunk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ChunkTally {
    pub processed: u64,
    pub errors: u64,
    pub entries: u64,
}

impl ChunkTally {
    pub fn merge(&mut self, other: ChunkTally) {
        self.processed += other.processed;
        self.errors += other.errors;
        self.entries += other.entries;
    }
}

/// Folded counts of every chunk of one file.
pub type FileCounters = ChunkTally;

/// Snapshot of the run-wide counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunSnapshot {
    pub processed: u64,
    pub errors: u64,
    pub entries: u64,
    pub files_loaded: u64,
    pub files_failed: u64,
    pub files_empty: u64,
    pub files_errored: u64,
}

/// Process-wide counters shared by every file job.
#[derive(Clone, Debug, Default)]
pub struct RunCounters {
    inner: Arc<RunCountersInner>,
}

#[derive(Debug, Default)]
struct RunCountersInner {
    processed: AtomicU64,
    errors: AtomicU64,
    entries: AtomicU64,
    files_loaded: AtomicU64,
    files_failed: AtomicU64,
    files_empty: AtomicU64,
    files_errored: AtomicU64,
}

/// Which file-level bucket a finished file job lands in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileBucket {
    Loaded,
    Failed,
    Empty,
    Errored,
}

impl RunCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_chunk(&self, tally: ChunkTally) {
        let inner = &self.inner;
        if tally.processed > 0 {
            inner.processed.fetch_add(tally.processed, Ordering::Relaxed);
        }
        if tally.errors > 0 {
            inner.errors.fetch_add(tally.errors, Ordering::Relaxed);
        }
        if tally.entries > 0 {
            inner.entries.fetch_add(tally.entries, Ordering::Relaxed);
        }
    }

    pub fn record_file(&self, bucket: FileBucket) {
        let counter = match bucket {
            FileBucket::Loaded => &self.inner.files_loaded,
            FileBucket::Failed => &self.inner.files_failed,
            FileBucket::Empty => &self.inner.files_empty,
            FileBucket::Errored => &self.inner.files_errored,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative `(processed, errors, entries)` across every file so far.
    pub fn tally(&self) -> ChunkTally {
        ChunkTally {
            processed: self.inner.processed.load(Ordering::Relaxed),
            errors: self.inner.errors.load(Ordering::Relaxed),
            entries: self.inner.entries.load(Ordering::Relaxed),
        }
    }

    pub fn snapshot(&self) -> RunSnapshot {
        let tally = self.tally();
        RunSnapshot {
            processed: tally.processed,
            errors: tally.errors,
            entries: tally.entries,
            files_loaded: self.inner.files_loaded.load(Ordering::Relaxed),
            files_failed: self.inner.files_failed.load(Ordering::Relaxed),
            files_empty: self.inner.files_empty.load(Ordering::Relaxed),
            files_errored: self.inner.files_errored.load(Ordering::Relaxed),
        }
    }
}
