//! File orchestrator: one gzip log file from open to rename.
//!
//! A blocking reader task decodes the file and cuts it into chunks of
//! `batch_size` lines. Chunks travel over a bounded channel to at most
//! `chunk_workers` concurrent worker tasks, so a slow store back-pressures the
//! decoder instead of buffering the whole file. Once every worker has joined,
//! the error rate is judged and the file is renamed to `.<name>` whatever the
//! verdict; only a read error leaves it in place for the next run.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::MultiGzDecoder;
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::ErrorRateScope;
use crate::counters::{ChunkTally, FileBucket, FileCounters};
use crate::error::LoadError;
use crate::worker;
use crate::LoadContext;

/// Verdict for one finished file.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FileOutcome {
    Loaded { error_rate: f64 },
    Failed { error_rate: f64 },
    /// Nothing was written, so there is no rate to judge.
    Empty,
}

impl FileOutcome {
    pub fn bucket(&self) -> FileBucket {
        match self {
            Self::Loaded { .. } => FileBucket::Loaded,
            Self::Failed { .. } => FileBucket::Failed,
            Self::Empty => FileBucket::Empty,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub renamed_to: PathBuf,
    pub outcome: FileOutcome,
    pub counters: FileCounters,
    pub lines: u64,
    pub chunks: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct ReadStats {
    lines: u64,
    chunks: u64,
}

/// Judge a set of counters against the configured threshold.
///
/// `processed == 0` is `Empty` and never divides.
pub fn decide(counters: ChunkTally, max_error_rate: f64) -> FileOutcome {
    if counters.processed == 0 {
        return FileOutcome::Empty;
    }
    let error_rate = counters.errors as f64 / counters.processed as f64;
    if error_rate < max_error_rate {
        FileOutcome::Loaded { error_rate }
    } else {
        FileOutcome::Failed { error_rate }
    }
}

/// Sibling path with the base name prefixed by `.`.
pub fn dotted_path(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?;
    let mut dotted = std::ffi::OsString::from(".");
    dotted.push(name);
    Some(path.with_file_name(dotted))
}

async fn dot_rename(path: &Path) -> Result<PathBuf, LoadError> {
    let Some(target) = dotted_path(path) else {
        return Err(LoadError::Rename {
            from: path.to_path_buf(),
            to: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"),
        });
    };
    tokio::fs::rename(path, &target)
        .await
        .map_err(|source| LoadError::Rename {
            from: path.to_path_buf(),
            to: target.clone(),
            source,
        })?;
    Ok(target)
}

fn open_lines(path: &Path) -> Result<BufReader<MultiGzDecoder<BufReader<File>>>, LoadError> {
    let file = File::open(path).map_err(|source| LoadError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::new(MultiGzDecoder::new(BufReader::new(file))))
}

/// Blocking half of the pipeline. Stops early if the receiver goes away.
fn read_chunks<R: BufRead>(
    mut reader: R,
    batch_size: usize,
    tx: mpsc::Sender<Vec<String>>,
    path: &Path,
) -> Result<ReadStats, LoadError> {
    let mut stats = ReadStats::default();
    let mut chunk = Vec::with_capacity(batch_size.min(4096));
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .map_err(|source| LoadError::Read {
                path: path.to_path_buf(),
                line: stats.lines + 1,
                source,
            })?;
        if n == 0 {
            break;
        }
        stats.lines += 1;
        chunk.push(String::from_utf8_lossy(&buf).into_owned());
        if chunk.len() >= batch_size {
            let full = std::mem::replace(&mut chunk, Vec::with_capacity(batch_size.min(4096)));
            stats.chunks += 1;
            if tx.blocking_send(full).is_err() {
                return Ok(stats);
            }
        }
    }
    if !chunk.is_empty() {
        stats.chunks += 1;
        let _ = tx.blocking_send(chunk);
    }
    Ok(stats)
}

/// Load one file end to end and rename it.
///
/// Errors are fatal to this file only; the caller logs them and moves on.
pub async fn process_file(path: PathBuf, ctx: LoadContext) -> Result<FileReport, LoadError> {
    info!(file = %path.display(), "processing");
    let reader = open_lines(&path)?;

    let config = ctx.config.clone();
    let (tx, mut rx) = mpsc::channel::<Vec<String>>(config.chunk_workers.max(1));
    let reader_path = path.clone();
    let batch_size = config.batch_size.max(1);
    let reader_task =
        tokio::task::spawn_blocking(move || read_chunks(reader, batch_size, tx, &reader_path));

    let permits = Arc::new(Semaphore::new(config.chunk_workers.max(1)));
    let mut workers = Vec::new();
    while let Some(lines) = rx.recv().await {
        let permit = permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|err| LoadError::Join {
                path: path.clone(),
                detail: err.to_string(),
            })?;
        let ctx = ctx.clone();
        workers.push(tokio::spawn(async move {
            let _permit = permit;
            let tally = worker::process_chunk(lines, &ctx).await;
            ctx.counters.record_chunk(tally);
            tally
        }));
    }

    let mut counters = FileCounters::default();
    for task in workers {
        match task.await {
            Ok(tally) => counters.merge(tally),
            Err(err) => {
                error!(file = %path.display(), error = %err, "chunk worker failed");
                let lost = ChunkTally {
                    errors: 1,
                    ..ChunkTally::default()
                };
                ctx.counters.record_chunk(lost);
                counters.merge(lost);
            }
        }
    }

    let stats = match reader_task.await {
        Ok(Ok(stats)) => stats,
        Ok(Err(err)) => {
            warn!(
                file = %path.display(),
                processed = counters.processed,
                errors = counters.errors,
                "read failed, leaving file in place"
            );
            return Err(err);
        }
        Err(err) => {
            return Err(LoadError::Join {
                path,
                detail: err.to_string(),
            })
        }
    };
    debug!(
        file = %path.display(),
        lines = stats.lines,
        chunks = stats.chunks,
        "all chunks joined"
    );

    let basis = match config.error_rate_scope {
        ErrorRateScope::File => counters,
        ErrorRateScope::Run => ctx.counters.tally(),
    };
    let outcome = decide(basis, config.max_error_rate);
    match outcome {
        FileOutcome::Loaded { error_rate } => info!(
            file = %path.display(),
            error_rate,
            processed = basis.processed,
            "acceptable error rate, successful load"
        ),
        FileOutcome::Failed { error_rate } => error!(
            file = %path.display(),
            error_rate,
            max_error_rate = config.max_error_rate,
            "high error rate, failed load"
        ),
        FileOutcome::Empty => warn!(
            file = %path.display(),
            errors = basis.errors,
            "nothing written, no error rate"
        ),
    }

    let renamed_to = dot_rename(&path).await?;
    Ok(FileReport {
        path,
        renamed_to,
        outcome,
        counters,
        lines: stats.lines,
        chunks: stats.chunks,
    })
}
