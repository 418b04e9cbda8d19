//! Pipeline driver: expand the pattern and run every file through the
//! orchestrator with bounded file-level parallelism.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use glob::MatchOptions;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::config::LoaderConfig;
use crate::counters::{FileBucket, RunSnapshot};
use crate::error::LoadError;
use crate::file::process_file;
use crate::LoadContext;

/// What one run did, logged at the end and optionally written as JSON.
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub pattern: String,
    pub files_seen: u64,
    #[serde(flatten)]
    pub counters: RunSnapshot,
    pub elapsed_ms: u64,
}

/// Regular files matching `pattern`, sorted, hidden files excluded.
///
/// Files already renamed to `.<name>` never match, which is what makes a
/// second run over the same pattern a no-op.
pub fn discover(pattern: &str) -> Result<Vec<PathBuf>, LoadError> {
    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: false,
        require_literal_leading_dot: true,
    };
    let paths = glob::glob_with(pattern, options).map_err(|source| LoadError::Pattern {
        pattern: pattern.to_string(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in paths {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(path) => debug!(path = %path.display(), "skipping non-file match"),
            Err(err) => warn!(path = %err.path().display(), error = %err.error(), "unreadable glob entry"),
        }
    }
    files.sort();
    Ok(files)
}

/// Validate `config`, then load every file matching `pattern`.
pub async fn run(config: LoaderConfig, pattern: &str) -> Result<RunSummary, LoadError> {
    config.validate()?;
    run_with_context(LoadContext::new(config), pattern).await
}

/// Same as [`run`] with a prepared context (custom writer, shared counters).
pub async fn run_with_context(ctx: LoadContext, pattern: &str) -> Result<RunSummary, LoadError> {
    let started = Instant::now();
    let files = discover(pattern)?;
    info!(
        pattern,
        files = files.len(),
        endpoints = ctx.config.shards.len(),
        dry_run = ctx.writer.is_dry_run(),
        protocol = %ctx.config.protocol,
        "starting load"
    );

    let permits = Arc::new(Semaphore::new(ctx.config.file_jobs.max(1)));
    let mut jobs = Vec::with_capacity(files.len());
    for path in files.iter().cloned() {
        let permit = permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|err| LoadError::Config(format!("file job limiter closed: {err}")))?;
        let ctx = ctx.clone();
        jobs.push(tokio::spawn(async move {
            let _permit = permit;
            let result = process_file(path.clone(), ctx).await;
            (path, result)
        }));
    }

    for job in jobs {
        match job.await {
            Ok((_, Ok(report))) => {
                debug!(
                    file = %report.path.display(),
                    renamed_to = %report.renamed_to.display(),
                    lines = report.lines,
                    processed = report.counters.processed,
                    errors = report.counters.errors,
                    "file done"
                );
                ctx.counters.record_file(report.outcome.bucket());
            }
            Ok((path, Err(err))) => {
                error!(file = %path.display(), error = %err, "file failed");
                ctx.counters.record_file(FileBucket::Errored);
            }
            Err(err) => {
                error!(error = %err, "file job panicked");
                ctx.counters.record_file(FileBucket::Errored);
            }
        }
    }

    let summary = RunSummary {
        pattern: pattern.to_string(),
        files_seen: files.len() as u64,
        counters: ctx.counters.snapshot(),
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    info!(
        files_seen = summary.files_seen,
        loaded = summary.counters.files_loaded,
        failed = summary.counters.files_failed,
        empty = summary.counters.files_empty,
        errored = summary.counters.files_errored,
        processed = summary.counters.processed,
        errors = summary.counters.errors,
        entries = summary.counters.entries,
        elapsed_ms = summary.elapsed_ms,
        "load finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_skips_hidden_and_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("b.tsv.gz"), b"").expect("write");
        std::fs::write(dir.path().join("a.tsv.gz"), b"").expect("write");
        std::fs::write(dir.path().join(".c.tsv.gz"), b"").expect("write");
        std::fs::create_dir(dir.path().join("d.tsv.gz")).expect("mkdir");

        let pattern = format!("{}/*.tsv.gz", dir.path().display());
        let files = discover(&pattern).expect("discover");
        let names: Vec<_> = files
            .iter()
            .filter_map(|p| p.file_name()?.to_str().map(str::to_string))
            .collect();
        assert_eq!(names, vec!["a.tsv.gz", "b.tsv.gz"]);
    }

    #[test]
    fn bad_pattern_is_rejected() {
        assert!(matches!(
            discover("/tmp/[unclosed"),
            Err(LoadError::Pattern { .. })
        ));
    }

    #[tokio::test]
    async fn invalid_config_fails_before_touching_files() {
        let config = LoaderConfig::new(crate::ShardTable::default());
        assert!(matches!(
            run(config, "/nonexistent/*.gz").await,
            Err(LoadError::Config(_))
        ));
    }
}
