//! memc-load entry point.
//!
//! Parses flags, installs logging, and runs one load over the input pattern.

use std::fs::{File, OpenOptions};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use clap::Parser;
use memc_load::config::{
    DEFAULT_BATCH_SIZE, DEFAULT_CHUNK_WORKERS, DEFAULT_FILE_JOBS, DEFAULT_MAX_ERROR_RATE,
};
use memc_load::shard::DEFAULT_DEVICE_TYPES;
use memc_load::{ErrorRateScope, LoaderConfig, RunSummary, ShardTable, StoreProtocol};

/// Load gzipped device app-install logs into sharded key-value stores.
#[derive(Parser, Debug, Clone)]
#[command(name = "memc-load")]
struct Args {
    /// Run the built-in codec check and exit.
    #[arg(short = 't', long)]
    test: bool,

    /// Write logs to this file instead of stderr.
    #[arg(short = 'l', long, env = "MEMC_LOAD_LOG")]
    log: Option<PathBuf>,

    /// Parse and batch everything but skip store writes.
    #[arg(long, env = "MEMC_LOAD_DRY")]
    dry: bool,

    /// Glob selecting the input files. Hidden files never match.
    #[arg(long, env = "MEMC_LOAD_PATTERN", default_value = "/data/appsinstalled/*.tsv.gz")]
    pattern: String,

    #[arg(long, env = "MEMC_LOAD_IDFA", default_value = "127.0.0.1:33013")]
    idfa: String,

    #[arg(long, env = "MEMC_LOAD_GAID", default_value = "127.0.0.1:33014")]
    gaid: String,

    #[arg(long, env = "MEMC_LOAD_ADID", default_value = "127.0.0.1:33015")]
    adid: String,

    #[arg(long, env = "MEMC_LOAD_DVID", default_value = "127.0.0.1:33016")]
    dvid: String,

    /// Wire protocol spoken to every endpoint.
    #[arg(long, env = "MEMC_LOAD_PROTOCOL", value_enum, default_value_t = StoreProtocol::Memcache)]
    protocol: StoreProtocol,

    /// Lines per worker chunk.
    #[arg(long, env = "MEMC_LOAD_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Files processed concurrently.
    #[arg(long, env = "MEMC_LOAD_FILE_JOBS", default_value_t = DEFAULT_FILE_JOBS)]
    file_jobs: usize,

    /// Chunk workers in flight per file.
    #[arg(long, env = "MEMC_LOAD_CHUNK_WORKERS", default_value_t = DEFAULT_CHUNK_WORKERS)]
    chunk_workers: usize,

    /// A file whose error rate reaches this value is reported as failed.
    #[arg(long, env = "MEMC_LOAD_MAX_ERROR_RATE", default_value_t = DEFAULT_MAX_ERROR_RATE)]
    max_error_rate: f64,

    /// Judge each file on its own counters or on the run's cumulative ones.
    #[arg(long, env = "MEMC_LOAD_ERROR_RATE_SCOPE", value_enum, default_value_t = ErrorRateScope::File)]
    error_rate_scope: ErrorRateScope,

    #[arg(long, env = "MEMC_LOAD_CONNECT_TIMEOUT", default_value = "5s")]
    connect_timeout: humantime::Duration,

    /// Deadline for one endpoint's whole bulk write.
    #[arg(long, env = "MEMC_LOAD_WRITE_TIMEOUT", default_value = "30s")]
    write_timeout: humantime::Duration,

    /// Write the run summary as JSON to this path.
    #[arg(long, env = "MEMC_LOAD_SUMMARY_OUT")]
    summary_out: Option<PathBuf>,
}

impl Args {
    fn loader_config(&self) -> LoaderConfig {
        let endpoints = [
            self.idfa.as_str(),
            self.gaid.as_str(),
            self.adid.as_str(),
            self.dvid.as_str(),
        ];
        let shards = ShardTable::new(DEFAULT_DEVICE_TYPES.into_iter().zip(endpoints));
        LoaderConfig {
            protocol: self.protocol,
            dry_run: self.dry,
            batch_size: self.batch_size,
            file_jobs: self.file_jobs,
            chunk_workers: self.chunk_workers,
            max_error_rate: self.max_error_rate,
            error_rate_scope: self.error_rate_scope,
            connect_timeout: self.connect_timeout.into(),
            write_timeout: self.write_timeout.into(),
            ..LoaderConfig::new(shards)
        }
    }
}

fn init_tracing(log: Option<&Path>, dry: bool) -> anyhow::Result<()> {
    let default_level = if dry { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_level.into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = match log {
        Some(path) => {
            let file: File = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).try_init()
        }
        None => {
            // Colors only on an interactive stderr and when NO_COLOR is unset.
            let ansi = std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none();
            builder
                .with_ansi(ansi)
                .with_writer(std::io::stderr)
                .try_init()
        }
    };
    installed.map_err(|err| anyhow::anyhow!("install tracing subscriber: {err}"))
}

fn write_summary(path: &Path, summary: &RunSummary) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create dir {}", parent.display()))?;
    }
    let data = serde_json::to_vec_pretty(summary).context("serialize summary")?;
    std::fs::write(path, data).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    if args.test {
        return memc_load::selftest::run();
    }

    tracing::info!(
        pattern = %args.pattern,
        dry = args.dry,
        protocol = %args.protocol,
        "memc-load started"
    );
    let summary = memc_load::run(args.loader_config(), &args.pattern).await?;
    tracing::info!(
        timelapse = %humantime::format_duration(std::time::Duration::from_millis(summary.elapsed_ms)),
        "done"
    );
    if let Some(path) = &args.summary_out {
        write_summary(path, &summary)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log.as_deref(), args.dry)?;

    if let Err(err) = run(args).await {
        tracing::error!(error = ?err, "unexpected error");
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_onto_loader_config() {
        let args = Args::try_parse_from([
            "memc-load",
            "--dry",
            "--protocol",
            "resp",
            "--gaid",
            "10.0.0.2:6379",
            "--batch-size",
            "100",
            "--error-rate-scope",
            "run",
            "--write-timeout",
            "2s",
        ])
        .expect("parse");
        let config = args.loader_config();
        assert!(config.dry_run);
        assert_eq!(config.protocol, StoreProtocol::Resp);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.error_rate_scope, ErrorRateScope::Run);
        assert_eq!(config.write_timeout, std::time::Duration::from_secs(2));
        assert_eq!(config.shards.route("gaid"), Ok("10.0.0.2:6379"));
        assert_eq!(config.shards.route("idfa"), Ok("127.0.0.1:33013"));
        assert_eq!(config.shards.route("adid"), Ok("127.0.0.1:33015"));
        assert_eq!(config.shards.route("dvid"), Ok("127.0.0.1:33016"));
        assert_eq!(config.shards.len(), DEFAULT_DEVICE_TYPES.len());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn defaults_follow_library_constants() {
        let args = Args::try_parse_from(["memc-load"]).expect("parse");
        assert_eq!(args.pattern, "/data/appsinstalled/*.tsv.gz");
        let config = args.loader_config();
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.protocol, StoreProtocol::Memcache);
        assert!(!config.dry_run);
    }
}
