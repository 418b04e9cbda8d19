//! Runtime configuration shared by every layer of the loader.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::error::LoadError;
use crate::shard::ShardTable;

/// Default number of lines handed to one worker.
pub const DEFAULT_BATCH_SIZE: usize = 65_000;
/// Default number of files processed concurrently.
pub const DEFAULT_FILE_JOBS: usize = 4;
/// Default number of chunk workers in flight per file.
pub const DEFAULT_CHUNK_WORKERS: usize = 8;
/// Error rate at or above which a file load is reported as failed.
pub const DEFAULT_MAX_ERROR_RATE: f64 = 0.01;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Wire protocol spoken to the store endpoints.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StoreProtocol {
    /// Memcached text protocol, one pipelined `set` per entry.
    #[default]
    #[value(alias = "memcached")]
    Memcache,
    /// Redis protocol, one `MSET` per batch.
    #[value(alias = "redis")]
    Resp,
}

impl fmt::Display for StoreProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memcache => f.write_str("memcache"),
            Self::Resp => f.write_str("resp"),
        }
    }
}

/// Counters consulted when deciding whether a file loaded cleanly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ErrorRateScope {
    /// Only the file's own chunks.
    #[default]
    File,
    /// Everything counted so far in the run, including files still in flight.
    Run,
}

/// Immutable loader configuration.
#[derive(Clone, Debug)]
pub struct LoaderConfig {
    pub shards: ShardTable,
    pub protocol: StoreProtocol,
    pub dry_run: bool,
    pub batch_size: usize,
    pub file_jobs: usize,
    pub chunk_workers: usize,
    pub max_error_rate: f64,
    pub error_rate_scope: ErrorRateScope,
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
}

impl LoaderConfig {
    pub fn new(shards: ShardTable) -> Self {
        Self {
            shards,
            protocol: StoreProtocol::default(),
            dry_run: false,
            batch_size: DEFAULT_BATCH_SIZE,
            file_jobs: DEFAULT_FILE_JOBS,
            chunk_workers: DEFAULT_CHUNK_WORKERS,
            max_error_rate: DEFAULT_MAX_ERROR_RATE,
            error_rate_scope: ErrorRateScope::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    pub fn validate(&self) -> Result<(), LoadError> {
        if self.shards.is_empty() {
            return Err(LoadError::Config("no device type endpoints configured".into()));
        }
        if let Some((device_type, _)) = self.shards.iter().find(|(_, addr)| addr.trim().is_empty()) {
            return Err(LoadError::Config(format!(
                "empty endpoint for device type {device_type}"
            )));
        }
        if self.batch_size == 0 {
            return Err(LoadError::Config("batch size must be > 0".into()));
        }
        if self.file_jobs == 0 {
            return Err(LoadError::Config("file jobs must be > 0".into()));
        }
        if self.chunk_workers == 0 {
            return Err(LoadError::Config("chunk workers must be > 0".into()));
        }
        if !(self.max_error_rate > 0.0 && self.max_error_rate <= 1.0) {
            return Err(LoadError::Config(format!(
                "max error rate must be in (0, 1], got {}",
                self.max_error_rate
            )));
        }
        if self.connect_timeout.is_zero() || self.write_timeout.is_zero() {
            return Err(LoadError::Config("timeouts must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LoaderConfig {
        LoaderConfig::new(ShardTable::new([("idfa", "127.0.0.1:33013")]))
    }

    #[test]
    fn defaults_are_valid() {
        let config = config();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch_size, 65_000);
        assert_eq!(config.file_jobs, 4);
        assert_eq!(config.chunk_workers, 8);
        assert_eq!(config.protocol, StoreProtocol::Memcache);
        assert_eq!(config.error_rate_scope, ErrorRateScope::File);
    }

    #[test]
    fn rejects_degenerate_values() {
        let mut bad = config();
        bad.batch_size = 0;
        assert!(matches!(bad.validate(), Err(LoadError::Config(_))));

        let mut bad = config();
        bad.max_error_rate = 0.0;
        assert!(bad.validate().is_err());

        let mut bad = config();
        bad.shards = ShardTable::new([("idfa", " ")]);
        assert!(bad.validate().is_err());

        let mut bad = config();
        bad.shards = ShardTable::default();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn parses_protocol_and_scope_names() {
        use clap::ValueEnum;

        assert_eq!(StoreProtocol::from_str("RESP", true), Ok(StoreProtocol::Resp));
        assert_eq!(StoreProtocol::from_str("memcached", false), Ok(StoreProtocol::Memcache));
        assert!(StoreProtocol::from_str("http", true).is_err());
        assert_eq!(ErrorRateScope::from_str("run", false), Ok(ErrorRateScope::Run));
        assert!(ErrorRateScope::from_str("global", false).is_err());
        assert_eq!(StoreProtocol::Resp.to_string(), "resp");
    }
}
