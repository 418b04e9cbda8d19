//! Bulk loader for device app-install logs.
//!
//! Reads gzip-compressed TSV files, routes each record to a store endpoint by
//! device type, and writes the protobuf-encoded payloads in one bulk write per
//! endpoint and chunk. See `driver::run` for the entry point.

use std::sync::Arc;

pub mod batch;
pub mod codec;
pub mod config;
pub mod counters;
pub mod driver;
pub mod error;
pub mod file;
pub mod memcache;
pub mod record;
pub mod selftest;
pub mod shard;
pub mod store;
pub mod stub_server;
pub mod worker;

pub use config::{ErrorRateScope, LoaderConfig, StoreProtocol};
pub use counters::{ChunkTally, RunCounters, RunSnapshot};
pub use driver::{run, RunSummary};
pub use error::{LoadError, StoreError};
pub use file::{process_file, FileOutcome, FileReport};
pub use record::{parse_line, Record};
pub use shard::ShardTable;
pub use store::{StoreClient, StoreWriter, WriteOutcome};

/// Everything a file job and its chunk workers share for the whole run.
#[derive(Clone)]
pub struct LoadContext {
    pub config: Arc<LoaderConfig>,
    pub writer: StoreWriter,
    pub counters: RunCounters,
}

impl LoadContext {
    pub fn new(config: LoaderConfig) -> Self {
        let writer = StoreWriter::from_config(&config);
        Self::with_writer(config, writer)
    }

    /// Use a caller-supplied writer instead of the configured protocol client.
    pub fn with_writer(config: LoaderConfig, writer: StoreWriter) -> Self {
        Self {
            config: Arc::new(config),
            writer,
            counters: RunCounters::new(),
        }
    }
}
