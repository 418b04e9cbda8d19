//! Chunk worker: parse, route, accumulate, then one bulk write per endpoint.

use futures_util::future::join_all;
use tracing::{debug, error, warn};

use crate::batch::Batch;
use crate::codec::encode_payload;
use crate::counters::ChunkTally;
use crate::record::parse_line;
use crate::shard::ShardTable;
use crate::LoadContext;

/// Build the chunk's batch. Returns the batch and the number of rejected lines.
///
/// Blank lines are skipped without counting as errors.
pub fn accumulate<S: AsRef<str>>(lines: &[S], shards: &ShardTable) -> (Batch, u64) {
    let mut batch = Batch::new();
    let mut errors = 0u64;
    for line in lines {
        let line = line.as_ref();
        if line.trim().is_empty() {
            continue;
        }

        let Some(record) = parse_line(line) else {
            errors += 1;
            continue;
        };

        let endpoint = match shards.route(&record.device_type) {
            Ok(endpoint) => endpoint,
            Err(err) => {
                errors += 1;
                error!(error = %err, "unknown device type");
                continue;
            }
        };

        batch.insert(endpoint, record.key(), encode_payload(&record));
    }
    (batch, errors)
}

/// Process one chunk of raw lines and report what happened to it.
///
/// Never fails: per-line and per-endpoint problems are folded into the tally.
pub async fn process_chunk(lines: Vec<String>, ctx: &LoadContext) -> ChunkTally {
    let config = ctx.config.clone();
    let line_count = lines.len();
    let built = tokio::task::spawn_blocking(move || accumulate(&lines, &config.shards)).await;
    let (batch, line_errors) = match built {
        Ok(built) => built,
        Err(err) => {
            error!(lines = line_count, error = %err, "chunk parse task failed");
            return ChunkTally {
                errors: 1,
                ..ChunkTally::default()
            };
        }
    };

    let mut tally = ChunkTally {
        errors: line_errors,
        ..ChunkTally::default()
    };
    if batch.is_empty() {
        warn!(lines = line_count, errors = line_errors, "chunk produced no entries");
        return tally;
    }

    debug!(
        lines = line_count,
        endpoints = batch.endpoints(),
        entries = batch.entries(),
        errors = line_errors,
        "chunk batched"
    );
    let writes = batch.into_endpoints().map(|(endpoint, entries)| {
        let writer = ctx.writer.clone();
        async move { writer.write(&endpoint, &entries).await }
    });
    for outcome in join_all(writes).await {
        if !outcome.is_success() {
            tally.errors += 1;
            continue;
        }
        tally.processed += 1;
        tally.entries += outcome.entries() as u64;
    }
    tally
}
