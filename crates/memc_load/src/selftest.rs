//! Built-in codec check run by `memc-load --test`.

use anyhow::{ensure, Context};
use tracing::info;

use crate::codec::{decode_payload, encode_payload};
use crate::record::parse_line;

pub const SAMPLE_LINES: [&str; 2] = [
    "idfa\t1rfw452y52g2gq4g\t55.55\t42.42\t1423,43,567,3,7,23",
    "gaid\t7rfw452y52g2gq4g\t55.55\t42.42\t7423,424",
];

/// Parse, encode and decode each sample line, failing on any mismatch.
pub fn run() -> anyhow::Result<()> {
    for line in SAMPLE_LINES {
        let record = parse_line(line).with_context(|| format!("sample line rejected: {line:?}"))?;
        let payload = encode_payload(&record);
        let decoded = decode_payload(&payload).context("decode sample payload")?;
        ensure!(
            decoded.apps == record.apps,
            "apps mismatch for {}: {:?} != {:?}",
            record.key(),
            decoded.apps,
            record.apps
        );
        ensure!(
            decoded.lat == Some(record.lat) && decoded.lon == Some(record.lon),
            "coordinates mismatch for {}",
            record.key()
        );
        info!(key = %record.key(), bytes = payload.len(), "sample round trip ok");
    }
    Ok(())
}
