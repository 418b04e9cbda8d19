//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use memc_load::shard::DEFAULT_DEVICE_TYPES;
use memc_load::stub_server::StubServer;
use memc_load::{LoaderConfig, ShardTable, StoreProtocol};

/// Timeouts used by every test config; short so a broken endpoint fails fast.
pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Write `lines` as one gzip member, newline-terminated.
pub fn write_gz(path: &Path, lines: &[String]) {
    let file = File::create(path).expect("create gz fixture");
    let mut gz = GzEncoder::new(file, Compression::fast());
    for line in lines {
        gz.write_all(line.as_bytes()).expect("write gz fixture");
        gz.write_all(b"\n").expect("write gz fixture");
    }
    gz.finish().expect("finish gz fixture");
}

/// `count` well-formed lines cycling over the four device types.
pub fn good_lines(prefix: &str, count: usize) -> Vec<String> {
    const TYPES: [&str; 4] = DEFAULT_DEVICE_TYPES;
    (0..count)
        .map(|i| {
            format!(
                "{}\t{prefix}{i:05}\t{}.5\t-{}.25\t{},{},{}",
                TYPES[i % TYPES.len()],
                i % 90,
                i % 180,
                i,
                i + 1000,
                i * 3
            )
        })
        .collect()
}

/// Glob matching every `*.tsv.gz` directly under `dir`.
pub fn pattern_for(dir: &Path) -> String {
    format!("{}/*.tsv.gz", dir.display())
}

pub fn dotted(path: &Path) -> PathBuf {
    let name = path.file_name().expect("file name").to_string_lossy();
    path.with_file_name(format!(".{name}"))
}

/// Every device type routed to the same endpoint.
pub fn config_for(endpoint: &str, protocol: StoreProtocol) -> LoaderConfig {
    let shards = ShardTable::new(
        DEFAULT_DEVICE_TYPES
            .into_iter()
            .map(|device_type| (device_type, endpoint)),
    );
    LoaderConfig {
        protocol,
        batch_size: 64,
        file_jobs: 2,
        chunk_workers: 3,
        connect_timeout: IO_TIMEOUT,
        write_timeout: IO_TIMEOUT,
        ..LoaderConfig::new(shards)
    }
}

/// Start a stub store on an ephemeral port, or `None` where binding is not allowed.
pub async fn start_stub(protocol: StoreProtocol, test: &str) -> Option<StubServer> {
    let addr: SocketAddr = "127.0.0.1:0".parse().expect("addr");
    match StubServer::start(addr, protocol).await {
        Ok(server) => Some(server),
        Err(err) => {
            let denied = err
                .downcast_ref::<std::io::Error>()
                .is_some_and(|io| io.kind() == std::io::ErrorKind::PermissionDenied);
            if denied {
                eprintln!("skipping {test}: cannot bind local port ({err})");
                return None;
            }
            panic!("start stub store failed: {err:#}");
        }
    }
}

/// An address nothing listens on.
pub fn closed_endpoint() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    addr.to_string()
}
