//! Standalone in-memory store for local runs of `memc-load`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use memc_load::stub_server::{self, StubStore};
use memc_load::StoreProtocol;
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(name = "memc-stub")]
struct Args {
    #[arg(long, env = "MEMC_STUB_LISTEN", default_value = "127.0.0.1:33013")]
    listen: SocketAddr,

    #[arg(long, env = "MEMC_STUB_PROTOCOL", value_enum, default_value_t = StoreProtocol::Memcache)]
    protocol: StoreProtocol,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("bind {}", args.listen))?;
    let store = Arc::new(StubStore::default());
    tracing::info!(listen = %listener.local_addr()?, protocol = %args.protocol, "stub store listening");

    tokio::select! {
        res = stub_server::serve(listener, store.clone(), args.protocol) => res?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(keys = store.len().await, sets = store.sets(), "shutting down");
        }
    }
    Ok(())
}
