//! In-memory key-value server speaking either store protocol.
//!
//! Backs the `memc-stub` binary and the integration tests. It is not a cache:
//! nothing expires, nothing is evicted, and flags/exptime are ignored.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use redis_protocol::codec::Resp2;
use redis_protocol::resp2::types::{BytesFrame, Resp2Frame};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use crate::config::StoreProtocol;
use crate::memcache::{MemcacheReply, MemcacheRequest, MemcacheServerCodec, ServerFrame};

/// Shared state of one stub server.
#[derive(Debug, Default)]
pub struct StubStore {
    data: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
    sets: AtomicU64,
    fail_writes: AtomicBool,
}

impl StubStore {
    pub async fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    /// Number of keys accepted so far, duplicates included.
    pub fn sets(&self) -> u64 {
        self.sets.load(Ordering::Relaxed)
    }

    /// Make every subsequent write fail with a server error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    fn failing(&self) -> bool {
        self.fail_writes.load(Ordering::Relaxed)
    }

    async fn put_all(&self, pairs: Vec<(Vec<u8>, Vec<u8>)>) {
        let count = pairs.len() as u64;
        let mut data = self.data.write().await;
        data.extend(pairs);
        self.sets.fetch_add(count, Ordering::Relaxed);
    }
}

/// A running stub server. The accept loop is aborted on drop.
pub struct StubServer {
    addr: SocketAddr,
    store: Arc<StubStore>,
    task: JoinHandle<()>,
}

impl StubServer {
    /// Bind `addr` (port 0 picks a free port) and start serving in the background.
    pub async fn start(addr: SocketAddr, protocol: StoreProtocol) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let store = Arc::new(StubStore::default());
        let serve_store = store.clone();
        let task = tokio::spawn(async move {
            if let Err(err) = serve(listener, serve_store, protocol).await {
                tracing::warn!(error = ?err, "stub server stopped");
            }
        });
        Ok(Self { addr, store, task })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn store(&self) -> &Arc<StubStore> {
        &self.store
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Accept connections forever.
pub async fn serve(
    listener: TcpListener,
    store: Arc<StubStore>,
    protocol: StoreProtocol,
) -> anyhow::Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        socket.set_nodelay(true).ok();
        let store = store.clone();
        tokio::spawn(async move {
            let result = match protocol {
                StoreProtocol::Memcache => handle_memcache(socket, store).await,
                StoreProtocol::Resp => handle_resp(socket, store).await,
            };
            if let Err(err) = result {
                tracing::debug!(%peer, error = ?err, "stub connection closed");
            }
        });
    }
}

async fn handle_memcache(socket: TcpStream, store: Arc<StubStore>) -> anyhow::Result<()> {
    let mut framed = Framed::new(socket, MemcacheServerCodec);
    while let Some(frame) = framed.next().await {
        match frame? {
            ServerFrame::Request(MemcacheRequest::Set { key, value, .. }) => {
                if store.failing() {
                    framed.feed(MemcacheReply::ServerError("out of memory".into())).await?;
                } else {
                    store.put_all(vec![(key.into_bytes(), value.to_vec())]).await;
                    framed.feed(MemcacheReply::Stored).await?;
                }
            }
            ServerFrame::Request(MemcacheRequest::Get { keys }) => {
                for key in keys {
                    if let Some(data) = store.get(key.as_bytes()).await {
                        framed
                            .feed(MemcacheReply::Value {
                                key,
                                flags: 0,
                                data: Bytes::from(data),
                            })
                            .await?;
                    }
                }
                framed.feed(MemcacheReply::End).await?;
            }
            ServerFrame::Malformed(msg) => {
                framed.feed(MemcacheReply::ClientError(msg)).await?;
            }
        }
        // Replies to a pipelined window are flushed together.
        if framed.read_buffer().is_empty() {
            <Framed<TcpStream, MemcacheServerCodec> as SinkExt<MemcacheReply>>::flush(&mut framed)
                .await?;
        }
    }
    <Framed<TcpStream, MemcacheServerCodec> as SinkExt<MemcacheReply>>::flush(&mut framed).await?;
    Ok(())
}

enum RespOp {
    Ping,
    Get { key: Vec<u8> },
    Set { pairs: Vec<(Vec<u8>, Vec<u8>)> },
}

async fn handle_resp(socket: TcpStream, store: Arc<StubStore>) -> anyhow::Result<()> {
    let mut framed = Framed::new(socket, Resp2::default());
    while let Some(frame) = framed.next().await {
        let resp = match parse_command(frame?) {
            Ok(RespOp::Ping) => BytesFrame::SimpleString(Bytes::from_static(b"PONG")),
            Ok(RespOp::Get { key }) => match store.get(&key).await {
                Some(value) => BytesFrame::BulkString(Bytes::from(value)),
                None => BytesFrame::Null,
            },
            Ok(RespOp::Set { .. }) if store.failing() => {
                BytesFrame::Error("ERR write refused".to_string().into())
            }
            Ok(RespOp::Set { pairs }) => {
                store.put_all(pairs).await;
                BytesFrame::SimpleString(Bytes::from_static(b"OK"))
            }
            Err(err) => BytesFrame::Error(format!("ERR {err}").into()),
        };
        framed.send(resp).await?;
    }
    Ok(())
}

fn parse_command(frame: BytesFrame) -> anyhow::Result<RespOp> {
    let BytesFrame::Array(parts) = frame else {
        anyhow::bail!("expected array frame");
    };
    let cmd = parts
        .first()
        .and_then(|f| f.as_str())
        .map(|s| s.to_ascii_uppercase())
        .ok_or_else(|| anyhow::anyhow!("invalid command"))?;

    match cmd.as_str() {
        "PING" => Ok(RespOp::Ping),
        "GET" => {
            anyhow::ensure!(parts.len() == 2, "GET expects 1 argument");
            let key = frame_bytes(&parts[1]).ok_or_else(|| anyhow::anyhow!("invalid key"))?;
            Ok(RespOp::Get { key })
        }
        "SET" | "MSET" => {
            let args = &parts[1..];
            anyhow::ensure!(
                !args.is_empty() && args.len() % 2 == 0,
                "{cmd} expects key value pairs"
            );
            anyhow::ensure!(cmd == "MSET" || args.len() == 2, "SET expects 2 arguments");
            let mut pairs = Vec::with_capacity(args.len() / 2);
            for pair in args.chunks(2) {
                let key = frame_bytes(&pair[0]).ok_or_else(|| anyhow::anyhow!("invalid key"))?;
                let value =
                    frame_bytes(&pair[1]).ok_or_else(|| anyhow::anyhow!("invalid value"))?;
                pairs.push((key, value));
            }
            Ok(RespOp::Set { pairs })
        }
        other => anyhow::bail!("unknown command {other}"),
    }
}

fn frame_bytes(frame: &BytesFrame) -> Option<Vec<u8>> {
    match frame {
        BytesFrame::BulkString(b) | BytesFrame::SimpleString(b) => Some(b.to_vec()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(s: &str) -> BytesFrame {
        BytesFrame::BulkString(Bytes::from(s.as_bytes().to_vec()))
    }

    #[test]
    fn parses_mset_pairs() {
        let frame = BytesFrame::Array(vec![bulk("mset"), bulk("a"), bulk("1"), bulk("b"), bulk("2")]);
        let Ok(RespOp::Set { pairs }) = parse_command(frame) else {
            panic!("expected set");
        };
        assert_eq!(
            pairs,
            vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"b".to_vec(), b"2".to_vec())
            ]
        );
    }

    #[test]
    fn rejects_odd_mset_and_unknown_commands() {
        assert!(parse_command(BytesFrame::Array(vec![bulk("MSET"), bulk("a")])).is_err());
        assert!(parse_command(BytesFrame::Array(vec![bulk("SET"), bulk("a"), bulk("1"), bulk("b"), bulk("2")])).is_err());
        assert!(parse_command(BytesFrame::Array(vec![bulk("FLUSHALL")])).is_err());
        assert!(parse_command(bulk("GET")).is_err());
    }

    #[tokio::test]
    async fn store_counts_sets_including_overwrites() {
        let store = StubStore::default();
        store
            .put_all(vec![(b"k".to_vec(), b"1".to_vec()), (b"k".to_vec(), b"2".to_vec())])
            .await;
        assert_eq!(store.sets(), 2);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.get(b"k").await, Some(b"2".to_vec()));
    }
}
