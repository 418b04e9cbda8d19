//! Bulk writes of one endpoint's batch to the key-value store.
//!
//! A `StoreWriter` never propagates a failure: every write ends in a
//! `WriteOutcome`, and errors are logged here with the endpoint and batch size
//! before the worker counts them. There is no retry at this layer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use redis_protocol::codec::Resp2;
use redis_protocol::resp2::types::BytesFrame;
use tokio::net::TcpStream;
use tokio::time;
use tokio_util::codec::Framed;
use tracing::{debug, error, trace};

use crate::batch::Entries;
use crate::config::{LoaderConfig, StoreProtocol};
use crate::error::StoreError;
use crate::memcache::{self, MemcacheClientCodec, MemcacheReply, MemcacheRequest};

/// Number of pipelined `set` commands sent before their replies are drained.
const MEMCACHE_PIPELINE_WINDOW: usize = 1024;

/// Client for one store wire protocol.
///
/// Implementations open their own connection per call; nothing is pooled.
#[async_trait]
pub trait StoreClient: Send + Sync + 'static {
    /// Store every entry at `endpoint`, succeeding only if all were accepted.
    async fn set_multi(&self, endpoint: &str, entries: &Entries) -> Result<(), StoreError>;
}

/// Result of one endpoint write.
#[derive(Debug)]
pub enum WriteOutcome {
    Written { entries: usize },
    DryRun { entries: usize },
    Failed(StoreError),
}

impl WriteOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }

    /// Entries accepted (or skipped in dry-run mode); zero on failure.
    pub fn entries(&self) -> usize {
        match self {
            Self::Written { entries } | Self::DryRun { entries } => *entries,
            Self::Failed(_) => 0,
        }
    }
}

/// Dispatches endpoint batches to a `StoreClient`, or only logs them in dry-run mode.
#[derive(Clone)]
pub struct StoreWriter {
    client: Arc<dyn StoreClient>,
    dry_run: bool,
}

impl StoreWriter {
    pub fn new(client: Arc<dyn StoreClient>, dry_run: bool) -> Self {
        Self { client, dry_run }
    }

    /// Build the writer for the configured protocol and timeouts.
    pub fn from_config(config: &LoaderConfig) -> Self {
        let client: Arc<dyn StoreClient> = match config.protocol {
            StoreProtocol::Memcache => Arc::new(MemcacheClient::new(
                config.connect_timeout,
                config.write_timeout,
            )),
            StoreProtocol::Resp => Arc::new(RespClient::new(
                config.connect_timeout,
                config.write_timeout,
            )),
        };
        Self::new(client, config.dry_run)
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub async fn write(&self, endpoint: &str, entries: &Entries) -> WriteOutcome {
        if self.dry_run {
            debug!(endpoint, entries = entries.len(), "dry run: skipping bulk write");
            for (key, payload) in entries {
                trace!(endpoint, key = %key, payload_len = payload.len(), "dry run entry");
            }
            return WriteOutcome::DryRun {
                entries: entries.len(),
            };
        }

        match self.client.set_multi(endpoint, entries).await {
            Ok(()) => {
                debug!(endpoint, entries = entries.len(), "bulk write done");
                WriteOutcome::Written {
                    entries: entries.len(),
                }
            }
            Err(err) => {
                error!(endpoint, entries = entries.len(), error = %err, "cannot write to store");
                WriteOutcome::Failed(err)
            }
        }
    }
}

/// Memcached text-protocol client: pipelined `set` per entry.
#[derive(Clone, Debug)]
pub struct MemcacheClient {
    connect_timeout: Duration,
    write_timeout: Duration,
}

impl MemcacheClient {
    pub fn new(connect_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            write_timeout,
        }
    }
}

#[async_trait]
impl StoreClient for MemcacheClient {
    async fn set_multi(&self, endpoint: &str, entries: &Entries) -> Result<(), StoreError> {
        if let Some(key) = entries.keys().find(|key| !memcache::is_valid_key(key)) {
            return Err(StoreError::InvalidKey {
                key: key.clone(),
                protocol: "memcache",
            });
        }
        if entries.is_empty() {
            return Ok(());
        }

        let socket = connect(endpoint, self.connect_timeout).await?;
        let mut conn = Framed::new(socket, MemcacheClientCodec);

        let items: Vec<(&String, &Vec<u8>)> = entries.iter().collect();
        let exchange = async {
            for window in items.chunks(MEMCACHE_PIPELINE_WINDOW) {
                for (key, payload) in window {
                    conn.feed(MemcacheRequest::Set {
                        key: (*key).clone(),
                        flags: 0,
                        exptime: 0,
                        value: Bytes::copy_from_slice(payload),
                    })
                    .await
                    .map_err(|source| io_error(endpoint, source))?;
                }
                <Framed<TcpStream, MemcacheClientCodec> as SinkExt<MemcacheRequest>>::flush(
                    &mut conn,
                )
                .await
                .map_err(|source| io_error(endpoint, source))?;

                for (key, _) in window {
                    match conn.next().await {
                        Some(Ok(MemcacheReply::Stored)) => {}
                        Some(Ok(other)) => {
                            return Err(StoreError::Rejected {
                                endpoint: endpoint.to_string(),
                                detail: format!("set {key}: {other:?}"),
                            })
                        }
                        Some(Err(source)) => return Err(io_error(endpoint, source)),
                        None => {
                            return Err(StoreError::Protocol {
                                endpoint: endpoint.to_string(),
                                detail: "connection closed".to_string(),
                            })
                        }
                    }
                }
            }
            Ok::<(), StoreError>(())
        };

        time::timeout(self.write_timeout, exchange)
            .await
            .map_err(|_| StoreError::Timeout {
                endpoint: endpoint.to_string(),
                op: "set_multi",
                timeout: self.write_timeout,
            })?
    }
}

/// Redis-protocol client: one `MSET` per batch.
#[derive(Clone, Debug)]
pub struct RespClient {
    connect_timeout: Duration,
    write_timeout: Duration,
}

impl RespClient {
    pub fn new(connect_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            write_timeout,
        }
    }
}

#[async_trait]
impl StoreClient for RespClient {
    async fn set_multi(&self, endpoint: &str, entries: &Entries) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }

        let socket = connect(endpoint, self.connect_timeout).await?;
        let mut conn = Framed::new(socket, Resp2::default());
        let req = make_mset(entries);

        let send_result = time::timeout(self.write_timeout, conn.send(req)).await;
        match send_result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                return Err(StoreError::Protocol {
                    endpoint: endpoint.to_string(),
                    detail: format!("send failed: {err}"),
                })
            }
            Err(_) => {
                return Err(StoreError::Timeout {
                    endpoint: endpoint.to_string(),
                    op: "send",
                    timeout: self.write_timeout,
                })
            }
        }

        let recv = time::timeout(self.write_timeout, conn.next()).await;
        let resp = match recv {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(err))) => {
                return Err(StoreError::Protocol {
                    endpoint: endpoint.to_string(),
                    detail: format!("recv failed: {err}"),
                })
            }
            Ok(None) => {
                return Err(StoreError::Protocol {
                    endpoint: endpoint.to_string(),
                    detail: "connection closed".to_string(),
                })
            }
            Err(_) => {
                return Err(StoreError::Timeout {
                    endpoint: endpoint.to_string(),
                    op: "recv",
                    timeout: self.write_timeout,
                })
            }
        };
        parse_mset_response(endpoint, resp)
    }
}

async fn connect(endpoint: &str, timeout: Duration) -> Result<TcpStream, StoreError> {
    let socket = match time::timeout(timeout, TcpStream::connect(endpoint)).await {
        Ok(Ok(socket)) => socket,
        Ok(Err(source)) => {
            return Err(StoreError::Connect {
                endpoint: endpoint.to_string(),
                source,
            })
        }
        Err(_) => {
            return Err(StoreError::Timeout {
                endpoint: endpoint.to_string(),
                op: "connect",
                timeout,
            })
        }
    };
    socket.set_nodelay(true).ok();
    Ok(socket)
}

fn io_error(endpoint: &str, source: std::io::Error) -> StoreError {
    StoreError::Io {
        endpoint: endpoint.to_string(),
        source,
    }
}

/// Build a RESP `MSET k1 v1 k2 v2 ...` request frame.
fn make_mset(entries: &Entries) -> BytesFrame {
    let mut parts = Vec::with_capacity(1 + entries.len() * 2);
    parts.push(BytesFrame::BulkString(Bytes::from_static(b"MSET")));
    for (key, payload) in entries {
        parts.push(BytesFrame::BulkString(Bytes::from(key.as_bytes().to_vec())));
        parts.push(BytesFrame::BulkString(Bytes::copy_from_slice(payload)));
    }
    BytesFrame::Array(parts)
}

/// Interpret a RESP `MSET` response.
fn parse_mset_response(endpoint: &str, resp: BytesFrame) -> Result<(), StoreError> {
    match resp {
        BytesFrame::SimpleString(s) if s.as_ref() == b"OK" => Ok(()),
        BytesFrame::Error(err) => Err(StoreError::Rejected {
            endpoint: endpoint.to_string(),
            detail: err.to_string(),
        }),
        other => Err(StoreError::Protocol {
            endpoint: endpoint.to_string(),
            detail: format!("unexpected MSET response: {other:?}"),
        }),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Counts calls and fails every write.
    struct FailingClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StoreClient for FailingClient {
        async fn set_multi(&self, endpoint: &str, _entries: &Entries) -> Result<(), StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Rejected {
                endpoint: endpoint.to_string(),
                detail: "nope".to_string(),
            })
        }
    }

    fn entries() -> Entries {
        HashMap::from([("idfa:a".to_string(), vec![1u8, 2, 3])])
    }

    /// Accepts connections and never reads or answers.
    pub(crate) async fn silent_listener() -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        addr
    }

    #[tokio::test]
    async fn dry_run_never_touches_the_client() {
        let client = Arc::new(FailingClient {
            calls: AtomicUsize::new(0),
        });
        let writer = StoreWriter::new(client.clone(), true);
        let outcome = writer.write("127.0.0.1:1", &entries()).await;
        assert!(matches!(outcome, WriteOutcome::DryRun { entries: 1 }));
        assert!(outcome.is_success());
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn client_errors_become_failed_outcomes() {
        let client = Arc::new(FailingClient {
            calls: AtomicUsize::new(0),
        });
        let writer = StoreWriter::new(client.clone(), false);
        let outcome = writer.write("127.0.0.1:1", &entries()).await;
        assert!(!outcome.is_success());
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn memcache_rejects_invalid_keys_before_connecting() {
        let client = MemcacheClient::new(Duration::from_millis(50), Duration::from_millis(50));
        let entries = HashMap::from([("idfa:has space".to_string(), vec![1u8])]);
        // Port 9 is never dialed: key validation fails first.
        let err = client
            .set_multi("127.0.0.1:9", &entries)
            .await
            .expect_err("invalid key");
        assert!(matches!(err, StoreError::InvalidKey { .. }));
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_without_panicking() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let client = RespClient::new(Duration::from_millis(500), Duration::from_millis(500));
        let err = client
            .set_multi(&addr.to_string(), &entries())
            .await
            .expect_err("closed port");
        assert!(matches!(
            err,
            StoreError::Connect { .. } | StoreError::Timeout { .. }
        ));
    }

    #[tokio::test]
    async fn memcache_times_out_on_a_silent_store() {
        let addr = silent_listener().await;
        let client = MemcacheClient::new(Duration::from_secs(1), Duration::from_millis(100));
        let err = client
            .set_multi(&addr.to_string(), &entries())
            .await
            .expect_err("no reply");
        assert!(matches!(err, StoreError::Timeout { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn resp_times_out_on_a_silent_store() {
        let addr = silent_listener().await;
        let client = RespClient::new(Duration::from_secs(1), Duration::from_millis(100));
        let err = client
            .set_multi(&addr.to_string(), &entries())
            .await
            .expect_err("no reply");
        assert!(matches!(err, StoreError::Timeout { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn silent_store_is_a_failed_outcome() {
        let addr = silent_listener().await;
        let client = Arc::new(RespClient::new(
            Duration::from_secs(1),
            Duration::from_millis(100),
        ));
        let outcome = StoreWriter::new(client, false)
            .write(&addr.to_string(), &entries())
            .await;
        assert!(!outcome.is_success());
        assert_eq!(outcome.entries(), 0);
    }

    #[test]
    fn mset_frame_layout() {
        let frame = make_mset(&entries());
        let BytesFrame::Array(parts) = frame else {
            panic!("expected array frame");
        };
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], BytesFrame::BulkString(Bytes::from_static(b"MSET")));
    }

    #[test]
    fn mset_error_reply_is_rejected() {
        let err = parse_mset_response("e", BytesFrame::Error("ERR oom".to_string().into()))
            .expect_err("error reply");
        assert!(matches!(err, StoreError::Rejected { .. }));
        assert!(parse_mset_response(
            "e",
            BytesFrame::SimpleString(Bytes::from_static(b"OK"))
        )
        .is_ok());
    }
}
