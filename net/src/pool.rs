//! Outbound RPC clients and the per-peer connection pool.
//!
//! The pool is the only cross-call shared I/O resource on a node.  The
//! hot path (cache hit on a healthy connection) takes the read lock
//! only; replacing a stale entry takes the write lock, with the usual
//! double-check after the upgrade so two tasks racing to redial the
//! same peer install a single connection.

use {
    crate::{
        error::{NetError, Result},
        message::{RpcRequest, RpcResponse},
        transport::{self, MAX_FRAME_BYTES},
    },
    log::{debug, warn},
    std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc, RwLock,
        },
        time::Duration,
    },
    tokio::{net::TcpStream, sync::Mutex, time},
};

/// How long a dial may take before the peer counts as unreachable.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// One outbound RPC connection.
///
/// A client owns its TCP stream; requests on it are serialized by the
/// pool's per-entry mutex, so there is at most one in-flight exchange
/// per connection.
pub struct RpcClient {
    addr: String,
    stream: TcpStream,
}

impl RpcClient {
    /// Dial `addr` within [`CONNECT_TIMEOUT`].
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| NetError::Transport {
                peer: addr.to_string(),
                detail: format!("connect timed out after {CONNECT_TIMEOUT:?}"),
            })?
            .map_err(|e| NetError::Transport {
                peer: addr.to_string(),
                detail: e.to_string(),
            })?;
        stream.set_nodelay(true).ok();
        Ok(Self {
            addr: addr.to_string(),
            stream,
        })
    }

    /// The address this client dialed.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// One request/response exchange under `deadline`.
    pub async fn call(&mut self, request: &RpcRequest, deadline: Duration) -> Result<RpcResponse> {
        let exchange = async {
            transport::write_frame(&mut self.stream, request, MAX_FRAME_BYTES).await?;
            match transport::read_frame::<RpcResponse, _>(&mut self.stream, MAX_FRAME_BYTES).await?
            {
                Some(response) => Ok(response),
                None => Err(NetError::Transport {
                    peer: self.addr.clone(),
                    detail: "connection closed mid-call".to_string(),
                }),
            }
        };
        match time::timeout(deadline, exchange).await {
            Ok(result) => result,
            Err(_) => Err(NetError::Timeout(deadline)),
        }
    }
}

struct PooledEntry {
    client: Mutex<RpcClient>,
    /// Cleared on the first failed exchange; a cleared entry is
    /// replaced on next acquisition instead of reused.
    healthy: AtomicBool,
}

/// Reusable outbound connections, keyed by peer node id.
#[derive(Default)]
pub struct ClientPool {
    entries: RwLock<HashMap<String, Arc<PooledEntry>>>,
}

impl ClientPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// One request/response exchange with `peer_id` at `addr`, reusing
    /// a pooled connection when a healthy one exists.
    pub async fn call(
        &self,
        peer_id: &str,
        addr: &str,
        request: &RpcRequest,
        deadline: Duration,
    ) -> Result<RpcResponse> {
        let entry = self.acquire(peer_id, addr).await?;
        let mut client = entry.client.lock().await;
        match client.call(request, deadline).await {
            Ok(response) => Ok(response),
            Err(err) => {
                entry.healthy.store(false, Ordering::Relaxed);
                Err(err)
            }
        }
    }

    /// Number of pooled connections (healthy or not).
    pub fn len(&self) -> usize {
        self.entries.read().expect("pool lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every pooled connection.  Later calls redial on demand.
    pub fn shutdown(&self) {
        let mut entries = self.entries.write().expect("pool lock poisoned");
        let count = entries.len();
        entries.clear();
        debug!("connection pool closed ({count} connections)");
    }

    async fn acquire(&self, peer_id: &str, addr: &str) -> Result<Arc<PooledEntry>> {
        {
            let entries = self.entries.read().expect("pool lock poisoned");
            if let Some(entry) = entries.get(peer_id) {
                if entry.healthy.load(Ordering::Relaxed) {
                    return Ok(entry.clone());
                }
            }
        }

        // Dial outside the lock; connecting can take a while.
        let fresh = RpcClient::connect(addr).await?;

        let mut entries = self.entries.write().expect("pool lock poisoned");
        // Double-check: another task may have installed a healthy
        // connection while we were dialing.
        if let Some(existing) = entries.get(peer_id) {
            if existing.healthy.load(Ordering::Relaxed) {
                return Ok(existing.clone());
            }
            warn!("replacing stale connection to {peer_id}");
        }
        let entry = Arc::new(PooledEntry {
            client: Mutex::new(fresh),
            healthy: AtomicBool::new(true),
        });
        entries.insert(peer_id.to_string(), entry.clone());
        debug!("pooled new connection to {peer_id} at {addr}");
        Ok(entry)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::transport::{read_frame, write_frame},
        tokio::net::TcpListener,
    };

    /// Minimal echo server: answers every request with a pong carrying
    /// the given tag.
    async fn pong_server(tag: &'static str) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };
                tokio::spawn(async move {
                    while let Ok(Some(_req)) =
                        read_frame::<RpcRequest, _>(&mut stream, MAX_FRAME_BYTES).await
                    {
                        let resp = RpcResponse::Pong { msg: tag.into() };
                        if write_frame(&mut stream, &resp, MAX_FRAME_BYTES).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_call_and_reuse() {
        let addr = pong_server("one").await;
        let pool = ClientPool::new();
        let req = RpcRequest::Ping { msg: "x".into() };

        let first = pool
            .call("peer", &addr.to_string(), &req, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(first, RpcResponse::Pong { msg: "one".into() });
        assert_eq!(pool.len(), 1);

        // Second call reuses the pooled connection.
        pool.call("peer", &addr.to_string(), &req, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_transport_error() {
        let pool = ClientPool::new();
        let err = pool
            .call(
                "ghost",
                "127.0.0.1:1",
                &RpcRequest::Ping { msg: "x".into() },
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, NetError::Transport { .. }));
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_failed_connection_is_replaced() {
        let addr = pong_server("alive").await;
        let pool = ClientPool::new();
        let req = RpcRequest::Ping { msg: "x".into() };

        pool.call("peer", &addr.to_string(), &req, Duration::from_secs(1))
            .await
            .unwrap();

        // Sabotage the pooled entry; the next call must redial rather
        // than reuse it.
        {
            let entries = pool.entries.read().unwrap();
            entries["peer"].healthy.store(false, Ordering::Relaxed);
        }
        let again = pool
            .call("peer", &addr.to_string(), &req, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(again, RpcResponse::Pong { msg: "alive".into() });
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_empties_pool() {
        let addr = pong_server("bye").await;
        let pool = ClientPool::new();
        pool.call(
            "peer",
            &addr.to_string(),
            &RpcRequest::Ping { msg: "x".into() },
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        pool.shutdown();
        assert!(pool.is_empty());
    }
}
