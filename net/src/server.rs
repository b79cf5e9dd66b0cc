//! The node's RPC listener: accept loop and per-connection dispatch.
//!
//! One listener carries both the data plane and the control plane;
//! routing between them is a plain match on the request variant done by
//! the [`RpcHandler`] implementation, which lives with the node wiring.
//! The server owns no protocol state: each connection is a loop of
//! framed request/response exchanges until the peer hangs up or the
//! shutdown token fires.

use {
    crate::{
        error::Result,
        message::{RpcRequest, RpcResponse},
        transport::{self, MAX_FRAME_BYTES},
    },
    async_trait::async_trait,
    log::{debug, info, warn},
    std::{net::SocketAddr, sync::Arc},
    tokio::net::{TcpListener, TcpStream},
    tokio_util::sync::CancellationToken,
};

/// Dispatches one RPC request to whatever serves it.
#[async_trait]
pub trait RpcHandler: Send + Sync + 'static {
    async fn handle(&self, request: RpcRequest) -> RpcResponse;
}

/// Handle to a running RPC listener.
pub struct RpcServer {
    local_addr: SocketAddr,
    cancel: CancellationToken,
}

impl RpcServer {
    /// Bind `addr` and start serving.
    pub async fn start(
        addr: &str,
        handler: Arc<dyn RpcHandler>,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Self::serve(listener, handler, cancel)
    }

    /// Start serving on an already-bound listener.
    ///
    /// Binding separately lets the caller learn its actual port (when
    /// configured with port 0) before anything is advertised to the
    /// cluster.  The accept loop stops when `cancel` fires (a child
    /// token is used so the server can also be stopped on its own);
    /// connections that are mid-request finish their current exchange.
    pub fn serve(
        listener: TcpListener,
        handler: Arc<dyn RpcHandler>,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let local_addr = listener.local_addr()?;
        info!("rpc server listening on {local_addr}");

        let cancel = cancel.child_token();
        let accept_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = accept_cancel.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            debug!("accepted rpc connection from {peer}");
                            let handler = handler.clone();
                            let conn_cancel = accept_cancel.clone();
                            tokio::spawn(async move {
                                serve_connection(stream, peer, handler, conn_cancel).await;
                            });
                        }
                        Err(err) => warn!("rpc accept error: {err}"),
                    },
                }
            }
            debug!("rpc accept loop stopped");
        });

        Ok(Self { local_addr, cancel })
    }

    /// The address the listener actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting new connections and wind down idle ones.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

/// Serve framed exchanges on one connection until EOF, error, or
/// shutdown.
async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<dyn RpcHandler>,
    cancel: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            read = transport::read_frame::<RpcRequest, _>(&mut stream, MAX_FRAME_BYTES) => {
                match read {
                    Ok(Some(request)) => request,
                    Ok(None) => break,
                    Err(err) => {
                        warn!("bad frame from {peer}: {err}");
                        break;
                    }
                }
            }
        };

        debug!("{} from {peer}", request.kind());
        let response = handler.handle(request).await;
        if let Err(err) = transport::write_frame(&mut stream, &response, MAX_FRAME_BYTES).await {
            warn!("failed to answer {peer}: {err}");
            break;
        }
    }
    debug!("connection from {peer} closed");
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{message::Packet, pool::RpcClient},
        std::time::Duration,
    };

    struct EchoHandler;

    #[async_trait]
    impl RpcHandler for EchoHandler {
        async fn handle(&self, request: RpcRequest) -> RpcResponse {
            match request {
                RpcRequest::Ping { msg } => RpcResponse::Pong {
                    msg: format!("pong: {msg}"),
                },
                RpcRequest::ForwardPacket(packet) => RpcResponse::Forward {
                    success: true,
                    message: packet.packet_id,
                },
                _ => RpcResponse::Forward {
                    success: false,
                    message: "unsupported in test".into(),
                },
            }
        }
    }

    #[tokio::test]
    async fn test_request_response_cycle() {
        let cancel = CancellationToken::new();
        let server = RpcServer::start("127.0.0.1:0", Arc::new(EchoHandler), &cancel)
            .await
            .unwrap();

        let mut client = RpcClient::connect(&server.local_addr().to_string())
            .await
            .unwrap();
        let pong = client
            .call(&RpcRequest::Ping { msg: "x".into() }, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(pong, RpcResponse::Pong { msg: "pong: x".into() });

        // Several exchanges on the same connection.
        let fwd = client
            .call(
                &RpcRequest::ForwardPacket(Packet {
                    packet_id: "pkt-1".into(),
                    ..Default::default()
                }),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(
            fwd,
            RpcResponse::Forward {
                success: true,
                message: "pkt-1".into()
            }
        );
    }

    #[tokio::test]
    async fn test_stop_refuses_new_connections() {
        let cancel = CancellationToken::new();
        let server = RpcServer::start("127.0.0.1:0", Arc::new(EchoHandler), &cancel)
            .await
            .unwrap();
        let addr = server.local_addr().to_string();
        server.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Either the dial fails outright or the first exchange dies;
        // what must not happen is a successful round trip.
        let outcome = async {
            let mut client = RpcClient::connect(&addr).await?;
            client
                .call(&RpcRequest::Ping { msg: "x".into() }, Duration::from_millis(300))
                .await
        }
        .await;
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn test_process_token_stops_server() {
        let cancel = CancellationToken::new();
        let server = RpcServer::start("127.0.0.1:0", Arc::new(EchoHandler), &cancel)
            .await
            .unwrap();
        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let outcome = RpcClient::connect(&server.local_addr().to_string()).await;
        // The listener socket is gone once the accept loop returns.
        assert!(
            outcome.is_err()
                || outcome
                    .unwrap()
                    .call(&RpcRequest::Ping { msg: "x".into() }, Duration::from_millis(300))
                    .await
                    .is_err()
        );
    }
}
