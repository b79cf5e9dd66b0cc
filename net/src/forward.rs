//! Hop-by-hop packet forwarding.
//!
//! The forward manager is the data plane of a node: it mints packets on
//! `send`, terminates them on `handle_incoming` when the node is the
//! destination, and otherwise looks up the next hop and relays over a
//! pooled connection.  Every failure on this path is accounted as a
//! dropped packet and returned to the caller; nothing here retries.

use {
    crate::{
        error::{NetError, Result},
        message::{Packet, RpcRequest, RpcResponse},
        pool::ClientPool,
    },
    log::{debug, info, warn},
    spanmesh_topology::{RouteManager, Topology},
    std::{
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc, RwLock,
        },
        time::{Duration, SystemTime, UNIX_EPOCH},
    },
};

/// Deadline applied when the caller does not supply one.
pub const DEFAULT_SEND_DEADLINE: Duration = Duration::from_secs(5);

/// Callback invoked for every packet delivered at this node.
pub type DeliveryCallback = Box<dyn Fn(&Packet) + Send + Sync>;

/// Atomic forwarding counters.
#[derive(Default)]
struct ForwardStats {
    sent: AtomicU64,
    received: AtomicU64,
    forwarded: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time view of the forwarding counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ForwardStatsSnapshot {
    pub sent: u64,
    pub received: u64,
    pub forwarded: u64,
    pub delivered: u64,
    pub dropped: u64,
}

/// The per-node packet forwarder.
pub struct ForwardManager {
    node_id: String,
    topology: Arc<Topology>,
    routes: Arc<RouteManager>,
    pool: ClientPool,
    stats: ForwardStats,
    on_delivery: RwLock<Option<DeliveryCallback>>,
}

impl ForwardManager {
    pub fn new(
        node_id: impl Into<String>,
        topology: Arc<Topology>,
        routes: Arc<RouteManager>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            topology,
            routes,
            pool: ClientPool::new(),
            stats: ForwardStats::default(),
            on_delivery: RwLock::new(None),
        }
    }

    /// Install the callback invoked when a packet terminates here.
    pub fn set_delivery_callback(&self, callback: DeliveryCallback) {
        let mut slot = self.on_delivery.write().expect("delivery lock poisoned");
        *slot = Some(callback);
    }

    /// Send `payload` to `destination` with the default deadline.
    pub async fn send(&self, destination: &str, payload: Vec<u8>) -> Result<()> {
        self.send_with_deadline(destination, payload, DEFAULT_SEND_DEADLINE)
            .await
    }

    /// Send `payload` to `destination`, completing the first-hop RPC
    /// within `deadline`.
    ///
    /// Success means the first hop accepted the packet; there is no
    /// end-to-end acknowledgement beyond that.
    pub async fn send_with_deadline(
        &self,
        destination: &str,
        payload: Vec<u8>,
        deadline: Duration,
    ) -> Result<()> {
        let packet = Packet {
            source: self.node_id.clone(),
            destination: destination.to_string(),
            packet_id: mint_packet_id(&self.node_id),
            payload,
            next_hop: String::new(),
            visited_nodes: vec![self.node_id.clone()],
        };
        info!(
            "[{}] sending packet {} to {destination}",
            self.node_id, packet.packet_id
        );
        self.stats.sent.fetch_add(1, Ordering::Relaxed);
        self.forward_packet(packet, deadline).await
    }

    /// Accept a packet from a peer: terminate it here or relay it.
    ///
    /// Returns the outcome message reported back to the sending peer.
    pub async fn handle_incoming(&self, mut packet: Packet) -> Result<&'static str> {
        debug!(
            "[{}] received packet {} ({} -> {})",
            self.node_id, packet.packet_id, packet.source, packet.destination
        );
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        packet.visited_nodes.push(self.node_id.clone());

        if packet.destination == self.node_id {
            info!(
                "[{}] packet {} delivered, path {:?}",
                self.node_id, packet.packet_id, packet.visited_nodes
            );
            self.stats.delivered.fetch_add(1, Ordering::Relaxed);
            let slot = self.on_delivery.read().expect("delivery lock poisoned");
            if let Some(callback) = slot.as_ref() {
                callback(&packet);
            }
            return Ok("packet delivered");
        }

        self.forward_packet(packet, DEFAULT_SEND_DEADLINE).await?;
        Ok("packet forwarded")
    }

    /// Route lookup, next-hop resolution, and the relay RPC.
    async fn forward_packet(&self, mut packet: Packet, deadline: Duration) -> Result<()> {
        let route = match self.routes.get_route(&packet.destination) {
            Some(route) => route,
            None => {
                warn!("[{}] no route to {}", self.node_id, packet.destination);
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                return Err(NetError::NoRoute(packet.destination));
            }
        };
        packet.next_hop = route.next_hop.clone();

        let next_hop = match self.topology.get_node(&route.next_hop) {
            Some(node) => node,
            None => {
                warn!("[{}] next hop {} unknown", self.node_id, route.next_hop);
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                return Err(NetError::NextHopUnknown(route.next_hop));
            }
        };

        let packet_id = packet.packet_id.clone();
        let response = self
            .pool
            .call(
                &next_hop.id,
                &next_hop.rpc_target(),
                &RpcRequest::ForwardPacket(packet),
                deadline,
            )
            .await;

        match response {
            Ok(RpcResponse::Forward { success: true, .. }) => {
                debug!(
                    "[{}] packet {packet_id} forwarded to {}",
                    self.node_id, next_hop.id
                );
                self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Ok(RpcResponse::Forward {
                success: false,
                message,
            }) => {
                warn!("[{}] peer {} rejected {packet_id}: {message}", self.node_id, next_hop.id);
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                Err(NetError::PeerRejected {
                    peer: next_hop.id,
                    message,
                })
            }
            Ok(other) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                Err(NetError::UnexpectedResponse {
                    expected: "forward",
                    got: other.kind(),
                })
            }
            Err(err) => {
                warn!(
                    "[{}] failed to forward {packet_id} to {}: {err}",
                    self.node_id, next_hop.id
                );
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
        }
    }

    /// Snapshot of the forwarding counters.
    pub fn stats(&self) -> ForwardStatsSnapshot {
        ForwardStatsSnapshot {
            sent: self.stats.sent.load(Ordering::Relaxed),
            received: self.stats.received.load(Ordering::Relaxed),
            forwarded: self.stats.forwarded.load(Ordering::Relaxed),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
        }
    }

    /// Close every pooled connection.  The manager stays usable; later
    /// sends redial on demand.
    pub fn shutdown(&self) {
        self.pool.shutdown();
        info!("[{}] forward manager closed", self.node_id);
    }
}

/// `pkt-{source}-{unix nanos}`; unique enough within one cluster.
fn mint_packet_id(source: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("pkt-{source}-{nanos}")
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::server::{RpcHandler, RpcServer},
        async_trait::async_trait,
        spanmesh_topology::NodeInfo,
        std::sync::Mutex,
        tokio_util::sync::CancellationToken,
    };

    /// Data-plane-only handler delegating to a forward manager, the way
    /// the node wiring does.
    struct DataPlane(Arc<ForwardManager>);

    #[async_trait]
    impl RpcHandler for DataPlane {
        async fn handle(&self, request: RpcRequest) -> RpcResponse {
            match request {
                RpcRequest::ForwardPacket(packet) => match self.0.handle_incoming(packet).await {
                    Ok(message) => RpcResponse::Forward {
                        success: true,
                        message: message.to_string(),
                    },
                    Err(err) => RpcResponse::Forward {
                        success: false,
                        message: err.to_string(),
                    },
                },
                _ => RpcResponse::Forward {
                    success: false,
                    message: "not a data-plane request".into(),
                },
            }
        }
    }

    /// A node fixture: topology + routes + forward manager + server.
    struct TestNode {
        forward: Arc<ForwardManager>,
        topology: Arc<Topology>,
        routes: Arc<RouteManager>,
        addr: String,
        _server: RpcServer,
    }

    async fn spawn_node(id: &str) -> TestNode {
        let topology = Arc::new(Topology::new());
        let routes = Arc::new(RouteManager::new(id, topology.clone()));
        let forward = Arc::new(ForwardManager::new(id, topology.clone(), routes.clone()));
        let server = RpcServer::start(
            "127.0.0.1:0",
            Arc::new(DataPlane(forward.clone())),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        let addr = server.local_addr().to_string();
        TestNode {
            forward,
            topology,
            routes,
            addr,
            _server: server,
        }
    }

    fn register(node: &TestNode, peer_id: &str, peer_addr: &str) {
        node.topology.add_node(NodeInfo {
            id: peer_id.to_string(),
            rpc_addr: peer_addr.to_string(),
            ..Default::default()
        });
    }

    #[tokio::test]
    async fn test_send_without_route_drops() {
        let a = spawn_node("A").await;
        let err = a.forward.send("Z", b"hi".to_vec()).await.unwrap_err();
        assert!(matches!(err, NetError::NoRoute(ref d) if d == "Z"));
        let stats = a.forward.stats();
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.dropped, 1);
    }

    #[tokio::test]
    async fn test_next_hop_without_node_record_drops() {
        let a = spawn_node("A").await;
        // Compute a route to B, then lose B's node record without a
        // recomputation: the stale route must fail as next-hop-unknown.
        register(&a, "B", "127.0.0.1:9");
        a.topology.update_link("A", "B", 1.0);
        a.routes.recompute();
        a.topology.remove_node("B");
        let err = a.forward.send("B", b"hi".to_vec()).await.unwrap_err();
        assert!(matches!(err, NetError::NextHopUnknown(ref h) if h == "B"));
        assert_eq!(a.forward.stats().dropped, 1);
    }

    #[tokio::test]
    async fn test_one_hop_delivery() {
        let a = spawn_node("A").await;
        let b = spawn_node("B").await;

        let delivered: Arc<Mutex<Vec<Packet>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = delivered.clone();
        b.forward.set_delivery_callback(Box::new(move |packet| {
            sink.lock().unwrap().push(packet.clone());
        }));

        register(&a, "B", &b.addr);
        a.topology.update_link("A", "B", 1.0);
        a.routes.recompute();

        a.forward.send("B", b"hi".to_vec()).await.unwrap();

        let seen = delivered.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let packet = &seen[0];
        assert_eq!(packet.payload, b"hi");
        assert_eq!(packet.visited_nodes, vec!["A", "B"]);
        assert_eq!(packet.source, "A");
        assert!(packet.packet_id.starts_with("pkt-A-"));
        drop(seen);

        assert_eq!(a.forward.stats().forwarded, 1);
        let b_stats = b.forward.stats();
        assert_eq!(b_stats.received, 1);
        assert_eq!(b_stats.delivered, 1);
    }

    #[tokio::test]
    async fn test_peer_rejection_is_surfaced_and_counted() {
        let a = spawn_node("A").await;
        let b = spawn_node("B").await;

        // B has no route to C, so relaying through B must fail with
        // B's own message preserved.
        register(&a, "B", &b.addr);
        register(&a, "C", "127.0.0.1:9");
        a.topology.update_link("A", "B", 1.0);
        a.topology.update_link("B", "C", 1.0);
        a.routes.recompute();

        let err = a.forward.send("C", b"hi".to_vec()).await.unwrap_err();
        match err {
            NetError::PeerRejected { peer, message } => {
                assert_eq!(peer, "B");
                assert!(message.contains("no route to C"), "got: {message}");
            }
            other => panic!("expected PeerRejected, got {other:?}"),
        }
        assert_eq!(a.forward.stats().dropped, 1);
        assert_eq!(b.forward.stats().dropped, 1);
    }

    #[tokio::test]
    async fn test_unreachable_next_hop_is_transport_error() {
        let a = spawn_node("A").await;
        register(&a, "B", "127.0.0.1:1");
        a.topology.update_link("A", "B", 1.0);
        a.routes.recompute();
        let err = a.forward.send("B", b"hi".to_vec()).await.unwrap_err();
        assert!(matches!(err, NetError::Transport { .. }));
        assert_eq!(a.forward.stats().dropped, 1);
    }

    #[tokio::test]
    async fn test_shutdown_then_reuse() {
        let a = spawn_node("A").await;
        let b = spawn_node("B").await;
        register(&a, "B", &b.addr);
        a.topology.update_link("A", "B", 1.0);
        a.routes.recompute();

        a.forward.send("B", b"one".to_vec()).await.unwrap();
        a.forward.shutdown();
        // Pool is empty but the manager redials on demand.
        a.forward.send("B", b"two".to_vec()).await.unwrap();
        assert_eq!(b.forward.stats().delivered, 2);
    }
}
