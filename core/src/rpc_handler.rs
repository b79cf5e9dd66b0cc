//! RPC dispatch: routes every inbound request to the subsystem that
//! serves it.
//!
//! Data plane (peer-to-peer): ping, packet forwarding, link probing.
//! Control plane (operator tooling): ping, packet injection, link
//! registration, sync toggling.  Both planes answer on the node's one
//! listener; no request here is fatal, every failure becomes a
//! `success = false` response with the reason in `message`.

use {
    crate::topology_sync::TopologySync,
    async_trait::async_trait,
    log::{info, warn},
    rand::Rng,
    spanmesh_net::{
        ForwardManager, NetError, Packet, RpcClient, RpcHandler, RpcRequest, RpcResponse,
    },
    spanmesh_topology::{NodeInfo, NodeStatus, Topology},
    std::{
        sync::Arc,
        time::{Duration, SystemTime, UNIX_EPOCH},
    },
};

/// Deadline for the one-shot dial made on behalf of a SendPacket
/// request.
const INJECT_DEADLINE: Duration = Duration::from_secs(10);

/// Deadline for a link-quality probe.
const PROBE_DEADLINE: Duration = Duration::from_secs(5);

/// The node's RPC service implementation.
pub struct NodeRpcHandler {
    node_id: String,
    topology: Arc<Topology>,
    forward: Arc<ForwardManager>,
    sync: Arc<TopologySync>,
}

impl NodeRpcHandler {
    pub fn new(
        node_id: impl Into<String>,
        topology: Arc<Topology>,
        forward: Arc<ForwardManager>,
        sync: Arc<TopologySync>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            topology,
            forward,
            sync,
        }
    }

    // ── Data plane ──────────────────────────────────────────────────────

    fn probe_link_quality(&self, self_debug: bool) -> RpcResponse {
        if !self_debug {
            // Real RTT measurement is not implemented; refusing beats
            // inventing a cost the routing layer would trust.
            return RpcResponse::Probe {
                success: false,
                message: "real link-quality probing is not implemented".to_string(),
                rtt_ms: 0,
                cost: 0.0,
            };
        }
        let mut rng = rand::thread_rng();
        let rtt_ms: i64 = rng.gen_range(1..=50);
        let cost: f64 = rng.gen_range(1.0..20.0);
        RpcResponse::Probe {
            success: true,
            message: String::new(),
            rtt_ms,
            cost,
        }
    }

    // ── Control plane ───────────────────────────────────────────────────

    /// Inject a packet via the node at `source_address`, so an external
    /// tool can originate traffic from any reachable node.
    async fn send_packet(&self, source_address: String, mut packet: Packet) -> RpcResponse {
        if source_address.is_empty() {
            return RpcResponse::SendPacket {
                success: false,
                message: "source address cannot be empty".to_string(),
                packet_id: packet.packet_id,
            };
        }
        if packet.destination.is_empty() {
            return RpcResponse::SendPacket {
                success: false,
                message: "packet destination cannot be empty".to_string(),
                packet_id: packet.packet_id,
            };
        }
        if packet.packet_id.is_empty() {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            packet.packet_id = format!("pkt-{nanos}-{}", self.node_id);
        }
        let packet_id = packet.packet_id.clone();
        info!(
            "[{}] injecting packet {packet_id} via {source_address}",
            self.node_id
        );

        let result: Result<RpcResponse, NetError> = async {
            let mut client = RpcClient::connect(&source_address).await?;
            client
                .call(&RpcRequest::ForwardPacket(packet), INJECT_DEADLINE)
                .await
        }
        .await;

        match result {
            Ok(RpcResponse::Forward { success: true, message }) => RpcResponse::SendPacket {
                success: true,
                message: format!("packet sent: {message}"),
                packet_id,
            },
            Ok(RpcResponse::Forward { success: false, message }) => RpcResponse::SendPacket {
                success: false,
                message: format!("packet forwarding failed: {message}"),
                packet_id,
            },
            Ok(other) => RpcResponse::SendPacket {
                success: false,
                message: format!("unexpected response: {}", other.kind()),
                packet_id,
            },
            Err(err) => RpcResponse::SendPacket {
                success: false,
                message: format!("failed to send packet: {err}"),
                packet_id,
            },
        }
    }

    /// Register a link from this node to `neighbor`, probing for a cost
    /// when asked to (or when the supplied cost is unusable).
    pub async fn add_link(
        &self,
        neighbor: String,
        neighbor_address: String,
        cost: f64,
        auto_probe: bool,
    ) -> RpcResponse {
        if neighbor.is_empty() {
            return RpcResponse::AddLink {
                success: false,
                message: "neighbor id cannot be empty".to_string(),
                cost: 0.0,
            };
        }
        if neighbor_address.is_empty() {
            return RpcResponse::AddLink {
                success: false,
                message: "neighbor address cannot be empty".to_string(),
                cost: 0.0,
            };
        }

        self.topology.add_node(NodeInfo {
            id: neighbor.clone(),
            ip: String::new(),
            port: 0,
            rpc_addr: neighbor_address.clone(),
            status: NodeStatus::Unknown,
        });

        let final_cost = if auto_probe || cost <= 0.0 {
            match self.probe_link_cost(&neighbor_address).await {
                Ok(probed) => {
                    info!(
                        "[{}] auto-probed link cost to {neighbor}: {probed:.2}",
                        self.node_id
                    );
                    probed
                }
                Err(err) => {
                    warn!("[{}] probe of {neighbor} failed: {err}", self.node_id);
                    return RpcResponse::AddLink {
                        success: false,
                        message: format!("failed to probe link: {err}"),
                        cost: 0.0,
                    };
                }
            }
        } else {
            cost
        };

        // register_link updates the local edge and notifies; a failed
        // broadcast is logged but the local update stands.
        if let Err(err) = self.sync.register_link(&self.node_id, &neighbor, final_cost).await {
            warn!(
                "[{}] link to {neighbor} registered locally, broadcast failed: {err}",
                self.node_id
            );
        }

        RpcResponse::AddLink {
            success: true,
            message: format!(
                "link added: {} -> {neighbor} (cost: {final_cost:.2})",
                self.node_id
            ),
            cost: final_cost,
        }
    }

    /// Ask `address` for a synthetic link cost.
    async fn probe_link_cost(&self, address: &str) -> Result<f64, NetError> {
        let mut client = RpcClient::connect(address).await?;
        let response = client
            .call(
                &RpcRequest::ProbeLinkQuality {
                    source: self.node_id.clone(),
                    target: String::new(),
                    self_debug: true,
                },
                PROBE_DEADLINE,
            )
            .await?;
        match response {
            RpcResponse::Probe { success: true, cost, .. } => Ok(cost),
            RpcResponse::Probe { success: false, message, .. } => Err(NetError::PeerRejected {
                peer: address.to_string(),
                message,
            }),
            other => Err(NetError::UnexpectedResponse {
                expected: "probe",
                got: other.kind(),
            }),
        }
    }
}

#[async_trait]
impl RpcHandler for NodeRpcHandler {
    async fn handle(&self, request: RpcRequest) -> RpcResponse {
        match request {
            RpcRequest::Ping { .. } => RpcResponse::Pong {
                msg: format!("pong from {}", self.node_id),
            },
            RpcRequest::ForwardPacket(packet) => match self.forward.handle_incoming(packet).await {
                Ok(message) => RpcResponse::Forward {
                    success: true,
                    message: message.to_string(),
                },
                Err(err) => RpcResponse::Forward {
                    success: false,
                    message: err.to_string(),
                },
            },
            RpcRequest::ProbeLinkQuality { self_debug, .. } => self.probe_link_quality(self_debug),
            RpcRequest::ControlPing { .. } => RpcResponse::Pong {
                msg: format!("pong from {} (control)", self.node_id),
            },
            RpcRequest::SendPacket {
                source_address,
                packet,
            } => self.send_packet(source_address, packet).await,
            RpcRequest::AddLink {
                neighbor,
                neighbor_address,
                cost,
                auto_probe,
            } => self.add_link(neighbor, neighbor_address, cost, auto_probe).await,
            RpcRequest::EnableSync { enabled } => {
                self.sync.enable_sync(enabled);
                let effective = self.sync.is_sync_enabled();
                RpcResponse::EnableSync {
                    success: true,
                    message: if effective {
                        "topology sync enabled".to_string()
                    } else {
                        "topology sync disabled".to_string()
                    },
                    enabled: effective,
                }
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use {
        super::*,
        spanmesh_net::RpcServer,
        spanmesh_topology::RouteManager,
        tokio_util::sync::CancellationToken,
    };

    fn handler(node_id: &str) -> NodeRpcHandler {
        let topology = Arc::new(Topology::new());
        let routes = Arc::new(RouteManager::new(node_id, topology.clone()));
        let forward = Arc::new(ForwardManager::new(node_id, topology.clone(), routes));
        let sync = Arc::new(TopologySync::new(node_id, topology.clone(), None));
        NodeRpcHandler::new(node_id, topology, forward, sync)
    }

    #[tokio::test]
    async fn test_ping_variants() {
        let h = handler("A");
        let data = h.handle(RpcRequest::Ping { msg: "hi".into() }).await;
        assert_eq!(data, RpcResponse::Pong { msg: "pong from A".into() });
        let control = h.handle(RpcRequest::ControlPing { msg: "hi".into() }).await;
        assert_eq!(
            control,
            RpcResponse::Pong { msg: "pong from A (control)".into() }
        );
    }

    #[tokio::test]
    async fn test_probe_debug_mode_bounds() {
        let h = handler("A");
        for _ in 0..64 {
            match h
                .handle(RpcRequest::ProbeLinkQuality {
                    source: "A".into(),
                    target: String::new(),
                    self_debug: true,
                })
                .await
            {
                RpcResponse::Probe { success, rtt_ms, cost, .. } => {
                    assert!(success);
                    assert!((1..=50).contains(&rtt_ms), "rtt out of range: {rtt_ms}");
                    assert!((1.0..20.0).contains(&cost), "cost out of range: {cost}");
                }
                other => panic!("expected probe response, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_probe_without_debug_refuses() {
        let h = handler("A");
        match h
            .handle(RpcRequest::ProbeLinkQuality {
                source: "A".into(),
                target: "B".into(),
                self_debug: false,
            })
            .await
        {
            RpcResponse::Probe { success, message, .. } => {
                assert!(!success);
                assert!(message.contains("not implemented"));
            }
            other => panic!("expected probe response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_enable_sync_roundtrip() {
        let h = handler("A");
        match h.handle(RpcRequest::EnableSync { enabled: false }).await {
            RpcResponse::EnableSync { success, enabled, .. } => {
                assert!(success);
                assert!(!enabled);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!h.sync.is_sync_enabled());
        match h.handle(RpcRequest::EnableSync { enabled: true }).await {
            RpcResponse::EnableSync { enabled, .. } => assert!(enabled),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_packet_validation() {
        let h = handler("A");
        let empty_source = h
            .handle(RpcRequest::SendPacket {
                source_address: String::new(),
                packet: Packet {
                    destination: "B".into(),
                    ..Default::default()
                },
            })
            .await;
        match empty_source {
            RpcResponse::SendPacket { success, message, .. } => {
                assert!(!success);
                assert!(message.contains("source address"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_add_link_validation() {
        let h = handler("A");
        match h
            .handle(RpcRequest::AddLink {
                neighbor: String::new(),
                neighbor_address: "127.0.0.1:5002".into(),
                cost: 1.0,
                auto_probe: false,
            })
            .await
        {
            RpcResponse::AddLink { success, .. } => assert!(!success),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_add_link_with_explicit_cost() {
        let h = handler("A");
        match h
            .handle(RpcRequest::AddLink {
                neighbor: "B".into(),
                neighbor_address: "127.0.0.1:5002".into(),
                cost: 7.5,
                auto_probe: false,
            })
            .await
        {
            RpcResponse::AddLink { success, cost, .. } => {
                assert!(success);
                assert_eq!(cost, 7.5);
            }
            other => panic!("unexpected {other:?}"),
        }
        let node = h.topology.get_node("B").unwrap();
        assert_eq!(node.rpc_addr, "127.0.0.1:5002");
        assert_eq!(node.status, NodeStatus::Unknown);
        assert_eq!(h.topology.get_cost("A", "B"), Some(7.5));
    }

    #[tokio::test]
    async fn test_add_link_auto_probe_against_live_peer() {
        // A real peer whose probe endpoint answers in debug mode.
        let peer = handler("B");
        let cancel = CancellationToken::new();
        let server = RpcServer::start("127.0.0.1:0", Arc::new(peer), &cancel)
            .await
            .unwrap();
        let peer_addr = server.local_addr().to_string();

        let h = handler("A");
        match h
            .handle(RpcRequest::AddLink {
                neighbor: "B".into(),
                neighbor_address: peer_addr,
                cost: 0.0,
                auto_probe: true,
            })
            .await
        {
            RpcResponse::AddLink { success, cost, .. } => {
                assert!(success);
                assert!((1.0..20.0).contains(&cost));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(h.topology.get_cost("A", "B").is_some());
    }

    #[tokio::test]
    async fn test_add_link_probe_failure_reported() {
        let h = handler("A");
        match h
            .handle(RpcRequest::AddLink {
                neighbor: "B".into(),
                neighbor_address: "127.0.0.1:1".into(),
                cost: 0.0,
                auto_probe: false, // cost <= 0 forces the probe anyway
            })
            .await
        {
            RpcResponse::AddLink { success, message, .. } => {
                assert!(!success);
                assert!(message.contains("failed to probe"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
