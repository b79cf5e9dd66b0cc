//! Node bootstrap and the public application-facing API.
//!
//! `MeshNode::start` wires every subsystem together in dependency
//! order: topology and routes first, then gossip membership (joining a
//! seed when configured; unreachable seeds are fatal), the sync layer
//! with its change-notification -> recompute callback, the configured
//! edge seed, and finally the RPC listener.  One cancellation token
//! rules every task the node spawns; `shutdown` cancels it, announces
//! the departure, and closes the connection pool.

use {
    crate::{
        config::RuntimeConfig,
        error::{CoreError, Result},
        rpc_handler::NodeRpcHandler,
        topology_sync::TopologySync,
    },
    log::{debug, info, warn},
    spanmesh_membership::{Membership, MembershipConfig},
    spanmesh_net::{ForwardManager, ForwardStatsSnapshot, Packet, RpcServer},
    spanmesh_topology::{NodeInfo, NodeStatus, RouteManager, Topology},
    std::{collections::HashMap, sync::Arc, time::Duration},
    tokio_util::sync::CancellationToken,
};

/// Role tag attached to every spanmesh member.
pub const NODE_ROLE: &str = "spanmesh-node";

/// How often the daemon logs its current topology.
const TOPOLOGY_DUMP_INTERVAL: Duration = Duration::from_secs(10);

/// A running spanmesh node.
pub struct MeshNode {
    config: RuntimeConfig,
    topology: Arc<Topology>,
    routes: Arc<RouteManager>,
    forward: Arc<ForwardManager>,
    sync: Arc<TopologySync>,
    membership: Arc<Membership>,
    handler: Arc<NodeRpcHandler>,
    server: RpcServer,
    cancel: CancellationToken,
}

impl MeshNode {
    /// Bring a node fully up.
    ///
    /// Fatal errors here are exactly the two the framework defines:
    /// invalid configuration, and a configured join address with no
    /// reachable seed.
    pub async fn start(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        info!(
            "[{}] starting: ip={} rpc={} gossip={}",
            config.node_id, config.node_ip, config.data_port, config.gossip_port
        );

        let cancel = CancellationToken::new();
        let topology = Arc::new(Topology::new());
        let routes = Arc::new(RouteManager::new(&config.node_id, topology.clone()));
        let forward = Arc::new(ForwardManager::new(
            &config.node_id,
            topology.clone(),
            routes.clone(),
        ));

        // Bind the RPC listener before anything is advertised, so a
        // port-0 config still gossips the real port.
        let listener = tokio::net::TcpListener::bind(&config.rpc_bind_addr())
            .await
            .map_err(spanmesh_net::NetError::from)?;
        let data_port = listener
            .local_addr()
            .map_err(spanmesh_net::NetError::from)?
            .port();

        // Gossip membership, tagged so peers can derive our NodeInfo.
        let mut tags = HashMap::new();
        tags.insert("node_id".to_string(), config.node_id.clone());
        tags.insert("ip".to_string(), config.node_ip.clone());
        tags.insert("port".to_string(), data_port.to_string());
        tags.insert("role".to_string(), NODE_ROLE.to_string());
        let membership = Membership::start(
            MembershipConfig {
                node_name: config.node_id.clone(),
                bind_addr: config.gossip_bind_addr(),
                tags,
                ..Default::default()
            },
            cancel.clone(),
        )
        .await?;
        let events = membership.take_events();

        if let Some(join_addr) = &config.join_addr {
            info!("[{}] joining cluster at {join_addr}", config.node_id);
            if let Err(err) = membership.join(std::slice::from_ref(join_addr)).await {
                cancel.cancel();
                return Err(CoreError::Join(err));
            }
        }

        // The local node is always part of its own topology.
        topology.add_node(NodeInfo {
            id: config.node_id.clone(),
            ip: config.node_ip.clone(),
            port: data_port,
            rpc_addr: String::new(),
            status: NodeStatus::Alive,
        });

        let sync = Arc::new(TopologySync::new(
            &config.node_id,
            topology.clone(),
            Some(membership.clone()),
        ));
        if config.app.topology.sync_interval > 0 {
            sync.set_sync_interval(Duration::from_secs(config.app.topology.sync_interval));
        }

        // Change notification -> route recomputation, the only consumer
        // of the callback slot.
        let recompute_routes = routes.clone();
        sync.set_change_callback(Box::new(move || {
            recompute_routes.recompute();
        }));
        sync.start(events, &cancel);

        // Seed edges from the deployment config.
        for edge in &config.edges {
            if edge.cost <= 0.0 || !edge.cost.is_finite() {
                warn!(
                    "[{}] skipping configured edge {}-{} with cost {}",
                    config.node_id, edge.from, edge.to, edge.cost
                );
                continue;
            }
            topology.update_link(&edge.from, &edge.to, edge.cost);
            info!(
                "[{}] configured edge {}-{} cost={:.2}",
                config.node_id, edge.from, edge.to, edge.cost
            );
        }
        routes.recompute();

        let handler = Arc::new(NodeRpcHandler::new(
            &config.node_id,
            topology.clone(),
            forward.clone(),
            sync.clone(),
        ));
        let server =
            RpcServer::serve(listener, handler.clone(), &cancel).map_err(CoreError::from)?;

        Ok(Self {
            config,
            topology,
            routes,
            forward,
            sync,
            membership,
            handler,
            server,
            cancel,
        })
    }

    /// Log the topology now and then every ten seconds, the way the
    /// daemon keeps its log file inspectable.
    pub fn spawn_topology_dump(&self) {
        let topology = self.topology.clone();
        let node_id = self.config.node_id.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                debug!("[{node_id}] {}", topology.describe());
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(TOPOLOGY_DUMP_INTERVAL) => {}
                }
            }
        });
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    /// Address of the RPC listener (useful when the port was 0).
    pub fn rpc_addr(&self) -> String {
        self.server.local_addr().to_string()
    }

    /// Address of the gossip socket.
    pub fn gossip_addr(&self) -> String {
        self.membership.local_addr().to_string()
    }

    /// Send `payload` to the node named `destination` with the default
    /// five-second deadline.
    pub async fn send(&self, destination: &str, payload: Vec<u8>) -> Result<()> {
        self.forward.send(destination, payload).await?;
        Ok(())
    }

    /// Send with an explicit first-hop deadline.
    pub async fn send_with_deadline(
        &self,
        destination: &str,
        payload: Vec<u8>,
        deadline: Duration,
    ) -> Result<()> {
        self.forward
            .send_with_deadline(destination, payload, deadline)
            .await?;
        Ok(())
    }

    /// Install the callback invoked for every packet delivered here.
    pub fn on_receive<F>(&self, callback: F)
    where
        F: Fn(&Packet) + Send + Sync + 'static,
    {
        self.forward.set_delivery_callback(Box::new(callback));
    }

    /// Register a link to a neighbor, probing for the cost when
    /// `cost <= 0`.
    pub async fn add_link(&self, neighbor: &str, neighbor_addr: &str, cost: f64) -> Result<()> {
        match self
            .handler
            .add_link(
                neighbor.to_string(),
                neighbor_addr.to_string(),
                cost,
                cost <= 0.0,
            )
            .await
        {
            spanmesh_net::RpcResponse::AddLink { success: true, .. } => Ok(()),
            spanmesh_net::RpcResponse::AddLink { message, .. } => Err(CoreError::Config(message)),
            _ => unreachable!("add_link always answers with an AddLink response"),
        }
    }

    /// Toggle the periodic topology broadcast.
    pub fn enable_sync(&self, enabled: bool) {
        self.sync.enable_sync(enabled);
    }

    pub fn is_sync_enabled(&self) -> bool {
        self.sync.is_sync_enabled()
    }

    /// Forwarding counters snapshot.
    pub fn stats(&self) -> ForwardStatsSnapshot {
        self.forward.stats()
    }

    /// Shared topology handle, mostly for diagnostics.
    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    /// Current route table snapshot, mostly for diagnostics.
    pub fn routes(&self) -> spanmesh_topology::RouteTable {
        self.routes.get_table()
    }

    /// Leave the cluster and stop every task this node spawned.
    pub async fn shutdown(&self) {
        info!("[{}] shutting down", self.config.node_id);
        self.membership.leave().await;
        self.server.stop();
        self.cancel.cancel();
        self.forward.shutdown();
        info!("[{}] shutdown complete", self.config.node_id);
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
