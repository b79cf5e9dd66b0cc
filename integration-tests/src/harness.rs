//! Shared helpers for multi-node tests.
//!
//! Nodes run with OS-assigned ports and a one-second full-sync
//! interval; discovery between indirectly-connected nodes rides the
//! one-second gossip round, so waits here poll with generous deadlines
//! rather than sleeping fixed amounts.

use {
    spanmesh_core::{
        config::{AppConfig, EdgeEntry, RuntimeConfig},
        MeshNode, Packet,
    },
    std::{
        sync::{Arc, Mutex},
        time::Duration,
    },
};

/// Deadline for cluster-convergence waits.
pub const CONVERGE_DEADLINE: Duration = Duration::from_secs(15);

/// Start a node on ephemeral ports, optionally joining a seed's gossip
/// address.
pub async fn start_node(id: &str, join: Option<String>) -> MeshNode {
    start_node_with_edges(id, join, &[]).await
}

/// Start a node with preconfigured topology edges.
pub async fn start_node_with_edges(
    id: &str,
    join: Option<String>,
    edges: &[(&str, &str, f64)],
) -> MeshNode {
    let mut app = AppConfig::default();
    app.log.output = "stdout".to_string();
    app.topology.sync_interval = 1;

    let mut config = RuntimeConfig::from_flags(app, id, "127.0.0.1", 0, 0, join);
    config.edges = edges
        .iter()
        .map(|(from, to, cost)| EdgeEntry {
            from: from.to_string(),
            to: to.to_string(),
            cost: *cost,
        })
        .collect();

    MeshNode::start(config)
        .await
        .unwrap_or_else(|err| panic!("node {id} failed to start: {err}"))
}

/// Record every packet delivered at `node`.
pub fn collect_deliveries(node: &MeshNode) -> Arc<Mutex<Vec<Packet>>> {
    let sink: Arc<Mutex<Vec<Packet>>> = Arc::new(Mutex::new(Vec::new()));
    let collected = sink.clone();
    node.on_receive(move |packet| {
        collected.lock().unwrap().push(packet.clone());
    });
    sink
}

/// Poll `condition` until it holds or `deadline` passes.
pub async fn wait_until<F>(deadline: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let poll = Duration::from_millis(50);
    let started = std::time::Instant::now();
    loop {
        if condition() {
            return true;
        }
        if started.elapsed() > deadline {
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}

/// Wait until every node's topology knows every id in `ids`.
pub async fn wait_for_visibility(nodes: &[&MeshNode], ids: &[&str]) {
    for node in nodes {
        let seen = wait_until(CONVERGE_DEADLINE, || {
            ids.iter().all(|id| node.topology().get_node(id).is_some())
        })
        .await;
        assert!(
            seen,
            "node {} never saw all of {ids:?}; knows {:?}",
            node.node_id(),
            node.topology()
                .get_all_nodes()
                .iter()
                .map(|n| n.id.clone())
                .collect::<Vec<_>>()
        );
    }
}

/// Wait until `node` has a route to `destination`.
pub async fn wait_for_route(node: &MeshNode, destination: &str) {
    let routed = wait_until(CONVERGE_DEADLINE, || {
        node.routes().get_route(destination).is_some()
    })
    .await;
    assert!(
        routed,
        "node {} never computed a route to {destination}",
        node.node_id()
    );
}
