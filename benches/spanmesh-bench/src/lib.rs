//! Benchmark helpers: synthetic topologies of configurable size.

use {rand::Rng, spanmesh_topology::{NodeInfo, Topology}};

/// Build a random connected topology: a ring through every node plus
/// `extra_edges` random chords with costs in [1, 10).
pub fn random_topology(node_count: usize, extra_edges: usize, seed_label: &str) -> Topology {
    let topology = Topology::new();
    let ids: Vec<String> = (0..node_count)
        .map(|i| format!("{seed_label}-{i}"))
        .collect();
    for id in &ids {
        topology.add_node(NodeInfo {
            id: id.clone(),
            ..Default::default()
        });
    }

    // Ring keeps the graph connected so SPF visits every node.
    for i in 0..node_count {
        let next = (i + 1) % node_count;
        topology.update_link(&ids[i], &ids[next], 1.0);
    }

    let mut rng = rand::thread_rng();
    for _ in 0..extra_edges {
        let a = rng.gen_range(0..node_count);
        let b = rng.gen_range(0..node_count);
        if a == b {
            continue;
        }
        let cost: f64 = rng.gen_range(1.0..10.0);
        topology.update_link(&ids[a], &ids[b], cost);
    }
    topology
}
