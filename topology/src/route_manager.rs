//! Owns the published routing table for the local node.
//!
//! The manager is the single writer: every topology change notification
//! triggers `recompute`, which runs SPF against a topology snapshot and
//! swaps the finished table in under the write lock.  Readers on the
//! send path take the read lock only for the lookup, so a recomputation
//! never blocks them for longer than the swap itself.

use {
    crate::{
        graph::Topology,
        route_table::{Route, RouteTable},
        spf::SpfCalculator,
    },
    log::{debug, info},
    std::sync::{Arc, RwLock},
};

pub struct RouteManager {
    node_id: String,
    topology: Arc<Topology>,
    table: RwLock<RouteTable>,
    calculator: SpfCalculator,
}

impl RouteManager {
    pub fn new(node_id: impl Into<String>, topology: Arc<Topology>) -> Self {
        let node_id = node_id.into();
        Self {
            table: RwLock::new(RouteTable::new(node_id.clone())),
            node_id,
            topology,
            calculator: SpfCalculator::new(),
        }
    }

    /// Recompute the table from the current topology and publish it.
    pub fn recompute(&self) {
        info!("[{}] recomputing routes", self.node_id);
        let fresh = self.calculator.compute(&self.node_id, &self.topology);
        debug!("[{}] {}", self.node_id, fresh.describe());
        let mut table = self.table.write().expect("route table lock poisoned");
        *table = fresh;
    }

    pub fn get_route(&self, destination: &str) -> Option<Route> {
        let table = self.table.read().expect("route table lock poisoned");
        table.get_route(destination).cloned()
    }

    pub fn get_next_hop(&self, destination: &str) -> Option<String> {
        let table = self.table.read().expect("route table lock poisoned");
        table.get_next_hop(destination).map(str::to_string)
    }

    /// Snapshot of the whole table.
    pub fn get_table(&self) -> RouteTable {
        let table = self.table.read().expect("route table lock poisoned");
        table.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeInfo;

    fn seed(topology: &Topology, ids: &[&str]) {
        for id in ids {
            topology.add_node(NodeInfo {
                id: id.to_string(),
                ..Default::default()
            });
        }
    }

    #[test]
    fn test_recompute_publishes_new_table() {
        let topology = Arc::new(Topology::new());
        seed(&topology, &["A", "B", "C"]);
        topology.update_link("A", "B", 1.0);

        let manager = RouteManager::new("A", topology.clone());
        assert!(manager.get_route("B").is_none());

        manager.recompute();
        assert_eq!(manager.get_next_hop("B"), Some("B".to_string()));
        assert!(manager.get_route("C").is_none());

        // Topology grows; routes appear only after the next recompute.
        topology.update_link("B", "C", 1.0);
        assert!(manager.get_route("C").is_none());
        manager.recompute();
        let route = manager.get_route("C").unwrap();
        assert_eq!(route.cost, 2.0);
        assert_eq!(route.next_hop, "B");
    }

    #[test]
    fn test_table_snapshot_is_detached() {
        let topology = Arc::new(Topology::new());
        seed(&topology, &["A", "B"]);
        topology.update_link("A", "B", 1.0);
        let manager = RouteManager::new("A", topology.clone());
        manager.recompute();

        let snapshot = manager.get_table();
        topology.remove_link("A", "B");
        manager.recompute();
        assert!(manager.get_route("B").is_none());
        // The earlier snapshot still holds the old view.
        assert!(snapshot.get_route("B").is_some());
    }
}
