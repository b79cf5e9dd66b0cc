//! The shared topology graph: nodes and undirected weighted links.
//!
//! One `Topology` instance per process, shared between the gossip sync
//! layer (writer), the SPF calculator (reader), and the forward manager
//! (reader).  All mutators serialize against all readers behind an
//! interior lock; readers get owned copies so they can iterate without
//! holding it.

use {
    log::debug,
    std::{
        collections::HashMap,
        fmt::Write as _,
        sync::RwLock,
    },
};

/// Liveness status of a node as last reported by the membership layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeStatus {
    /// Never heard from (e.g. registered manually via AddLink).
    #[default]
    Unknown,
    /// Member of the cluster and responding.
    Alive,
    /// Silent long enough to be suspected down.
    Suspect,
    /// Declared dead by the failure detector.
    Failed,
    /// Left the cluster gracefully.
    Left,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeStatus::Unknown => "unknown",
            NodeStatus::Alive => "alive",
            NodeStatus::Suspect => "suspect",
            NodeStatus::Failed => "failed",
            NodeStatus::Left => "left",
        };
        f.write_str(s)
    }
}

/// Identity and reachability info for one node in the mesh.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeInfo {
    /// Cluster-wide unique node id.  Immutable for the local node once
    /// the process has started.
    pub id: String,
    /// Bind / advertised IP.
    pub ip: String,
    /// Data-plane RPC port.
    pub port: u16,
    /// Explicit "host:port" RPC address; preferred over `ip:port` when
    /// non-empty (nodes registered via AddLink only carry this).
    pub rpc_addr: String,
    /// Last known liveness status.
    pub status: NodeStatus,
}

impl NodeInfo {
    /// The address to dial for this node's RPC endpoint.
    pub fn rpc_target(&self) -> String {
        if self.rpc_addr.is_empty() {
            format!("{}:{}", self.ip, self.port)
        } else {
            self.rpc_addr.clone()
        }
    }
}

/// Canonical id for an unordered node pair, used to deduplicate the
/// edge set when broadcasting full topology state.
pub fn edge_id(a: &str, b: &str) -> String {
    if a < b {
        format!("{a}-{b}")
    } else {
        format!("{b}-{a}")
    }
}

#[derive(Default)]
struct TopologyInner {
    nodes: HashMap<String, NodeInfo>,
    /// Symmetric adjacency: `edges[a][b] == edges[b][a]`.
    edges: HashMap<String, HashMap<String, f64>>,
}

/// Undirected weighted graph of the known mesh.
///
/// At most one edge per unordered node pair.  Registering a `NodeInfo`
/// and creating adjacency entries are separate operations: a link
/// learned by gossip may reference nodes whose `NodeInfo` arrives
/// later, and the edge is kept until then.
#[derive(Default)]
pub struct Topology {
    inner: RwLock<TopologyInner>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a node record.  Incident edges are preserved
    /// when an existing node is re-registered.
    pub fn add_node(&self, node: NodeInfo) {
        let mut inner = self.inner.write().expect("topology lock poisoned");
        inner.edges.entry(node.id.clone()).or_default();
        inner.nodes.insert(node.id.clone(), node);
    }

    /// Remove a node and sweep every edge incident to it.
    pub fn remove_node(&self, id: &str) {
        let mut inner = self.inner.write().expect("topology lock poisoned");
        inner.nodes.remove(id);
        if let Some(neighbors) = inner.edges.remove(id) {
            for neighbor in neighbors.keys() {
                if let Some(back) = inner.edges.get_mut(neighbor) {
                    back.remove(id);
                }
            }
        }
    }

    /// Set the cost of the undirected link `a`–`b`, creating adjacency
    /// entries on demand.  Does not register `NodeInfo` records.
    pub fn update_link(&self, a: &str, b: &str, cost: f64) {
        let mut inner = self.inner.write().expect("topology lock poisoned");
        inner
            .edges
            .entry(a.to_string())
            .or_default()
            .insert(b.to_string(), cost);
        inner
            .edges
            .entry(b.to_string())
            .or_default()
            .insert(a.to_string(), cost);
        debug!("topology: link {a}-{b} cost={cost}");
    }

    /// Remove the undirected link `a`–`b` (both directions).
    pub fn remove_link(&self, a: &str, b: &str) {
        let mut inner = self.inner.write().expect("topology lock poisoned");
        if let Some(m) = inner.edges.get_mut(a) {
            m.remove(b);
        }
        if let Some(m) = inner.edges.get_mut(b) {
            m.remove(a);
        }
    }

    /// Cost of the link `a`–`b`, or `None` when no such link exists.
    pub fn get_cost(&self, a: &str, b: &str) -> Option<f64> {
        let inner = self.inner.read().expect("topology lock poisoned");
        inner.edges.get(a).and_then(|m| m.get(b)).copied()
    }

    /// All direct neighbors of `id` with their link costs.
    pub fn get_neighbors(&self, id: &str) -> HashMap<String, f64> {
        let inner = self.inner.read().expect("topology lock poisoned");
        inner.edges.get(id).cloned().unwrap_or_default()
    }

    pub fn get_node(&self, id: &str) -> Option<NodeInfo> {
        let inner = self.inner.read().expect("topology lock poisoned");
        inner.nodes.get(id).cloned()
    }

    pub fn get_all_nodes(&self) -> Vec<NodeInfo> {
        let inner = self.inner.read().expect("topology lock poisoned");
        inner.nodes.values().cloned().collect()
    }

    /// A full copy of the adjacency map.
    pub fn get_adjacency(&self) -> HashMap<String, HashMap<String, f64>> {
        let inner = self.inner.read().expect("topology lock poisoned");
        inner.edges.clone()
    }

    /// Human-readable dump of nodes and deduplicated links, used by the
    /// daemon's periodic topology log.
    pub fn describe(&self) -> String {
        let inner = self.inner.read().expect("topology lock poisoned");
        let mut out = String::from("topology:\n  nodes:\n");
        let mut ids: Vec<_> = inner.nodes.keys().collect();
        ids.sort();
        for id in ids {
            let n = &inner.nodes[id];
            let _ = writeln!(out, "    {}: {}:{} [{}]", n.id, n.ip, n.port, n.status);
        }
        out.push_str("  links:\n");
        let mut seen: Vec<String> = Vec::new();
        let mut lines: Vec<String> = Vec::new();
        for (from, neighbors) in &inner.edges {
            for (to, cost) in neighbors {
                let key = edge_id(from, to);
                if !seen.contains(&key) {
                    lines.push(format!("    {key}: cost={cost:.2}"));
                    seen.push(key);
                }
            }
        }
        lines.sort();
        for line in lines {
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> NodeInfo {
        NodeInfo {
            id: id.to_string(),
            ip: "127.0.0.1".to_string(),
            port: 5000,
            ..Default::default()
        }
    }

    #[test]
    fn test_link_is_symmetric() {
        let t = Topology::new();
        t.update_link("a", "b", 3.5);
        assert_eq!(t.get_cost("a", "b"), Some(3.5));
        assert_eq!(t.get_cost("b", "a"), Some(3.5));
    }

    #[test]
    fn test_update_link_overwrites_both_directions() {
        let t = Topology::new();
        t.update_link("a", "b", 3.0);
        t.update_link("b", "a", 1.0);
        assert_eq!(t.get_cost("a", "b"), Some(1.0));
        assert_eq!(t.get_cost("b", "a"), Some(1.0));
    }

    #[test]
    fn test_remove_node_sweeps_incident_edges() {
        let t = Topology::new();
        t.add_node(node("a"));
        t.add_node(node("b"));
        t.add_node(node("c"));
        t.update_link("a", "b", 1.0);
        t.update_link("a", "c", 2.0);
        t.remove_node("a");
        assert!(t.get_node("a").is_none());
        assert_eq!(t.get_cost("b", "a"), None);
        assert_eq!(t.get_cost("c", "a"), None);
        // b and c themselves survive
        assert!(t.get_node("b").is_some());
    }

    #[test]
    fn test_readd_node_preserves_edges() {
        let t = Topology::new();
        t.add_node(node("a"));
        t.update_link("a", "b", 1.0);
        let mut replacement = node("a");
        replacement.port = 6000;
        t.add_node(replacement);
        assert_eq!(t.get_node("a").unwrap().port, 6000);
        assert_eq!(t.get_cost("a", "b"), Some(1.0));
    }

    #[test]
    fn test_link_without_node_records() {
        // Gossip can deliver a link before the member-join of either
        // endpoint; the edge must be kept.
        let t = Topology::new();
        t.update_link("x", "y", 4.0);
        assert_eq!(t.get_cost("x", "y"), Some(4.0));
        assert!(t.get_node("x").is_none());
    }

    #[test]
    fn test_remove_link() {
        let t = Topology::new();
        t.update_link("a", "b", 1.0);
        t.remove_link("b", "a");
        assert_eq!(t.get_cost("a", "b"), None);
    }

    #[test]
    fn test_neighbors_are_copies() {
        let t = Topology::new();
        t.update_link("a", "b", 1.0);
        let mut n = t.get_neighbors("a");
        n.insert("z".to_string(), 9.0);
        assert_eq!(t.get_cost("a", "z"), None);
    }

    #[test]
    fn test_edge_id_is_order_independent() {
        assert_eq!(edge_id("a", "b"), edge_id("b", "a"));
        assert_eq!(edge_id("a", "b"), "a-b");
    }

    #[test]
    fn test_rpc_target_prefers_explicit_addr() {
        let mut n = node("a");
        assert_eq!(n.rpc_target(), "127.0.0.1:5000");
        n.rpc_addr = "10.0.0.7:9000".to_string();
        assert_eq!(n.rpc_target(), "10.0.0.7:9000");
    }
}
