//! Shortest-path-first route computation.
//!
//! Plain Dijkstra over a topology snapshot with a lazy-deletion binary
//! heap: entries are never decrease-keyed, stale ones are discarded on
//! dequeue by comparing against the best known distance.  Neighbor
//! lookups are cached per run so each node pays for at most one locked
//! read of the topology.

use {
    crate::{
        graph::Topology,
        route_table::{Route, RouteTable},
    },
    std::{
        cmp::{Ordering, Reverse},
        collections::{BinaryHeap, HashMap},
    },
};

/// Pending heap entry: a tentative cost for a node.
#[derive(Debug, PartialEq)]
struct PendingVisit {
    cost: f64,
    node: String,
}

impl Eq for PendingVisit {}

impl Ord for PendingVisit {
    fn cmp(&self, other: &Self) -> Ordering {
        // Costs are finite non-negative (validated before they enter
        // the topology); node id breaks ties so heap order does not
        // depend on insertion order.
        self.cost
            .total_cmp(&other.cost)
            .then_with(|| self.node.cmp(&other.node))
    }
}

impl PartialOrd for PendingVisit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Computes per-source routing tables from a topology snapshot.
#[derive(Debug, Default)]
pub struct SpfCalculator;

impl SpfCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Run Dijkstra from `source` and collect the resulting routes.
    ///
    /// Unreachable destinations are omitted rather than reported with
    /// infinite cost; the source itself never appears in the output.
    /// O((V+E) log V).
    pub fn compute(&self, source: &str, topology: &Topology) -> RouteTable {
        let all_nodes = topology.get_all_nodes();

        let mut distance: HashMap<String, f64> = all_nodes
            .iter()
            .map(|n| (n.id.clone(), f64::INFINITY))
            .collect();
        distance.insert(source.to_string(), 0.0);

        let mut next_hop: HashMap<String, String> = HashMap::new();
        let mut previous: HashMap<String, String> = HashMap::new();
        let mut neighbor_cache: HashMap<String, Vec<(String, f64)>> = HashMap::new();

        let mut heap = BinaryHeap::new();
        heap.push(Reverse(PendingVisit {
            cost: 0.0,
            node: source.to_string(),
        }));

        while let Some(Reverse(PendingVisit { cost, node })) = heap.pop() {
            // Stale entry: a shorter path to this node was already
            // settled after this entry was queued.
            if cost > distance.get(&node).copied().unwrap_or(f64::INFINITY) {
                continue;
            }

            let neighbors = neighbor_cache.entry(node.clone()).or_insert_with(|| {
                let mut n: Vec<(String, f64)> = topology.get_neighbors(&node).into_iter().collect();
                // Relax in id order so equal-cost ties resolve the same
                // way on every run.
                n.sort_by(|a, b| a.0.cmp(&b.0));
                n
            });

            for (neighbor, link_cost) in neighbors.iter() {
                // A neighbor known only from an edge (no node record
                // yet) is not routable; the edge waits until its
                // NodeInfo arrives.
                let Some(&best) = distance.get(neighbor) else {
                    continue;
                };
                let candidate = cost + link_cost;
                if candidate < best {
                    distance.insert(neighbor.clone(), candidate);
                    previous.insert(neighbor.clone(), node.clone());

                    // First hop away from the source is the neighbor
                    // itself; deeper relaxations inherit it.
                    let hop = if node == source {
                        neighbor.clone()
                    } else {
                        next_hop[&node].clone()
                    };
                    next_hop.insert(neighbor.clone(), hop);

                    heap.push(Reverse(PendingVisit {
                        cost: candidate,
                        node: neighbor.clone(),
                    }));
                }
            }
        }

        let mut table = RouteTable::new(source);
        for (dest, cost) in &distance {
            if dest == source || cost.is_infinite() {
                continue;
            }
            table.add_route(Route {
                destination: dest.clone(),
                next_hop: next_hop[dest].clone(),
                cost: *cost,
                path: reconstruct_path(source, dest, &previous),
            });
        }
        table
    }
}

/// Walk the predecessor chain back from `dest`, then reverse.
fn reconstruct_path(
    source: &str,
    dest: &str,
    previous: &HashMap<String, String>,
) -> Vec<String> {
    let mut path = Vec::with_capacity(8);
    let mut at = dest;
    loop {
        path.push(at.to_string());
        if at == source {
            break;
        }
        match previous.get(at) {
            Some(prev) => at = prev,
            None => break,
        }
    }
    path.reverse();
    path
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeInfo;

    fn topology_with(nodes: &[&str], edges: &[(&str, &str, f64)]) -> Topology {
        let t = Topology::new();
        for id in nodes {
            t.add_node(NodeInfo {
                id: id.to_string(),
                ..Default::default()
            });
        }
        for (a, b, cost) in edges {
            t.update_link(a, b, *cost);
        }
        t
    }

    #[test]
    fn test_triangle_prefers_two_hop_path() {
        let t = topology_with(
            &["A", "B", "C"],
            &[("A", "B", 1.0), ("B", "C", 1.0), ("A", "C", 10.0)],
        );
        let table = SpfCalculator::new().compute("A", &t);
        let route = table.get_route("C").unwrap();
        assert_eq!(route.cost, 2.0);
        assert_eq!(route.next_hop, "B");
        assert_eq!(route.path, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_direct_edge_dominates() {
        let t = topology_with(
            &["A", "B", "C"],
            &[("A", "B", 1.0), ("B", "C", 1.0), ("A", "C", 1.0)],
        );
        let table = SpfCalculator::new().compute("A", &t);
        let route = table.get_route("C").unwrap();
        assert_eq!(route.cost, 1.0);
        assert_eq!(route.next_hop, "C");
    }

    #[test]
    fn test_unreachable_nodes_omitted() {
        let t = topology_with(&["A", "B", "C", "D"], &[("A", "B", 5.0)]);
        let table = SpfCalculator::new().compute("A", &t);
        assert_eq!(table.len(), 1);
        assert!(table.get_route("B").is_some());
        assert!(table.get_route("C").is_none());
        assert!(table.get_route("D").is_none());
    }

    #[test]
    fn test_source_not_in_output() {
        let t = topology_with(&["A", "B"], &[("A", "B", 1.0)]);
        let table = SpfCalculator::new().compute("A", &t);
        assert!(table.get_route("A").is_none());
    }

    #[test]
    fn test_next_hop_consistency() {
        // For every destination, the next hop must be a direct neighbor
        // of the source and account for exactly the first link's cost.
        let t = topology_with(
            &["A", "B", "C", "D", "E"],
            &[
                ("A", "B", 1.0),
                ("A", "C", 4.0),
                ("B", "C", 2.0),
                ("B", "D", 5.0),
                ("C", "D", 1.0),
                ("D", "E", 1.0),
            ],
        );
        let calc = SpfCalculator::new();
        let from_a = calc.compute("A", &t);
        let source_neighbors = t.get_neighbors("A");

        for route in from_a.get_all_routes() {
            let first_link = source_neighbors
                .get(&route.next_hop)
                .expect("next hop must be a direct neighbor of the source");
            let from_hop = calc.compute(&route.next_hop, &t);
            let remainder = if route.destination == route.next_hop {
                0.0
            } else {
                from_hop.get_route(&route.destination).unwrap().cost
            };
            assert!(
                (route.cost - (first_link + remainder)).abs() < 1e-9,
                "cost mismatch for {}",
                route.destination
            );
        }
    }

    #[test]
    fn test_path_endpoints() {
        let t = topology_with(
            &["A", "B", "C", "D"],
            &[("A", "B", 1.0), ("B", "C", 1.0), ("C", "D", 1.0)],
        );
        let table = SpfCalculator::new().compute("A", &t);
        let route = table.get_route("D").unwrap();
        assert_eq!(route.path.first().map(String::as_str), Some("A"));
        assert_eq!(route.path.last().map(String::as_str), Some("D"));
        assert_eq!(route.path, vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn test_edge_to_unregistered_node_not_routed() {
        // B is linked but has no node record yet (its member-join has
        // not arrived); it must neither appear in the output nor carry
        // transit traffic.
        let t = topology_with(&["A", "C"], &[("A", "B", 1.0), ("B", "C", 1.0)]);
        let table = SpfCalculator::new().compute("A", &t);
        assert!(table.get_route("B").is_none());
        assert!(table.get_route("C").is_none());
    }

    #[test]
    fn test_empty_topology() {
        let t = Topology::new();
        let table = SpfCalculator::new().compute("A", &t);
        assert!(table.is_empty());
    }

    #[test]
    fn test_deterministic_tie_break() {
        // Two equal-cost paths to D; whichever wins must win on every
        // run.
        let t = topology_with(
            &["A", "B", "C", "D"],
            &[
                ("A", "B", 1.0),
                ("A", "C", 1.0),
                ("B", "D", 1.0),
                ("C", "D", 1.0),
            ],
        );
        let calc = SpfCalculator::new();
        let first = calc.compute("A", &t).get_route("D").unwrap().clone();
        for _ in 0..10 {
            let again = calc.compute("A", &t).get_route("D").unwrap().clone();
            assert_eq!(first.next_hop, again.next_hop);
            assert_eq!(first.path, again.path);
        }
        assert_eq!(first.cost, 2.0);
    }
}
