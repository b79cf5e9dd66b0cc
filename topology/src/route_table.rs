//! The routing table published for one source node.

use std::collections::HashMap;

/// A precomputed forwarding instruction for one destination.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub destination: String,
    /// Direct neighbor of the source to hand the packet to.
    pub next_hop: String,
    /// Total path cost from the source.
    pub cost: f64,
    /// Full path, source first, destination last.
    pub path: Vec<String>,
}

/// Per-destination routes for a fixed source node.
///
/// Instances are immutable from the reader's point of view: the route
/// manager builds a fresh table on every recomputation and swaps it in
/// wholesale, so a reader never sees a partially updated table.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    source: String,
    routes: HashMap<String, Route>,
}

impl RouteTable {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            routes: HashMap::new(),
        }
    }

    /// The source node this table was computed for.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn add_route(&mut self, route: Route) {
        self.routes.insert(route.destination.clone(), route);
    }

    pub fn remove_route(&mut self, destination: &str) {
        self.routes.remove(destination);
    }

    pub fn get_route(&self, destination: &str) -> Option<&Route> {
        self.routes.get(destination)
    }

    pub fn get_next_hop(&self, destination: &str) -> Option<&str> {
        self.routes.get(destination).map(|r| r.next_hop.as_str())
    }

    pub fn clear(&mut self) {
        self.routes.clear();
    }

    pub fn get_all_routes(&self) -> Vec<Route> {
        self.routes.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Formatted table dump for the recomputation log.
    pub fn describe(&self) -> String {
        let mut dests: Vec<_> = self.routes.keys().collect();
        dests.sort();
        let mut out = format!("routes from {}:\n", self.source);
        for dest in dests {
            let r = &self.routes[dest];
            out.push_str(&format!(
                "  {} via {} cost={:.2} path={:?}\n",
                r.destination, r.next_hop, r.cost, r.path
            ));
        }
        out
    }
}
