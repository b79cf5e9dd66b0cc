//! Topology model and shortest-path routing for spanmesh.
//!
//! This crate holds the pure, I/O-free half of the routing core:
//!
//! - **Topology graph** — an undirected weighted graph of known nodes
//!   and links, safe for concurrent mutation and snapshot reads.
//! - **SPF calculator** — Dijkstra over a topology snapshot, producing
//!   a per-destination next-hop table.
//! - **Route table / route manager** — the published routing state,
//!   swapped atomically on every recomputation so lookups on the send
//!   path never observe a half-built table.
//!
//! Network plumbing (gossip, RPC, forwarding) lives in the sibling
//! crates; everything here is deterministic and unit-testable without
//! sockets.

pub mod graph;
pub mod route_manager;
pub mod route_table;
pub mod spf;

pub use graph::{edge_id, NodeInfo, NodeStatus, Topology};
pub use route_manager::RouteManager;
pub use route_table::{Route, RouteTable};
pub use spf::SpfCalculator;
