//! spanmesh integration tests.
//!
//! Real multi-node clusters in one process: every node binds its own
//! gossip socket and RPC listener on `127.0.0.1` with OS-assigned
//! ports, joins via gossip, and exchanges real packets.
//!
//! # Areas covered
//!
//! 1. **Send path** — one-hop and multi-hop delivery with visited-path
//!    tracking and drop accounting
//! 2. **Topology sync** — link-update propagation, full-sync
//!    convergence of disjoint edge sets, min-cost merge
//! 3. **Control plane** — ping, packet injection, link registration
//!    with auto-probe, sync toggling

pub mod harness;
