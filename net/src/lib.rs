//! Networking layer of spanmesh: wire types, framed TCP transport,
//! pooled RPC clients, the RPC server loop, and the packet forwarder.
//!
//! Every node runs one TCP listener that carries both logical services
//! (the peer-to-peer data plane and the operator control plane); a
//! frame on the wire is a length-prefixed bincode [`RpcRequest`] and is
//! answered by exactly one [`RpcResponse`] on the same stream.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`message`]   | Packet, RPC request/response enums, gossip event payloads |
//! | [`transport`] | Length-prefixed frame encoding and stream I/O |
//! | [`pool`]      | Outbound RPC clients, pooled per peer node |
//! | [`server`]    | Accept loop and per-connection dispatch |
//! | [`forward`]   | Hop-by-hop packet forwarding and delivery stats |
//! | [`error`]     | Crate-wide error enum |

pub mod error;
pub mod forward;
pub mod message;
pub mod pool;
pub mod server;
pub mod transport;

pub use error::{NetError, Result};
pub use forward::{ForwardManager, ForwardStatsSnapshot};
pub use message::{
    LinkEntry, LinkUpdateEvent, Packet, RpcRequest, RpcResponse, TopologySyncEvent,
    EVENT_LINK_UPDATE, EVENT_TOPOLOGY_SYNC,
};
pub use pool::{ClientPool, RpcClient};
pub use server::{RpcHandler, RpcServer};
