//! Wire types: the data packet, the RPC request/response enums, and the
//! JSON payloads of the two gossip user events.
//!
//! RPC frames are bincode; the gossip event payloads are UTF-8 JSON
//! because they cross the membership layer as opaque user events whose
//! shape other tooling also reads.

use serde::{Deserialize, Serialize};

/// Gossip user-event name for single-link updates.
pub const EVENT_LINK_UPDATE: &str = "link-update";
/// Gossip user-event name for full topology syncs.
pub const EVENT_TOPOLOGY_SYNC: &str = "topology-sync";

// ── Data packet ─────────────────────────────────────────────────────────────

/// A routed data packet.
///
/// `visited_nodes` is appended to at every hop, origination included;
/// it is recorded for tracing only and never acted on.  `next_hop` is
/// overwritten by each forwarder before the packet goes back on the
/// wire.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Packet {
    pub source: String,
    pub destination: String,
    pub packet_id: String,
    pub payload: Vec<u8>,
    pub next_hop: String,
    pub visited_nodes: Vec<String>,
}

// ── Gossip event payloads (JSON) ────────────────────────────────────────────

/// Payload of a `link-update` user event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkUpdateEvent {
    pub from: String,
    pub to: String,
    /// Ignored when `op == "remove"`.
    pub cost: f64,
    /// One of `"add"`, `"update"`, `"remove"`.
    pub op: String,
}

/// One deduplicated edge in a topology sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkEntry {
    pub from: String,
    pub to: String,
    pub cost: f64,
}

/// Payload of a `topology-sync` user event: the sender's full edge set,
/// each unordered pair listed once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologySyncEvent {
    pub node_id: String,
    pub links: Vec<LinkEntry>,
}

// ── RPC frames ──────────────────────────────────────────────────────────────

/// Top-level RPC request.
///
/// The first three variants form the peer-to-peer data plane; the rest
/// are the operator control plane.  Both planes share the node's single
/// listener, as every variant is self-describing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RpcRequest {
    /// Data-plane liveness check.
    Ping {
        msg: String,
    },
    /// Hand a packet to the receiving node's forwarder.
    ForwardPacket(Packet),
    /// Measure (or, in debug mode, synthesize) link quality.
    ProbeLinkQuality {
        source: String,
        target: String,
        /// When set, the responder returns synthetic RTT/cost values.
        self_debug: bool,
    },
    /// Control-plane liveness check.
    ControlPing {
        msg: String,
    },
    /// Inject a packet as if originated by the node at `source_address`.
    SendPacket {
        source_address: String,
        packet: Packet,
    },
    /// Register a link from the receiving node to `neighbor`.
    AddLink {
        neighbor: String,
        neighbor_address: String,
        cost: f64,
        auto_probe: bool,
    },
    /// Toggle periodic topology broadcasting.
    EnableSync {
        enabled: bool,
    },
}

/// Top-level RPC response; one per request, same stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RpcResponse {
    Pong {
        msg: String,
    },
    Forward {
        success: bool,
        message: String,
    },
    Probe {
        success: bool,
        message: String,
        rtt_ms: i64,
        cost: f64,
    },
    SendPacket {
        success: bool,
        message: String,
        packet_id: String,
    },
    AddLink {
        success: bool,
        message: String,
        cost: f64,
    },
    EnableSync {
        success: bool,
        message: String,
        enabled: bool,
    },
}

impl RpcRequest {
    /// Human-readable tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ping { .. } => "ping",
            Self::ForwardPacket(_) => "forward_packet",
            Self::ProbeLinkQuality { .. } => "probe_link_quality",
            Self::ControlPing { .. } => "control_ping",
            Self::SendPacket { .. } => "send_packet",
            Self::AddLink { .. } => "add_link",
            Self::EnableSync { .. } => "enable_sync",
        }
    }
}

impl RpcResponse {
    /// Human-readable tag for logging and mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Pong { .. } => "pong",
            Self::Forward { .. } => "forward",
            Self::Probe { .. } => "probe",
            Self::SendPacket { .. } => "send_packet",
            Self::AddLink { .. } => "add_link",
            Self::EnableSync { .. } => "enable_sync",
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
