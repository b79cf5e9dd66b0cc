//! Configuration for the gossip membership layer.

use std::collections::HashMap;

/// Configuration for one membership instance.
///
/// Controls gossip cadence, failure-detection timeouts, and user-event
/// limits.
#[derive(Debug, Clone)]
pub struct MembershipConfig {
    /// This node's cluster-wide unique name.
    pub node_name: String,

    /// Address to bind the gossip UDP socket on, `"ip:port"`.
    pub bind_addr: String,

    /// Free-form metadata attached to this member and gossiped with it
    /// (spanmesh sets `node_id`, `ip`, `port`, `role`).
    pub tags: HashMap<String, String>,

    /// Interval between gossip rounds (ms).  Every round sends the full
    /// member table to `gossip_fanout` random peers and runs the
    /// failure detector.
    pub gossip_interval_ms: u64,

    /// How many random peers receive each gossip round.
    pub gossip_fanout: usize,

    /// Silence after which an alive member becomes suspect (ms).
    pub suspect_timeout_ms: u64,

    /// Silence after which a suspect member is declared failed (ms).
    pub failed_timeout_ms: u64,

    /// How long failed/left members linger in the table before being
    /// reaped (ms).  Lingering entries stop a stale gossip from
    /// resurrecting a dead member immediately.
    pub reap_timeout_ms: u64,

    /// How long to wait for any seed to answer a join (ms).
    pub join_timeout_ms: u64,

    /// Maximum user-event payload size in bytes.  Events ride in single
    /// datagrams, so this stays a few KiB.
    pub max_user_event_bytes: usize,

    /// Maximum size of any encoded gossip datagram.
    pub max_datagram_bytes: usize,

    /// Size of the delivered-events channel buffer.
    pub event_channel_size: usize,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            node_name: String::new(),
            bind_addr: "0.0.0.0:7946".to_string(),
            tags: HashMap::new(),
            gossip_interval_ms: 1_000,
            gossip_fanout: 3,
            suspect_timeout_ms: 5_000,
            failed_timeout_ms: 15_000,
            reap_timeout_ms: 60_000,
            join_timeout_ms: 3_000,
            max_user_event_bytes: 4_096,
            max_datagram_bytes: 65_000,
            event_channel_size: 256,
        }
    }
}

impl MembershipConfig {
    /// Create a config suitable for local testing with short timeouts.
    pub fn dev_default(node_name: &str) -> Self {
        Self {
            node_name: node_name.to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            gossip_interval_ms: 100,
            suspect_timeout_ms: 500,
            failed_timeout_ms: 1_500,
            reap_timeout_ms: 5_000,
            join_timeout_ms: 1_000,
            ..Default::default()
        }
    }
}
