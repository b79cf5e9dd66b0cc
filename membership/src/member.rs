//! Member state, merge rules, and the gossip wire messages.
//!
//! Every member carries an `incarnation` bumped by its owner on each
//! (re)start.  When two views of the same member meet, the higher
//! incarnation wins outright; at equal incarnations the *worse* status
//! wins, so a failure verdict cannot be shadowed by an older alive
//! announcement still circulating.

use {
    serde::{Deserialize, Serialize},
    std::{collections::HashMap, net::SocketAddr},
};

/// Membership status of a node, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MemberStatus {
    Alive,
    Suspect,
    Failed,
    Left,
}

/// The gossiped view of one cluster member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    /// Cluster-wide unique name.
    pub name: String,
    /// Gossip UDP address the member is reachable on.
    pub addr: SocketAddr,
    /// Free-form metadata (spanmesh: `node_id`, `ip`, `port`, `role`).
    pub tags: HashMap<String, String>,
    /// Liveness verdict.
    pub status: MemberStatus,
    /// Restart counter; higher incarnations supersede lower ones.
    pub incarnation: u64,
}

impl Member {
    /// Merge an incoming view into this one.
    ///
    /// Returns `true` when the local record changed.
    pub fn merge(&mut self, incoming: &Member) -> bool {
        if incoming.incarnation > self.incarnation {
            *self = incoming.clone();
            return true;
        }
        if incoming.incarnation == self.incarnation && incoming.status > self.status {
            self.status = incoming.status;
            return true;
        }
        false
    }
}

// ── Wire messages ───────────────────────────────────────────────────────────

/// A user-defined event disseminated to the whole cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserEventFrame {
    /// Name of the emitting member.
    pub origin: String,
    /// Per-origin monotonically increasing sequence number.
    pub seq: u64,
    /// Event name (e.g. `link-update`).
    pub name: String,
    /// Opaque payload, size-limited at emission.
    pub payload: Vec<u8>,
    /// Receiver-side hint: older events with the same origin and name
    /// may be dropped in favour of newer ones.
    pub coalesce: bool,
}

/// Top-level gossip datagram.
///
/// Every UDP datagram on the membership port is a bincode encoding of
/// exactly one of these variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GossipMessage {
    /// First contact from a joining node.
    Join(Member),
    /// Seed's answer to a join: a snapshot of its member table.
    JoinAck {
        /// All members the seed currently knows, itself included.
        members: Vec<Member>,
    },
    /// Periodic anti-entropy exchange.
    Sync {
        /// Name of the sender (refreshes its liveness).
        from: String,
        /// The sender's full member table.
        members: Vec<Member>,
    },
    /// Graceful departure announcement.
    Leave {
        /// Name of the departing member.
        name: String,
    },
    /// A disseminated user event.
    UserEvent(UserEventFrame),
}

impl GossipMessage {
    /// Serialize this message to datagram bytes.
    pub fn serialize(&self) -> crate::error::Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize a datagram.
    pub fn deserialize(data: &[u8]) -> crate::error::Result<Self> {
        Ok(bincode::deserialize(data)?)
    }

    /// Human-readable tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::JoinAck { .. } => "join_ack",
            Self::Sync { .. } => "sync",
            Self::Leave { .. } => "leave",
            Self::UserEvent(_) => "user_event",
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn member(name: &str, status: MemberStatus, incarnation: u64) -> Member {
        Member {
            name: name.to_string(),
            addr: "127.0.0.1:7946".parse().unwrap(),
            tags: HashMap::new(),
            status,
            incarnation,
        }
    }

    #[test]
    fn test_higher_incarnation_wins() {
        let mut local = member("a", MemberStatus::Failed, 1);
        let incoming = member("a", MemberStatus::Alive, 2);
        assert!(local.merge(&incoming));
        assert_eq!(local.status, MemberStatus::Alive);
        assert_eq!(local.incarnation, 2);
    }

    #[test]
    fn test_equal_incarnation_worse_status_wins() {
        let mut local = member("a", MemberStatus::Alive, 3);
        assert!(local.merge(&member("a", MemberStatus::Failed, 3)));
        assert_eq!(local.status, MemberStatus::Failed);

        // ...and the reverse direction is a no-op.
        let mut failed = member("a", MemberStatus::Failed, 3);
        assert!(!failed.merge(&member("a", MemberStatus::Alive, 3)));
        assert_eq!(failed.status, MemberStatus::Failed);
    }

    #[test]
    fn test_stale_incarnation_ignored() {
        let mut local = member("a", MemberStatus::Alive, 5);
        assert!(!local.merge(&member("a", MemberStatus::Left, 4)));
        assert_eq!(local.status, MemberStatus::Alive);
    }

    #[test]
    fn test_datagram_roundtrip() {
        let msg = GossipMessage::Sync {
            from: "a".to_string(),
            members: vec![member("a", MemberStatus::Alive, 1)],
        };
        let bytes = msg.serialize().unwrap();
        let decoded = GossipMessage::deserialize(&bytes).unwrap();
        assert_eq!(msg, decoded);
        assert_eq!(decoded.kind(), "sync");
    }

    #[test]
    fn test_status_ordering() {
        assert!(MemberStatus::Alive < MemberStatus::Suspect);
        assert!(MemberStatus::Suspect < MemberStatus::Failed);
        assert!(MemberStatus::Failed < MemberStatus::Left);
    }
}
