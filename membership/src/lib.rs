//! Gossip-based cluster membership for spanmesh.
//!
//! Nodes announce themselves over UDP, keep each other alive through
//! periodic anti-entropy state exchange, and detect failures by
//! silence.  On top of the member table the crate offers a best-effort
//! user-event channel: small named payloads fanned out to every known
//! member, which the topology layer uses for link updates and full
//! topology syncs.
//!
//! The protocol is deliberately small: incarnation-versioned member
//! states, a random-fanout sync every tick, and timeout-driven
//! suspect/failed transitions.  It favours convergence over precision:
//! duplicate or stale datagrams are harmless, ordering across event
//! types is not guaranteed, and user-event delivery is at-least-once.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`]  | `MembershipConfig` defaults and dev overrides |
//! | [`member`]  | Member state, status merge rules, wire messages |
//! | [`cluster`] | The gossip engine: socket loops, liveness, events |
//! | [`error`]   | Crate-wide error enum |

pub mod cluster;
pub mod config;
pub mod error;
pub mod member;

pub use cluster::{MemberEvent, Membership, UserEvent};
pub use config::MembershipConfig;
pub use error::{MembershipError, Result};
pub use member::{Member, MemberStatus};
