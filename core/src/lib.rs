//! spanmesh node core: configuration, topology synchronization, and the
//! public node API.
//!
//! A [`MeshNode`] ties the whole framework together: it starts the
//! gossip membership layer, keeps the shared [`Topology`] in step with
//! cluster events, recomputes routes on every change, and serves the
//! data- and control-plane RPC surface.  Applications use it through a
//! deliberately small API:
//!
//! ```no_run
//! # async fn example() -> Result<(), spanmesh_core::CoreError> {
//! use spanmesh_core::{config::RuntimeConfig, MeshNode};
//!
//! let config = RuntimeConfig::from_flags(
//!     Default::default(),
//!     "nodeA",
//!     "127.0.0.1",
//!     5001,
//!     7001,
//!     None,
//! );
//! let node = MeshNode::start(config).await?;
//! node.send("nodeC", b"hello".to_vec()).await?;
//! node.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod node;
pub mod rpc_handler;
pub mod topology_sync;

pub use config::RuntimeConfig;
pub use error::{CoreError, Result};
pub use node::MeshNode;
pub use topology_sync::TopologySync;

pub use spanmesh_net::{ForwardStatsSnapshot, Packet};
pub use spanmesh_topology::{NodeInfo, NodeStatus, Route, Topology};
