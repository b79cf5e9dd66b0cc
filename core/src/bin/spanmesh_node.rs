//! The spanmesh node daemon.
//!
//! Two ways to configure it:
//!
//! - `spanmesh-node --node a --cluster-config configs/cluster.toml`
//!   picks node `a`'s entry (and its edges) from a deployment file;
//! - `spanmesh-node --id nodeA --ip 127.0.0.1 --port 5001
//!   --gossip-port 7001 --join 127.0.0.1:7002` configures everything on
//!   the command line.

use {
    clap::Parser,
    log::{error, info},
    spanmesh_core::{
        config::{AppConfig, RuntimeConfig},
        MeshNode,
    },
};

#[derive(Parser)]
#[command(name = "spanmesh-node")]
#[command(about = "spanmesh routing node", version)]
struct Cli {
    /// App config file (log and sync settings).
    #[arg(long, default_value = "configs/app.toml")]
    config: String,

    /// Cluster deployment file (nodes and edges).
    #[arg(long, default_value = "configs/cluster.toml")]
    cluster_config: String,

    /// Node name to load from the cluster file.  When set, the flags
    /// below are ignored.
    #[arg(long, default_value = "")]
    node: String,

    /// Node id (defaults to node-<port>).
    #[arg(long, default_value = "")]
    id: String,

    /// Bind IP.
    #[arg(long, default_value = "127.0.0.1")]
    ip: String,

    /// Data-plane RPC port.
    #[arg(long, default_value_t = 5001)]
    port: u16,

    /// Gossip membership port.
    #[arg(long, default_value_t = 7946)]
    gossip_port: u16,

    /// Gossip address of a node to join (ip:port).
    #[arg(long)]
    join: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = if cli.node.is_empty() {
        let app = match AppConfig::load_or_default(&cli.config) {
            Ok(app) => app,
            Err(err) => {
                eprintln!("warning: {err}, using defaults");
                AppConfig::default()
            }
        };
        RuntimeConfig::from_flags(app, &cli.id, &cli.ip, cli.port, cli.gossip_port, cli.join)
    } else {
        match RuntimeConfig::from_cluster_file(&cli.config, &cli.cluster_config, &cli.node) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("error: {err}");
                std::process::exit(1);
            }
        }
    };

    if let Err(err) = config.setup_logger() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }

    let node = match MeshNode::start(config).await {
        Ok(node) => node,
        Err(err) => {
            error!("failed to start node: {err}");
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    };
    node.spawn_topology_dump();
    info!(
        "[{}] up: rpc={} gossip={}",
        node.node_id(),
        node.rpc_addr(),
        node.gossip_addr()
    );

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("signal handler failed: {err}");
    }
    node.shutdown().await;
}
