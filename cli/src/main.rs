//! spanmesh-ctl: the operator's control tool.
//!
//! Talks the control plane of any reachable node: liveness pings,
//! packet injection, link registration, and toggling the periodic
//! topology sync.  Exits non-zero on any unsuccessful response so the
//! tool composes in scripts.

use {
    clap::{Parser, Subcommand},
    spanmesh_net::{Packet, RpcClient, RpcRequest, RpcResponse},
    std::{process::ExitCode, time::Duration},
};

/// Deadline for every control call.
const CONTROL_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "spanmesh-ctl")]
#[command(about = "Control a running spanmesh node", version)]
struct Cli {
    /// Control address of the node to talk to (ip:port).
    #[arg(long, default_value = "127.0.0.1:5001")]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Liveness check against the control plane.
    Ping,

    /// Inject a packet, originated at --source-addr.
    SendPacket {
        /// RPC address of the node the packet should originate from.
        #[arg(long)]
        source_addr: String,
        /// Source node id recorded in the packet.
        #[arg(long)]
        source: String,
        /// Destination node id.
        #[arg(long)]
        dest: String,
        /// Payload text.
        #[arg(long, default_value = "hello")]
        payload: String,
        /// Packet id (assigned by the node when empty).
        #[arg(long, default_value = "")]
        packet_id: String,
    },

    /// Register a link from the target node to a neighbor.
    AddLink {
        /// Neighbor node id.
        #[arg(long)]
        neighbor: String,
        /// Neighbor RPC address (ip:port).
        #[arg(long)]
        neighbor_addr: String,
        /// Link cost; 0 lets the node probe for one.
        #[arg(long, default_value_t = 0.0)]
        cost: f64,
        /// Probe even when an explicit cost is given.
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        auto_probe: bool,
    },

    /// Enable or disable the periodic topology broadcast.
    EnableSync {
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        enabled: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let mut client = match RpcClient::connect(&cli.server).await {
        Ok(client) => client,
        Err(err) => {
            eprintln!("cannot reach {}: {err}", cli.server);
            return ExitCode::FAILURE;
        }
    };

    let request = match &cli.command {
        Command::Ping => RpcRequest::ControlPing { msg: "ping".into() },
        Command::SendPacket {
            source_addr,
            source,
            dest,
            payload,
            packet_id,
        } => RpcRequest::SendPacket {
            source_address: source_addr.clone(),
            packet: Packet {
                source: source.clone(),
                destination: dest.clone(),
                packet_id: packet_id.clone(),
                payload: payload.clone().into_bytes(),
                next_hop: String::new(),
                // The node at source_addr appends itself on receipt.
                visited_nodes: Vec::new(),
            },
        },
        Command::AddLink {
            neighbor,
            neighbor_addr,
            cost,
            auto_probe,
        } => RpcRequest::AddLink {
            neighbor: neighbor.clone(),
            neighbor_address: neighbor_addr.clone(),
            cost: *cost,
            auto_probe: *auto_probe,
        },
        Command::EnableSync { enabled } => RpcRequest::EnableSync { enabled: *enabled },
    };

    let response = match client.call(&request, CONTROL_DEADLINE).await {
        Ok(response) => response,
        Err(err) => {
            eprintln!("rpc failed: {err}");
            return ExitCode::FAILURE;
        }
    };

    match response {
        RpcResponse::Pong { msg } => {
            println!("{msg}");
            ExitCode::SUCCESS
        }
        RpcResponse::SendPacket {
            success,
            message,
            packet_id,
        } => {
            println!("packet {packet_id}: {message}");
            exit_for(success)
        }
        RpcResponse::AddLink {
            success,
            message,
            cost,
        } => {
            println!("{message} (cost {cost:.2})");
            exit_for(success)
        }
        RpcResponse::EnableSync {
            success,
            message,
            enabled,
        } => {
            println!("{message} (enabled: {enabled})");
            exit_for(success)
        }
        other => {
            eprintln!("unexpected response: {other:?}");
            ExitCode::FAILURE
        }
    }
}

fn exit_for(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
