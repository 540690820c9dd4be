//! packstore CLI
//!
//! Operator commands against a packstore object server: the RPC port for
//! device operations, the peer port for objects and suffix digests.

use std::io::Write;
use std::time::Duration;

use clap::{Parser, Subcommand};
use packstore::audit::AuditQuota;
use packstore::network::{DeviceService, PeerClient, RpcClient};
use packstore::protocol::{DeviceTarget, HashesRequest};
use packstore::replicator::Node;
use packstore::{CancelToken, Result};

/// packstore CLI
#[derive(Parser, Debug)]
#[command(name = "packstore-cli")]
#[command(about = "CLI for the packstore object server")]
struct Args {
    /// Localhost RPC address
    #[arg(short, long, default_value = "127.0.0.1:6201")]
    rpc: String,

    /// Peer address, for object commands
    #[arg(long, default_value = "127.0.0.1:6200")]
    peer: String,

    /// Device name
    #[arg(short, long, default_value = "sda")]
    device: String,

    /// Storage policy index
    #[arg(short, long, default_value = "0")]
    policy: u32,

    /// Per-call timeout in milliseconds
    #[arg(long, default_value = "10000")]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ping the server
    Ping,

    /// List the partitions of the device
    Partitions,

    /// List the suffixes of a partition
    Suffixes { partition: u32 },

    /// Show the suffix digests of a partition
    Hashes {
        partition: u32,

        /// Relist every suffix
        #[arg(long)]
        list_dir: bool,

        /// Suffixes to recompute
        #[arg(long)]
        recalculate: Vec<String>,

        /// Tombstone reclaim age in seconds
        #[arg(long, default_value = "604800")]
        reclaim_age: u64,
    },

    /// Audit a partition
    Audit {
        partition: u32,

        #[arg(long, default_value = "20")]
        files_per_second: f64,

        #[arg(long, default_value = "10485760")]
        bytes_per_second: f64,
    },

    /// Remove a handoff partition
    DeleteHandoff { partition: u32 },

    /// Write an object's data to stdout (metadata goes to stderr)
    Get { partition: u32, hash: String },
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let timeout = Duration::from_millis(args.timeout_ms);
    let rpc = RpcClient::new(args.rpc.clone(), timeout);
    let target = DeviceTarget::new(args.device.clone(), args.policy);

    match args.command {
        Commands::Ping => {
            rpc.ping()?;
            println!("PONG");
        }
        Commands::Partitions => {
            for partition in rpc.list_partitions(&target)? {
                println!("{}", partition);
            }
        }
        Commands::Suffixes { partition } => {
            for suffix in rpc.list_partition_suffixes(&target, partition)? {
                println!("{}", suffix);
            }
        }
        Commands::Hashes {
            partition,
            list_dir,
            recalculate,
            reclaim_age,
        } => {
            let request = HashesRequest {
                reclaim_age_secs: reclaim_age,
                list_dir,
                recalculate,
            };
            let result = rpc.get_hashes(&target, partition, &request)?;
            println!("hashed: {}", result.hashed);
            for (suffix, digest) in result.hashes {
                println!("{} {}", suffix, digest);
            }
        }
        Commands::Audit {
            partition,
            files_per_second,
            bytes_per_second,
        } => {
            let quota = AuditQuota {
                files_per_second,
                bytes_per_second,
            };
            let stats = rpc.audit_partition(&target, partition, quota)?;
            println!("{:?}", stats);
        }
        Commands::DeleteHandoff { partition } => {
            rpc.delete_handoff(&target, partition)?;
            println!("OK");
        }
        Commands::Get { partition, hash } => {
            let node = peer_node(&args.peer, &args.device)?;
            let mut client = PeerClient::connect(&node, timeout)?;
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            let meta = client.get_object(&target, partition, &hash, &mut out, &CancelToken::new())?;
            out.flush()?;
            eprintln!("{} {} {} bytes", meta.name, meta.timestamp, meta.data_size);
        }
    }
    Ok(())
}

fn peer_node(addr: &str, device: &str) -> Result<Node> {
    let (ip, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| packstore::PackError::Config(format!("bad peer address {}", addr)))?;
    let port = port
        .parse()
        .map_err(|_| packstore::PackError::Config(format!("bad peer port in {}", addr)))?;
    Ok(Node {
        id: 0,
        ip: ip.to_string(),
        port,
        device: device.to_string(),
    })
}
