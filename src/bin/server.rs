//! packstore object server
//!
//! Serves the peer port and the localhost RPC port for every mounted device,
//! and optionally runs the auditor and replicator daemons against the RPC
//! port.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use clap::Parser;
use packstore::audit::Auditor;
use packstore::network::{DeviceService, LocalService, Router, RpcClient, Server, Surface};
use packstore::protocol::DeviceTarget;
use packstore::replicator::{Replicator, Ring, StaticRing};
use packstore::{CancelToken, Config, PackDeviceMgr};
use tracing_subscriber::{fmt, EnvFilter};

/// packstore object server
#[derive(Parser, Debug)]
#[command(name = "packstore-server")]
#[command(about = "Pack storage object server with auditor and replicator")]
#[command(version)]
struct Args {
    /// Directory holding one directory per device
    #[arg(short, long, default_value = "/srv/node")]
    devices: PathBuf,

    /// Serve devices that are not mount points
    #[arg(long)]
    no_mount_check: bool,

    /// Storage policies to serve
    #[arg(short, long, default_values_t = vec![0u32])]
    policy: Vec<u32>,

    /// Peer listen address (host:port)
    #[arg(short, long, default_value = "0.0.0.0:6200")]
    listen: String,

    /// Localhost RPC address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:6201")]
    rpc: String,

    /// Hash path prefix secret
    #[arg(long, default_value = "")]
    hash_prefix: String,

    /// Hash path suffix secret
    #[arg(long, default_value = "changeme")]
    hash_suffix: String,

    /// Maximum concurrent connections per port
    #[arg(short, long, default_value = "256")]
    max_connections: usize,

    /// Ring description (JSON); required by the replicator
    #[arg(long)]
    ring: Option<PathBuf>,

    /// IP this server is known by in the ring
    #[arg(long, default_value = "127.0.0.1")]
    ring_ip: String,

    /// Run the auditor
    #[arg(long)]
    auditor: bool,

    /// Run the replicator
    #[arg(long)]
    replicator: bool,

    /// Tombstone reclaim age in seconds
    #[arg(long, default_value = "604800")]
    reclaim_age: u64,
}

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() {
    let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    // SAFETY: the handler only stores to an atomic
    unsafe {
        libc::signal(libc::SIGINT, handler);
        libc::signal(libc::SIGTERM, handler);
    }
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,packstore=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("packstore server v{}", packstore::VERSION);
    tracing::info!("Devices root: {}", args.devices.display());

    let config = Config::builder()
        .devices_root(&args.devices)
        .mount_check(!args.no_mount_check)
        .policies(args.policy.clone())
        .hash_path(&args.hash_prefix, &args.hash_suffix)
        .listen_addr(&args.listen)
        .rpc_addr(&args.rpc)
        .max_connections(args.max_connections)
        .reclaim_age_secs(args.reclaim_age)
        .build();

    if let Err(e) = run(&args, config) {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
    tracing::info!("Server stopped");
}

fn run(args: &Args, config: Config) -> packstore::Result<()> {
    install_signal_handlers();
    let cancel = CancelToken::new();

    let mgr = Arc::new(PackDeviceMgr::open(config.clone())?);
    let monitor = mgr.spawn_monitor(Duration::from_secs(30), cancel.clone())?;
    tracing::info!(devices = mgr.devices().len(), "devices opened");

    let service = Arc::new(LocalService::new(Arc::clone(&mgr), &config, cancel.clone()));
    let peer = Server::bind(
        &config.listen_addr,
        Router::new(Arc::clone(&service), Surface::Peer),
        &config,
    )?;
    let rpc = Server::bind(
        &config.rpc_addr,
        Router::new(Arc::clone(&service), Surface::Rpc),
        &config,
    )?;
    let (peer_addr, peer_shutdown, peer_thread) = peer.spawn()?;
    let (rpc_addr, rpc_shutdown, rpc_thread) = rpc.spawn()?;

    let rpc_service: Arc<dyn DeviceService> = Arc::new(RpcClient::new(
        rpc_addr.to_string(),
        Duration::from_millis(config.replicator.node_timeout_ms),
    ));
    let mut daemons: Vec<JoinHandle<()>> = Vec::new();

    if args.auditor {
        let targets: Vec<DeviceTarget> = mgr
            .devices()
            .iter()
            .map(|d| DeviceTarget::new(d.device(), d.policy()))
            .collect();
        let auditor = Auditor::new(
            Arc::clone(&rpc_service),
            targets,
            config.auditor.clone(),
            cancel.clone(),
        );
        daemons.push(
            std::thread::Builder::new()
                .name("auditor".to_string())
                .spawn(move || auditor.run_forever())?,
        );
    }

    if args.replicator {
        let path = args.ring.as_deref().ok_or_else(|| {
            packstore::PackError::Config("--replicator needs --ring".to_string())
        })?;
        let ring: Arc<dyn Ring> = Arc::new(StaticRing::load(path)?);
        daemons.extend(spawn_replicators(
            &config,
            ring,
            &args.ring_ip,
            peer_addr,
            &rpc_service,
            &cancel,
        )?);
    }

    while !SHUTDOWN.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }
    tracing::info!("Received shutdown signal");

    cancel.cancel();
    peer_shutdown.shutdown();
    rpc_shutdown.shutdown();
    for daemon in daemons {
        let _ = daemon.join();
    }
    for server in [peer_thread, rpc_thread] {
        match server.join() {
            Ok(result) => result?,
            Err(_) => tracing::error!("server thread panicked"),
        }
    }
    let _ = monitor.join();
    mgr.close_all()
}

/// One replicator per policy, covering this server's devices in the ring
fn spawn_replicators(
    config: &Config,
    ring: Arc<dyn Ring>,
    ring_ip: &str,
    peer_addr: SocketAddr,
    service: &Arc<dyn DeviceService>,
    cancel: &CancelToken,
) -> packstore::Result<Vec<JoinHandle<()>>> {
    let local = ring.local_devices(ring_ip, peer_addr.port());
    if local.is_empty() {
        tracing::warn!(ip = ring_ip, port = peer_addr.port(), "no ring devices for this server");
    }

    let mut handles = Vec::new();
    for &policy in &config.policies {
        let replicator = Replicator::new(
            Arc::clone(service),
            Arc::clone(&ring),
            local.clone(),
            policy,
            config.replicator.clone(),
            cancel.clone(),
        );
        handles.push(
            std::thread::Builder::new()
                .name(format!("replicator-{}", policy))
                .spawn(move || replicator.run_forever())?,
        );
    }
    Ok(handles)
}
