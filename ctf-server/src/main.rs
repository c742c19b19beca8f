//! Entry point: parses the command line, loads config, and runs the
//! single-threaded reactor loop spec.md §5 describes — one task
//! multiplexing UDP receive, the fixed-interval world tick, and timers
//! via `tokio::select!`, so there is exactly one mutable borrow of
//! `GameServer` live at a time.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tokio::net::UdpSocket;
use tracing_subscriber::EnvFilter;

use ctf_server::collaborators::NoopExtension;
use ctf_server::config::Config;
use ctf_server::reference_world::{FlatMap, NoopMasterClient, ReferenceWorldKernel, UdpTransport};
use ctf_server::GameServer;

/// Voxel CTF authoritative server core.
#[derive(Parser, Debug)]
#[command(name = "ctf-server", version, about)]
struct Args {
    /// Path to a JSON config file. Defaults are used if omitted.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Overrides the config's bind_addr.
    #[arg(long, value_name = "ADDR")]
    bind: Option<SocketAddr>,

    /// tracing filter directive, e.g. "info" or "ctf_server=debug".
    #[arg(long, default_value = "info")]
    log_filter: String,
}

fn main() -> std::io::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log_filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load(path).unwrap_or_else(|err| {
            tracing::error!(%err, path = %path.display(), "failed to load config");
            std::process::exit(1);
        }),
        None => Config::default(),
    };
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(config))
}

async fn run(config: Config) -> std::io::Result<()> {
    let bind_addr = config.bind_addr;
    let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
    tracing::info!(%bind_addr, name = %config.name, "ctf server listening");

    let update_hz = config.update_frequency_hz;
    let map = Box::new(FlatMap::default());
    let world = Box::new(ReferenceWorldKernel::new());
    let transport = Box::new(UdpTransport::new(socket.clone()));
    let master = Box::new(NoopMasterClient);
    let extension = Box::new(NoopExtension);

    let mut server = GameServer::new(config, map, world, transport, master, extension);

    let start = Instant::now();
    let mut tick_interval = tokio::time::interval(std::time::Duration::from_secs_f64(1.0 / update_hz));
    let mut last_tick = start.elapsed().as_secs_f64();
    let mut buf = [0u8; 2048];

    loop {
        tokio::select! {
            recv = socket.recv_from(&mut buf) => {
                let (len, addr) = recv?;
                let now = start.elapsed().as_secs_f64();
                server.on_datagram(addr, &buf[..len], now);
            }
            _ = tick_interval.tick() => {
                let now = start.elapsed().as_secs_f64();
                let dt = now - last_tick;
                last_tick = now;
                server.tick(dt, now);
            }
        }
    }
}
