use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vouch::{AccessStore, DEFAULT_LISTEN_PATH, DEFAULT_PEER_PATH, Pid, Proxy, ProxyConfig, VouchError};

#[derive(Debug, Parser)]
#[command(name = "vouch", version, about = "Credential-mediated Unix datagram proxy")]
struct Cli {
    /// Socket path to listen on
    #[arg(long, env = "VOUCH_LISTEN", default_value = DEFAULT_LISTEN_PATH)]
    listen: PathBuf,

    /// Socket path every reply is sent to
    #[arg(long, env = "VOUCH_PEER", default_value = DEFAULT_PEER_PATH)]
    peer: PathBuf,

    /// Largest datagram payload accepted, in bytes
    #[arg(long, env = "VOUCH_MAX_PAYLOAD", default_value_t = 1024)]
    max_payload: usize,
}

#[tokio::main]
async fn main() {
    // RUST_LOG=vouch=debug for per-datagram detail.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vouch=info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!(error = %e, "proxy aborted");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), VouchError> {
    let store = Arc::new(AccessStore::new());

    // Our parent started us, so it is trusted from the outset. A ppid of 0
    // means the parent lives outside our pid namespace; whitelisting 0 would
    // trust every sender the kernel cannot map.
    let parent = Pid::try_from(nix::unistd::getppid().as_raw()).unwrap_or(0);
    if parent > 0 {
        store.authorize(parent, 0);
    } else {
        warn!("no visible parent pid; starting with an empty whitelist");
    }

    // Handlers go in before the socket appears, so a visible socket means a
    // signal will be caught.
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let config = ProxyConfig::new(cli.listen, cli.peer).with_max_payload_len(cli.max_payload);
    let proxy = Proxy::bind(config, store)?;

    info!(pid = std::process::id(), parent, "starting proxy");

    tokio::select! {
        _ = proxy.run() => {}
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }

    info!("cleaning up");
    // A signalled shutdown still exits 0 even if the socket file is stuck.
    if let Err(e) = proxy.cleanup() {
        warn!(error = %e, "failed to remove proxy socket");
    }
    Ok(())
}
