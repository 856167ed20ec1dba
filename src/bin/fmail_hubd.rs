//! `fmail-hubd` — the L7 daemon: accepts the Unix socket and (optionally)
//! the TCP listener for a single project root, relays from configured
//! peers, and tracks presence.

use fmail::config::Config;
use fmail::resolver::StaticResolver;
use fmail::Server;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log.filter.clone())),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        root = %config.server.root.display(),
        "fmail-hubd starting"
    );

    let resolver = Arc::new(StaticResolver::new(config.server.root.clone()));
    info!(project_id = resolver.id(), "project identified");

    let cancel = CancellationToken::new();
    let server = Server::with_presence_interval(resolver, cancel.clone(), config.presence.interval);

    let store = fmail::Store::new(&config.server.root);
    store.ensure_root()?;

    let unix_path = store.socket_path();
    let unix_task = tokio::spawn(server.clone().run_unix(unix_path));

    let tcp_task = config.server.tcp_addr.map(|addr| tokio::spawn(server.clone().run_tcp(addr)));

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("received shutdown signal");
        cancel.cancel();
    };

    tokio::select! {
        _ = shutdown => {}
        result = unix_task => {
            if let Err(e) = result {
                error!(error = %e, "unix acceptor task panicked");
            }
        }
    }

    if let Some(tcp_task) = tcp_task {
        tcp_task.abort();
    }

    info!("fmail-hubd stopped");
    Ok(())
}
