//! `fmail-relay` — the L8 daemon: ingests messages from the peers in
//! `FMAIL_RELAY_PEERS` into this project's local store, so agents watching
//! locally see mail posted on other hosts without connecting out themselves.

use fmail::config::Config;
use fmail::hub::Hub;
use fmail::project_id::derive_project_id;
use fmail::store::Store;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log.filter.clone())),
        )
        .init();

    if config.relay.peers.is_empty() {
        warn!("FMAIL_RELAY_PEERS is empty; fmail-relay has nothing to do");
    }

    let store = Store::new(&config.server.root);
    store.ensure_root()?;
    let project_id = derive_project_id(&config.server.root);
    store.ensure_project(&project_id)?;
    let hub = Hub::with_presence_interval(store, config.presence.interval);

    info!(project_id = %project_id, peers = config.relay.peers.len(), "fmail-relay starting");

    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();
    for peer in &config.relay.peers {
        let hub = hub.clone();
        let project_id = project_id.clone();
        let cancel = cancel.clone();
        let peer = *peer;
        tasks.push(tokio::spawn(async move {
            fmail::relay::run(hub, project_id, peer, cancel).await;
        }));
    }

    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal");
    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }

    info!("fmail-relay stopped");
    Ok(())
}
