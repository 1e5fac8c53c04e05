//! Startup (spec §4.I): installs a tracing subscriber, loads
//! configuration from the environment, constructs the gateway client and
//! management API client, and runs the Stasis Dispatcher until SIGINT or
//! the gateway connection is lost.
//!
//! Ground: `original_source/main.go`'s top-level `main()` and
//! `createARIConnection`; the `ARI_USE_PROXY`-gated message-bus proxy
//! path is not implemented here (see `gateway::ari` module docs) — only
//! direct ARI connections are supported by this crate's startup path.

use std::sync::Arc;

use lineblocs_call_engine::cache::InMemoryConferenceCache;
use lineblocs_call_engine::config::EngineConfig;
use lineblocs_call_engine::dispatcher::Dispatcher;
use lineblocs_call_engine::error::{EngineError, Result};
use lineblocs_call_engine::gateway::AriGatewayClient;
use lineblocs_call_engine::api_client::ApiClient;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = run().await {
        tracing::error!("fatal startup error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = Arc::new(EngineConfig::from_env()?);
    tracing::info!(ari_url = %config.ari_url(), "connecting to ARI server");

    if config.ari_use_proxy {
        return Err(EngineError::configuration(
            "ARI_USE_PROXY=true requires the message-bus proxy connection, which this build does not implement",
        ));
    }

    let gateway = Arc::new(
        AriGatewayClient::connect(
            config.ari_url(),
            config.ws_url(),
            config.ari_username.clone(),
            config.ari_password.clone(),
            config.application.clone(),
        )
        .await?,
    );
    tracing::info!("connected to ARI");

    let api = Arc::new(ApiClient::new(config.management_api_base.clone()));
    let conference_cache = Arc::new(InMemoryConferenceCache::new());

    let dispatcher = Dispatcher::new(gateway, api, conference_cache, config);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received SIGINT, shutting down");
            let _ = shutdown_tx.send(());
        }
    });

    tracing::info!("starting listener app");
    dispatcher.run(shutdown_rx).await
}
