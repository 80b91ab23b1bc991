/**
 * ORCHARD COORDINATOR - Entry point of the fleet coordinator
 *
 * ROLE: load config, build the in-memory registry and the command relay,
 * serve the HTTP surface node agents and operators talk to.
 *
 * Nothing is persisted: a restart starts with an empty registry that
 * fills again as heartbeats arrive.
 */

mod config;
mod health;
mod http;
mod liveness;
mod models;
mod registry;
mod relay;

use crate::config::load_config;
use crate::http::AppState;
use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env optionnel
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = load_config().await;
    info!(
        relay_timeout_secs = cfg.relay_timeout_secs,
        node_port = cfg.node_port,
        stale_after_secs = cfg.stale_after_secs,
        "🍎 coordinator starting"
    );

    let listen = cfg.listen.clone();
    let app = http::build_router(AppState::new(cfg));

    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    info!("listening on http://{listen}");
    axum::serve(listener, app).await.context("http server stopped")?;
    Ok(())
}
