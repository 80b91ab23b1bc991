//! Orchard Agent - node agent for the Orchard fleet
//!
//! Runs on every node and:
//! - Serves the node API (devices, sensors, config, logs) under `/<node>/api/v1`
//! - Drives simulated LEDs, PWM channels and buttons, including auto-off timers
//! - Samples sensors on a configurable interval
//! - Pushes heartbeats to the coordinator

mod config;
mod devices;
mod heartbeat;
mod http;
mod logging;
mod sensors;
mod settings;
mod state;
mod system;

use anyhow::{Context, Result};
use config::AgentConfig;
use devices::DeviceManager;
use heartbeat::HeartbeatSender;
use http::AgentState;
use sensors::{SensorSampler, SensorStore};
use std::sync::Arc;
use tracing::info;

/// Main agent state
struct Agent {
    config: AgentConfig,
    state: AgentState,
}

impl Agent {
    /// Load configuration, install logging and build the device set
    async fn new() -> Result<Self> {
        let config = AgentConfig::load().await.context("Failed to load agent config")?;
        let logs = logging::init_logging(config.settings.debug_mode, config.log_file.as_deref())?;

        info!("Initializing Orchard Agent v{}", env!("CARGO_PKG_VERSION"));

        let ip = system::resolve_node_ip(config.advertise_ip.as_deref());
        let settings = state::new_state(config.settings.clone());
        let devices = DeviceManager::new(&config.devices, settings.clone());

        info!(
            "Agent initialized - Node: {}, IP: {}, Devices: {:?}",
            config.node_name,
            ip,
            devices.names()
        );

        let state = AgentState {
            identity: config.node_name.clone(),
            ip,
            devices,
            sensors: SensorStore::new(),
            settings,
            logs: Arc::new(logs),
            last_heartbeat: state::new_state(None),
        };

        Ok(Agent { config, state })
    }

    /// Start background loops, then serve until the listener fails
    async fn run(self) -> Result<()> {
        let sampler = SensorSampler::new(self.state.devices.clone(), self.state.sensors.clone());
        sampler.spawn(self.state.settings.clone());

        let heartbeats = HeartbeatSender::new(
            self.config.heartbeat_url(),
            self.state.identity.clone(),
            system::advertised_address(&self.state.ip, &self.config.listen),
            self.state.devices.clone(),
            self.state.sensors.clone(),
            self.state.last_heartbeat.clone(),
        );
        heartbeats.spawn(self.state.settings.clone());

        let listener = tokio::net::TcpListener::bind(&self.config.listen)
            .await
            .with_context(|| format!("Failed to bind {}", self.config.listen))?;
        info!(
            "Node API listening on http://{}/{}/api/v1",
            self.config.listen, self.state.identity
        );

        axum::serve(listener, http::build_router(self.state))
            .await
            .context("Node API server failed")?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let agent = Agent::new().await.context("Failed to create agent")?;
    agent.run().await.context("Agent execution failed")?;
    Ok(())
}
