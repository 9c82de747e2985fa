//! Gateway binary entry point.
//!
//! Loads configuration, wires the durable event log, hub, and
//! reservation engine together, and starts the HTTP/WebSocket server.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use gateway_common::{Channel, GatewayConfig, MessageType, NoAgentAccess};
use gateway_hub::{DurableEventLog, Hub, NullEventLog, PostgresEventLog};
use gateway_reservations::{ReservationEngine, ReservationEventPublisher};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "gateway-server")]
#[command(version = "0.1.0")]
#[command(about = "Real-time orchestration gateway: WebSocket delivery fabric for a fleet of coding agents")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.dev.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "RUST_LOG")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Server {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Validate configuration and exit
    ValidateConfig,
}

/// Forwards reservation/conflict events onto the hub's `workspace:*`
/// channels so REST-initiated reservation changes reach WebSocket
/// subscribers through the same fan-out path as everything else.
struct HubReservationPublisher {
    hub: Arc<Hub>,
}

#[async_trait]
impl ReservationEventPublisher for HubReservationPublisher {
    async fn publish(&self, channel: &str, message_type: MessageType, payload: serde_json::Value) {
        match Channel::parse(channel) {
            Ok(channel) => {
                self.hub.publish(&channel, message_type, payload, None).await;
            }
            Err(e) => warn!(channel, error = %e, "reservation engine published to an unparseable channel"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = cli.log_level.as_deref().unwrap_or("info");
    gateway_common::tracing_setup::init_tracing_with_level(log_level)?;

    info!("gateway server v{} starting", gateway_common::VERSION);

    let config = GatewayConfig::load(&cli.config).map_err(|e| {
        error!("failed to load configuration: {}", e);
        e
    })?;
    info!("configuration loaded from {}", cli.config);

    match cli.command {
        Some(Commands::ValidateConfig) => {
            println!("configuration is valid");
            println!("  ring buffer default capacity: {}", config.ring_buffer.default);
            println!("  event log enabled: {}", config.event_log.enabled);
            Ok(())
        }
        Some(Commands::Server { host, port }) => {
            let mut config = config;
            if let Some(h) = host {
                config.server.host = h;
            }
            if let Some(p) = port {
                config.server.port = p;
            }
            start_server(config).await
        }
        None => start_server(config).await,
    }
}

async fn start_server(config: GatewayConfig) -> Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("starting gateway server on {}", addr);

    let event_log: Arc<dyn DurableEventLog> = if config.event_log.enabled {
        let log = PostgresEventLog::connect(config.event_log.clone()).await?;
        log.run_migrations().await?;
        let log = Arc::new(log);
        gateway_hub::event_log::spawn_cleanup_task(log.clone(), config.event_log.cleanup_interval_secs);
        log
    } else {
        Arc::new(NullEventLog)
    };

    let heartbeat_interval = Duration::from_millis(config.heartbeat.interval_ms);
    let heartbeat_timeout = Duration::from_millis(config.heartbeat.timeout_ms);
    let reservation_ttl = config.reservations.default_ttl_secs;
    let reservation_sweep_interval = config.reservations.expiry_sweep_interval_secs;

    let hub = Arc::new(Hub::new(config, event_log, Arc::new(NoAgentAccess)));
    let publisher = Arc::new(HubReservationPublisher { hub: Arc::clone(&hub) });
    let reservations = Arc::new(ReservationEngine::new(publisher, reservation_ttl));
    gateway_reservations::spawn_expiry_sweep_task(Arc::clone(&reservations), reservation_sweep_interval);

    let server = gateway_api::GatewayServer::new(hub, reservations, heartbeat_interval, heartbeat_timeout);
    server.run(&addr).await
}
