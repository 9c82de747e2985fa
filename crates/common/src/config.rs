//! Gateway configuration: TOML file + environment variable overrides,
//! validated at load time (fail fast, checked via a `ValidateConfig`
//! CLI path).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub ring_buffer: RingBufferConfig,
    pub heartbeat: HeartbeatConfig,
    pub hub: HubConfig,
    pub batcher: BatcherConfig,
    pub event_log: EventLogConfig,
    pub reservations: ReservationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Capacities are looked up by `Channel::capacity_prefix` with `default`
/// as a fallback for any prefix not explicitly listed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingBufferConfig {
    pub default: usize,
    pub overrides: HashMap<String, usize>,
}

impl RingBufferConfig {
    pub fn capacity_for(&self, prefix: &str) -> usize {
        self.overrides.get(prefix).copied().unwrap_or(self.default)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    pub interval_ms: u64,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    pub max_concurrent_replays_per_connection: usize,
    pub max_pending_acks_per_connection: usize,
    pub replay_throttle_resume_after_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatcherConfig {
    pub batch_window_ms: u64,
    pub max_events_per_batch: usize,
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogConfig {
    pub enabled: bool,
    pub database_url: Option<String>,
    pub retention_hours: u64,
    pub max_rows: u64,
    pub max_delete_per_run: u64,
    pub delete_batch_size: u64,
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationConfig {
    pub default_ttl_secs: u64,
    pub expiry_sweep_interval_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig { host: "0.0.0.0".to_string(), port: 8080 },
            ring_buffer: RingBufferConfig {
                default: 200,
                overrides: HashMap::from([
                    ("agent:output".to_string(), 2000),
                    ("system:health".to_string(), 16),
                    ("system:maintenance".to_string(), 16),
                ]),
            },
            heartbeat: HeartbeatConfig { interval_ms: 30_000, timeout_ms: 75_000 },
            hub: HubConfig {
                max_concurrent_replays_per_connection: 2,
                max_pending_acks_per_connection: 1000,
                replay_throttle_resume_after_ms: 1000,
            },
            batcher: BatcherConfig { batch_window_ms: 100, max_events_per_batch: 50, debounce_ms: 50 },
            event_log: EventLogConfig {
                enabled: true,
                database_url: None,
                retention_hours: 24,
                max_rows: 200_000,
                max_delete_per_run: 5_000,
                delete_batch_size: 500,
                cleanup_interval_secs: 60,
            },
            reservations: ReservationConfig { default_ttl_secs: 3600, expiry_sweep_interval_secs: 60 },
        }
    }
}

impl GatewayConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_string(), e.to_string()))?;
        let mut config: GatewayConfig = toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Overlays the closed set of recognized environment variables,
    /// all positive integers or `"true"`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WS_EVENT_LOG_ENABLED") {
            self.event_log.enabled = v.eq_ignore_ascii_case("true");
        }
        if let Some(v) = parse_env_u64("WS_EVENT_LOG_RETENTION_HOURS") {
            self.event_log.retention_hours = v;
        }
        if let Some(v) = parse_env_u64("WS_EVENT_LOG_MAX_ROWS") {
            self.event_log.max_rows = v;
        }
        if let Some(v) = parse_env_u64("WS_EVENT_LOG_MAX_DELETE_PER_RUN") {
            self.event_log.max_delete_per_run = v;
        }
        if let Some(v) = parse_env_u64("WS_EVENT_LOG_DELETE_BATCH_SIZE") {
            self.event_log.delete_batch_size = v;
        }
        if let Ok(v) = std::env::var("GATEWAY_HOST") {
            self.server.host = v;
        }
        if let Some(v) = parse_env_u64("GATEWAY_PORT") {
            self.server.port = v as u16;
        }
        if let Ok(v) = std::env::var("DATABASE_URL") {
            self.event_log.database_url = Some(v);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ring_buffer.default == 0 {
            return Err(ConfigError::Validation("ring_buffer.default must be > 0".to_string()));
        }
        if self.heartbeat.timeout_ms <= self.heartbeat.interval_ms {
            return Err(ConfigError::Validation(
                "heartbeat.timeout_ms must exceed heartbeat.interval_ms".to_string(),
            ));
        }
        if self.hub.max_concurrent_replays_per_connection == 0 {
            return Err(ConfigError::Validation(
                "hub.max_concurrent_replays_per_connection must be > 0".to_string(),
            ));
        }
        if self.event_log.enabled && self.event_log.database_url.is_none() {
            return Err(ConfigError::Validation(
                "event_log.enabled requires a database_url (config or DATABASE_URL)".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
