use gateway_common::config::GatewayConfig;
use std::io::Write;

#[test]
fn config_load_applies_env_and_validates() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let toml = toml::to_string(&GatewayConfig::default()).unwrap();
    write!(file, "{toml}").unwrap();

    std::env::set_var("WS_EVENT_LOG_ENABLED", "true");
    std::env::set_var("DATABASE_URL", "postgres://localhost/gw_test");
    std::env::set_var("WS_EVENT_LOG_RETENTION_HOURS", "48");

    let config = GatewayConfig::load(file.path().to_str().unwrap()).unwrap();
    assert!(config.event_log.enabled);
    assert_eq!(config.event_log.database_url.as_deref(), Some("postgres://localhost/gw_test"));
    assert_eq!(config.event_log.retention_hours, 48);

    std::env::remove_var("WS_EVENT_LOG_ENABLED");
    std::env::remove_var("DATABASE_URL");
    std::env::remove_var("WS_EVENT_LOG_RETENTION_HOURS");
}

#[test]
fn config_load_missing_file_errors() {
    let result = GatewayConfig::load("/nonexistent/path/gateway.toml");
    assert!(result.is_err());
}
