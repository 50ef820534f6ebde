use serial_test::serial;

use super::load_config;
use super::settings::Settings;

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 8080);
    assert_eq!(settings.broker.timeout_ms, 30_000);
    assert_eq!(settings.broker.max_interval_ms, 60_000);
    assert_eq!(settings.broker.max_queue, 1_000);
    assert!(settings
        .broker
        .allowed_transports
        .contains(&"websocket".to_string()));
    assert_eq!(settings.client.backoff_increment_ms, 1_000);
    assert_eq!(settings.client.max_backoff_ms, 30_000);
    assert!(settings.client.append_message_type_to_url);
}

#[test]
#[serial]
fn test_load_config_falls_back_to_defaults() {
    let settings = load_config().expect("load config");
    assert_eq!(settings.broker.timeout_ms, 30_000);
    assert_eq!(settings.client.max_backoff_ms, 30_000);
}

#[test]
#[serial]
fn test_environment_overrides_server_port() {
    temp_env::with_var("SERVER_PORT", Some("9444"), || {
        let settings = load_config().expect("load config");
        assert_eq!(settings.server.port, 9444);
        // Untouched sections keep their defaults.
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.broker.max_queue, 1_000);
    });
}
