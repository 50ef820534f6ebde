mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{BrokerSettings, ClientSettings, ServerSettings, Settings};

/// Loads the configuration from the default file and environment variables
/// and merges it field by field over the built-in defaults.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(Environment::default().separator("_"));

    let config = builder.build()?;

    // Take what is available, fill the rest with defaults.
    let partial: PartialSettings = config.try_deserialize()?;
    let default = Settings::default();

    Ok(Settings {
        server: ServerSettings {
            host: partial
                .server
                .as_ref()
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            port: partial
                .server
                .as_ref()
                .and_then(|s| s.port)
                .unwrap_or(default.server.port),
        },
        broker: BrokerSettings {
            timeout_ms: partial
                .broker
                .as_ref()
                .and_then(|b| b.timeout_ms)
                .unwrap_or(default.broker.timeout_ms),
            max_interval_ms: partial
                .broker
                .as_ref()
                .and_then(|b| b.max_interval_ms)
                .unwrap_or(default.broker.max_interval_ms),
            max_queue: partial
                .broker
                .as_ref()
                .and_then(|b| b.max_queue)
                .unwrap_or(default.broker.max_queue),
            allowed_transports: partial
                .broker
                .as_ref()
                .and_then(|b| b.allowed_transports.clone())
                .unwrap_or(default.broker.allowed_transports),
        },
        client: ClientSettings {
            backoff_increment_ms: partial
                .client
                .as_ref()
                .and_then(|c| c.backoff_increment_ms)
                .unwrap_or(default.client.backoff_increment_ms),
            max_backoff_ms: partial
                .client
                .as_ref()
                .and_then(|c| c.max_backoff_ms)
                .unwrap_or(default.client.max_backoff_ms),
            append_message_type_to_url: partial
                .client
                .as_ref()
                .and_then(|c| c.append_message_type_to_url)
                .unwrap_or(default.client.append_message_type_to_url),
        },
    })
}

#[cfg(test)]
mod tests;
