use serde::Deserialize;

/// Top-level configuration: the listening server, the broker core and the
/// client controller defaults.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub client: ClientSettings,
}

/// Host and port the WebSocket front-end binds to.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Operational parameters of the broker core.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    /// How long a `/meta/connect` hold stays open before returning an
    /// empty batch, in milliseconds.
    pub timeout_ms: u64,
    /// Idle time after which a session is considered expired.
    pub max_interval_ms: u64,
    /// Bound on each session's outgoing queue.
    pub max_queue: usize,
    /// Transport names the server accepts during handshake negotiation.
    pub allowed_transports: Vec<String>,
}

/// Pass-through configuration for the client connection controller and its
/// transport collaborators.
#[derive(Debug, Deserialize, Clone)]
pub struct ClientSettings {
    /// Milliseconds added per reconnection attempt.
    pub backoff_increment_ms: u64,
    /// Ceiling on the reconnection delay.
    pub max_backoff_ms: u64,
    /// Whether transports suffix the URL with the message type
    /// (`/handshake`, `/connect`, `/disconnect`).
    pub append_message_type_to_url: bool,
}

/// Partial settings loaded from files or environment; missing values fall
/// back to `Settings::default()`.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub client: Option<PartialClientSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub timeout_ms: Option<u64>,
    pub max_interval_ms: Option<u64>,
    pub max_queue: Option<usize>,
    pub allowed_transports: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct PartialClientSettings {
    pub backoff_increment_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub append_message_type_to_url: Option<bool>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            broker: BrokerSettings::default(),
            client: ClientSettings::default(),
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_interval_ms: 60_000,
            max_queue: 1_000,
            allowed_transports: vec![
                "websocket".to_string(),
                "long-polling".to_string(),
                "local".to_string(),
            ],
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            backoff_increment_ms: 1_000,
            max_backoff_ms: 30_000,
            append_message_type_to_url: true,
        }
    }
}
