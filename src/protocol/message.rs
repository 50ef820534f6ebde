use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const META_HANDSHAKE: &str = "/meta/handshake";
pub const META_CONNECT: &str = "/meta/connect";
pub const META_SUBSCRIBE: &str = "/meta/subscribe";
pub const META_UNSUBSCRIBE: &str = "/meta/unsubscribe";
pub const META_DISCONNECT: &str = "/meta/disconnect";

pub const BAYEUX_VERSION: &str = "1.0";

/// Reconnect hint carried in reply advice.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Reconnect {
    Retry,
    Handshake,
    None,
}

/// Server hints attached to meta replies.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Advice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<Reconnect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl Advice {
    pub fn reconnect(reconnect: Reconnect) -> Self {
        Self {
            reconnect: Some(reconnect),
            ..Default::default()
        }
    }
}

/// The `subscription` field of `/meta/subscribe` and `/meta/unsubscribe`:
/// a single channel or an array of channels. The reply mirrors the shape of
/// the request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SubscriptionField {
    One(String),
    Many(Vec<String>),
}

impl SubscriptionField {
    pub fn channels(&self) -> Vec<&str> {
        match self {
            Self::One(c) => vec![c.as_str()],
            Self::Many(cs) => cs.iter().map(String::as_str).collect(),
        }
    }
}

/// A Bayeux message. `data` is an `Option` so that falsy payloads (empty
/// string, numeric zero) stay distinguishable from "no payload".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub channel: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(
        rename = "clientId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<SubscriptionField>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub successful: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Extension-private namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<Map<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advice: Option<Advice>,

    #[serde(
        rename = "connectionType",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub connection_type: Option<String>,

    #[serde(
        rename = "supportedConnectionTypes",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub supported_connection_types: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(
        rename = "minimumVersion",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub minimum_version: Option<String>,
}

impl Message {
    pub fn new(channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
            ..Default::default()
        }
    }

    pub fn publish(channel: &str, data: Value) -> Self {
        Self {
            channel: channel.to_string(),
            data: Some(data),
            ..Default::default()
        }
    }

    /// A reply correlated to `request`: same channel, id and clientId.
    pub fn reply_to(request: &Message, successful: bool) -> Self {
        Self {
            channel: request.channel.clone(),
            id: request.id.clone(),
            client_id: request.client_id.clone(),
            successful: Some(successful),
            ..Default::default()
        }
    }

    pub fn is_meta(&self) -> bool {
        self.channel.starts_with("/meta/")
    }

    pub fn is_service(&self) -> bool {
        self.channel.starts_with("/service/")
    }

    /// The extension-private map, created on first access.
    pub fn ext_mut(&mut self) -> &mut Map<String, Value> {
        self.ext.get_or_insert_with(Map::new)
    }
}

/// Convention for binary payloads produced by an external codec: the frame
/// data, a `last` flag for multi-frame payloads and an opaque metadata map.
/// The bus forwards all three unchanged; reassembly belongs to the codec.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BinaryPayload {
    pub data: Value,
    pub last: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

impl BinaryPayload {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}
