//! The `protocol` module defines the Bayeux wire vocabulary: the message
//! structure exchanged between client and server, reply advice, and the
//! hierarchical channel ids with their wildcard matching rules.

pub mod channel;
pub mod message;

pub use channel::{ChannelId, ChannelIdError, Wildcard};
pub use message::{
    Advice, BinaryPayload, Message, Reconnect, SubscriptionField, BAYEUX_VERSION, META_CONNECT,
    META_DISCONNECT, META_HANDSHAKE, META_SUBSCRIBE, META_UNSUBSCRIBE,
};

#[cfg(test)]
mod tests;
