//! # Bayou
//!
//! `bayou` is an in-memory publish/subscribe message bus speaking a
//! Bayeux-style protocol: clients handshake for a session, subscribe to
//! hierarchical channels (with `*` and `**` wildcards) and exchange JSON
//! messages over meta, service and broadcast channels.
//!
//! ## Core Modules
//!
//! - `protocol`: the wire vocabulary of messages, advice and channel ids.
//! - `extension`: ordered incoming/outgoing message pipelines with veto.
//! - `broker`: the server core, with the channel and session registries,
//!   the meta protocol handler and the delivery engine.
//! - `client`: the client connection controller with reconnection,
//!   subscription bookkeeping and outgoing batching.
//! - `transport`: the WebSocket server front-end.
//! - `config`: layered configuration loading.
//! - `utils`: shared error types and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod extension;
pub mod protocol;
pub mod transport;
pub mod utils;
