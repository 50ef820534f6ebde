//! The client side of the bus: a connection controller driving handshake,
//! the long-held `/meta/connect` loop and reconnection with backoff, plus
//! refcounted subscription bookkeeping and outgoing micro-batching.
//!
//! Transports are pluggable behind [`ClientTransport`]; [`LocalTransport`]
//! wires a client straight into an in-process [`crate::broker::Broker`].

pub mod backoff;
pub mod controller;
pub mod subscriptions;
pub mod transport;

pub use controller::{BayouClient, ClientError, ClientOptions, ConnectionState, PendingReply};
pub use subscriptions::{ListenerHandle, Subscription};
pub use transport::{ClientTransport, LocalTransport};
