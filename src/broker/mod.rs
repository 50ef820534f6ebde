//! The `broker` module is the server core of the bus: the hierarchical
//! channel registry with wildcard matching, the session registry with the
//! long-hold queue per session, the meta-protocol handler and the delivery
//! engine, all tied together by the `Broker` context object.

pub mod channel;
pub mod delivery;
pub mod engine;
pub mod meta;
pub mod policy;
pub mod sessions;

pub use channel::{ChannelRegistry, ListenerId, SubscribeError};
pub use engine::{Broker, PollError};
pub use policy::{AllowAll, SecurityPolicy};
pub use sessions::{Session, SessionRegistry};

#[cfg(test)]
mod tests;
