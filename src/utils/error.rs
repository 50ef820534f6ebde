use thiserror::Error;

/// A transport-level failure: not a protocol error. On the client side it
/// feeds the backoff/reconnect path rather than terminating the session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("transport closed")]
    Closed,
    #[error("encode/decode failure: {0}")]
    Codec(String),
}
