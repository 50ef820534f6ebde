//! The `transport` module handles network communication with remote
//! clients over WebSockets: accepting connections, parsing message
//! batches, routing them through the broker and pushing queued deliveries
//! back down the socket.

pub mod websocket;

pub use websocket::start_websocket_server;
