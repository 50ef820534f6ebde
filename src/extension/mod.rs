//! The `extension` module defines the message interceptor contract shared by
//! the server and the client: an ordered chain of extensions that may rewrite
//! or veto every inbound and outbound message.

pub mod pipeline;

pub use pipeline::{Extension, ExtensionPipeline};
