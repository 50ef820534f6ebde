use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::broker::Broker;
use crate::protocol::{Message, META_CONNECT};
use crate::utils::error::TransportError;

use super::controller::ClientOptions;

/// A client-side wire transport: sends one envelope of messages and returns
/// the replies, including any messages the server piggybacks on a held
/// `/meta/connect`. Concrete network transports (WebSocket, HTTP
/// long-polling) live outside the core behind this seam.
#[async_trait]
pub trait ClientTransport: Send + Sync {
    /// The transport name offered during handshake negotiation.
    fn name(&self) -> &str;

    async fn send(&self, messages: Vec<Message>) -> Result<Vec<Message>, TransportError>;

    /// Pass-through of client options the transport may care about, such as
    /// `append_message_type_to_url`.
    fn configure(&self, options: &ClientOptions) {
        let _ = options;
    }
}

/// Bridges a client straight into an in-process `Broker`: envelopes go
/// through `Broker::process`, and an envelope carrying a successful
/// `/meta/connect` holds on `Broker::poll` so queued deliveries ride back
/// with the connect reply.
pub struct LocalTransport {
    broker: Arc<Broker>,
    hold: Duration,
}

impl LocalTransport {
    pub fn new(broker: Arc<Broker>) -> Self {
        let hold = broker.hold_timeout();
        Self { broker, hold }
    }
}

#[async_trait]
impl ClientTransport for LocalTransport {
    fn name(&self) -> &str {
        "local"
    }

    async fn send(&self, messages: Vec<Message>) -> Result<Vec<Message>, TransportError> {
        let connect_client = messages
            .iter()
            .find(|m| m.channel == META_CONNECT)
            .and_then(|m| m.client_id.clone());

        let replies = self.broker.process(messages);

        let mut out = Vec::new();
        if let Some(client_id) = connect_client {
            let connected = replies
                .iter()
                .any(|r| r.channel == META_CONNECT && r.successful == Some(true));
            if connected {
                // Queued deliveries precede the connect reply, matching the
                // flush order of a held long-poll response.
                if let Ok(batch) = self.broker.poll(&client_id, self.hold).await {
                    out.extend(batch);
                }
            }
        }
        out.extend(replies);
        Ok(out)
    }
}
