use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::warn;

use crate::protocol::{ChannelId, Message};

use super::engine::Broker;
use super::sessions::Session;

/// Resolves a published message to its target listeners and sessions and
/// invokes them. A failing listener or a vetoing pipeline affects only its
/// own target; the rest of the fan-out proceeds.
pub(crate) struct DeliveryEngine<'a> {
    bus: &'a Broker,
}

impl<'a> DeliveryEngine<'a> {
    pub fn new(bus: &'a Broker) -> Self {
        Self { bus }
    }

    /// Fans `message` out to every channel matching its id. Listeners on
    /// matched channels always run; subscribers are consulted only for
    /// non-service channels. FIFO per (publisher, subscriber) holds because
    /// one publisher's messages are enqueued in call order.
    pub fn publish(&self, from: Option<&Arc<Session>>, message: &Message) {
        let Ok(channel) = ChannelId::parse(&message.channel) else {
            warn!(channel = %message.channel, "dropping publish to invalid channel");
            return;
        };
        let matches = self.bus.channels.matching(&channel);

        for listener in &matches.listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(message))).is_err() {
                warn!(channel = %message.channel, "channel listener panicked");
            }
        }

        // Service channels deliver to listeners only, never through the
        // subscription mechanism.
        if channel.is_service() {
            return;
        }

        for subscriber in &matches.subscribers {
            let Some(session) = self.bus.sessions.get(subscriber) else {
                continue;
            };
            self.deliver(from, &session, message.clone());
        }
    }

    /// Direct server-to-session delivery, bypassing subscriptions.
    pub fn deliver(
        &self,
        _from: Option<&Arc<Session>>,
        session: &Arc<Session>,
        mut message: Message,
    ) -> bool {
        if !self.bus.pipeline.outgoing(&mut message) {
            return false;
        }
        if !session.extensions().outgoing(&mut message) {
            return false;
        }
        session.enqueue(message)
    }
}
