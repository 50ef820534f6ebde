use std::sync::Arc;

use tracing::debug;

use crate::protocol::{
    Advice, ChannelId, Message, Reconnect, BAYEUX_VERSION, META_CONNECT, META_DISCONNECT,
    META_HANDSHAKE, META_SUBSCRIBE, META_UNSUBSCRIBE,
};

use super::engine::Broker;
use super::sessions::Session;

/// The server-side meta-protocol state machine: one reply per meta request,
/// interpreted against the channel and session registries. State is per
/// request; everything persistent lives on the `Session` itself.
pub(crate) struct MetaHandler<'a> {
    bus: &'a Broker,
}

impl<'a> MetaHandler<'a> {
    pub fn new(bus: &'a Broker) -> Self {
        Self { bus }
    }

    pub fn handle(&self, message: &Message, sender: Option<&Arc<Session>>) -> Option<Message> {
        match message.channel.as_str() {
            META_HANDSHAKE => Some(self.handshake(message)),
            META_CONNECT => Some(self.connect(message, sender)),
            META_SUBSCRIBE => Some(self.subscribe(message, sender, true)),
            META_UNSUBSCRIBE => Some(self.subscribe(message, sender, false)),
            META_DISCONNECT => Some(self.disconnect(message, sender)),
            other => {
                debug!(channel = %other, "unknown meta channel");
                let mut reply = Message::reply_to(message, false);
                reply.error = Some(format!("404:{other}:unknown meta channel"));
                Some(reply)
            }
        }
    }

    /// Negotiates transports and creates the session. An empty intersection
    /// between the client's offer and the server's allowed set is terminal:
    /// `advice.reconnect = none`, no session.
    fn handshake(&self, message: &Message) -> Message {
        let mut reply = Message::reply_to(message, false);
        reply.version = Some(BAYEUX_VERSION.to_string());
        reply.supported_connection_types =
            Some(self.bus.settings.allowed_transports.clone());

        let offered = message
            .supported_connection_types
            .clone()
            .unwrap_or_default();
        let negotiable = offered
            .iter()
            .any(|t| self.bus.settings.allowed_transports.contains(t));
        if !negotiable {
            reply.error = Some("unsupported connection types".to_string());
            reply.advice = Some(Advice::reconnect(Reconnect::None));
            return reply;
        }
        if !self.bus.policy.can_handshake(message) {
            reply.error = Some("handshake denied".to_string());
            reply.advice = Some(Advice::reconnect(Reconnect::None));
            return reply;
        }

        let session = self.bus.sessions.create();
        debug!(session = %session.id(), "handshake created session");
        reply.successful = Some(true);
        reply.client_id = Some(session.id().to_string());
        reply.advice = Some(Advice {
            reconnect: Some(Reconnect::Retry),
            interval: Some(0),
            timeout: Some(self.bus.settings.timeout_ms),
        });
        reply
    }

    /// The long-hold request. The hold itself lives in `Broker::poll`; here
    /// the session is validated and its activity clock re-armed.
    fn connect(&self, message: &Message, sender: Option<&Arc<Session>>) -> Message {
        let Some(session) = sender else {
            let mut reply = Message::reply_to(message, false);
            reply.error = Some("402::unknown client".to_string());
            reply.advice = Some(Advice::reconnect(Reconnect::Handshake));
            return reply;
        };
        session.touch();
        let mut reply = Message::reply_to(message, true);
        reply.advice = Some(Advice {
            reconnect: Some(Reconnect::Retry),
            interval: Some(0),
            timeout: Some(self.bus.settings.timeout_ms),
        });
        reply
    }

    /// Subscribe and unsubscribe share a shape: the `subscription` field is
    /// a single channel or an array, the reply mirrors it, and each channel
    /// is validated independently so one failure does not block the rest.
    fn subscribe(&self, message: &Message, sender: Option<&Arc<Session>>, adding: bool) -> Message {
        let Some(session) = sender else {
            let mut reply = Message::reply_to(message, false);
            reply.subscription = message.subscription.clone();
            reply.error = Some("402::unknown client".to_string());
            reply.advice = Some(Advice::reconnect(Reconnect::Handshake));
            return reply;
        };
        session.touch();

        let Some(field) = &message.subscription else {
            let mut reply = Message::reply_to(message, false);
            reply.error = Some("403::subscription missing".to_string());
            return reply;
        };

        let mut failure: Option<String> = None;
        for channel in field.channels() {
            if let Err(error) = self.apply_subscription(session, channel, adding) {
                debug!(session = %session.id(), %channel, %error, "subscription change refused");
                failure.get_or_insert(error);
            }
        }

        let mut reply = Message::reply_to(message, failure.is_none());
        reply.subscription = Some(field.clone());
        reply.error = failure;
        reply
    }

    fn apply_subscription(
        &self,
        session: &Arc<Session>,
        channel: &str,
        adding: bool,
    ) -> Result<(), String> {
        let id = ChannelId::parse(channel)
            .map_err(|e| format!("405:{channel}:{e}"))?;
        if adding {
            if !self.bus.policy.can_subscribe(session, &id) {
                return Err(format!("403:{channel}:subscribe denied"));
            }
            match self.bus.channels.subscribe(&id, session.id()) {
                // Re-subscribing an already subscribed channel is
                // idempotent and still successful.
                Ok(true) => {
                    session.add_subscription(channel);
                    Ok(())
                }
                // Service channels record nothing.
                Ok(false) => Ok(()),
                Err(e) => Err(format!("403:{channel}:{e}")),
            }
        } else {
            let id_str = id.as_str();
            if id.is_meta() {
                return Err(format!("403:{channel}:meta channels do not allow subscription"));
            }
            self.bus.channels.unsubscribe(id_str, session.id());
            session.remove_subscription(id_str);
            Ok(())
        }
    }

    /// Destroys the session. Any in-flight hold wakes immediately and the
    /// cascade removes every subscription the session owned.
    fn disconnect(&self, message: &Message, sender: Option<&Arc<Session>>) -> Message {
        match sender {
            Some(session) => {
                self.bus.destroy_session(session.id());
                Message::reply_to(message, true)
            }
            None => {
                let mut reply = Message::reply_to(message, false);
                reply.error = Some("402::unknown client".to_string());
                reply
            }
        }
    }
}
