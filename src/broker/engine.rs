use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::BrokerSettings;
use crate::extension::{Extension, ExtensionPipeline};
use crate::protocol::{ChannelId, ChannelIdError, Message};

use super::channel::{ChannelRegistry, ListenerId};
use super::delivery::DeliveryEngine;
use super::meta::MetaHandler;
use super::policy::{AllowAll, SecurityPolicy};
use super::sessions::{Session, SessionRegistry};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PollError {
    #[error("unknown session")]
    UnknownSession,
    #[error("session destroyed")]
    SessionDestroyed,
}

/// The process-wide bus context: channel and session registries, the server
/// extension pipeline and the security policy, tied together behind one
/// explicit object so tests can run several independent instances.
pub struct Broker {
    pub(crate) channels: ChannelRegistry,
    pub(crate) sessions: SessionRegistry,
    pub(crate) pipeline: ExtensionPipeline,
    pub(crate) policy: Arc<dyn SecurityPolicy>,
    pub(crate) settings: BrokerSettings,
}

impl Broker {
    pub fn new(settings: BrokerSettings) -> Self {
        Self::with_policy(settings, Arc::new(AllowAll))
    }

    pub fn with_policy(settings: BrokerSettings, policy: Arc<dyn SecurityPolicy>) -> Self {
        Self {
            channels: ChannelRegistry::new(),
            sessions: SessionRegistry::new(settings.max_queue),
            pipeline: ExtensionPipeline::new(),
            policy,
            settings,
        }
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    pub fn hold_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.timeout_ms)
    }

    pub fn register_extension(&self, name: &str, extension: Arc<dyn Extension>) {
        self.pipeline.register(name, extension);
    }

    pub fn unregister_extension(&self, name: &str) -> bool {
        self.pipeline.unregister(name)
    }

    pub fn add_listener<F>(&self, channel: &str, listener: F) -> Result<ListenerId, ChannelIdError>
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let id = ChannelId::parse(channel)?;
        Ok(self.channels.add_listener(&id, Arc::new(listener)))
    }

    pub fn remove_listener(&self, channel: &str, listener: ListenerId) -> bool {
        self.channels.remove_listener(channel, listener)
    }

    pub fn set_persistent(&self, channel: &str, persistent: bool) -> Result<(), ChannelIdError> {
        let id = ChannelId::parse(channel)?;
        self.channels.set_persistent(&id, persistent);
        Ok(())
    }

    pub fn session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Processes one inbound batch: each message passes the server and
    /// sender-session incoming stages once (a veto drops it silently), then
    /// routes to the meta handler or the delivery engine. Replies pass the
    /// outgoing stages exactly once before leaving.
    pub fn process(&self, batch: Vec<Message>) -> Vec<Message> {
        let mut replies = Vec::new();
        for mut message in batch {
            let sender = message
                .client_id
                .as_deref()
                .and_then(|id| self.sessions.get(id));

            if !self.pipeline.incoming(&mut message) {
                debug!(channel = %message.channel, "incoming message vetoed");
                continue;
            }
            if let Some(session) = &sender {
                if !session.extensions().incoming(&mut message) {
                    debug!(channel = %message.channel, session = %session.id(),
                        "incoming message vetoed by session extension");
                    continue;
                }
                session.touch();
            }

            let reply = if message.is_meta() {
                MetaHandler::new(self).handle(&message, sender.as_ref())
            } else {
                self.handle_publish(sender.as_ref(), &message)
            };

            let Some(mut reply) = reply else { continue };
            if !self.pipeline.outgoing(&mut reply) {
                continue;
            }
            if let Some(session) = reply
                .client_id
                .as_deref()
                .and_then(|id| self.sessions.get(id))
            {
                if !session.extensions().outgoing(&mut reply) {
                    continue;
                }
            }
            replies.push(reply);
        }
        replies
    }

    fn handle_publish(&self, sender: Option<&Arc<Session>>, message: &Message) -> Option<Message> {
        let remote = message.client_id.is_some();
        let channel = match ChannelId::parse(&message.channel) {
            Ok(c) => c,
            Err(e) => {
                return remote.then(|| {
                    let mut reply = Message::reply_to(message, false);
                    reply.error = Some(format!("405:{}:{e}", message.channel));
                    reply
                });
            }
        };
        if remote && sender.is_none() {
            let mut reply = Message::reply_to(message, false);
            reply.error = Some("402::unknown client".to_string());
            return Some(reply);
        }
        if !self
            .policy
            .can_publish(sender.map(Arc::as_ref), &channel, message)
        {
            return remote.then(|| {
                let mut reply = Message::reply_to(message, false);
                reply.error = Some(format!("403:{}:publish denied", message.channel));
                reply
            });
        }

        DeliveryEngine::new(self).publish(sender, message);
        remote.then(|| Message::reply_to(message, true))
    }

    /// Publishes from the server itself (no session, no reply).
    pub fn publish(&self, channel: &str, data: Value) -> Result<(), ChannelIdError> {
        ChannelId::parse(channel)?;
        let message = Message::publish(channel, data);
        DeliveryEngine::new(self).publish(None, &message);
        Ok(())
    }

    /// Delivers directly to one session, bypassing subscriptions.
    pub fn deliver_to(&self, session_id: &str, channel: &str, data: Value) -> bool {
        let Some(session) = self.sessions.get(session_id) else {
            return false;
        };
        let message = Message::publish(channel, data);
        DeliveryEngine::new(self).deliver(None, &session, message)
    }

    /// The long-hold: resolves when a message is queued for the session,
    /// when the deadline elapses (empty batch) or when the session is
    /// destroyed. No busy polling; the session's `Notify` is armed before
    /// the queue is inspected so no wake is lost.
    pub async fn poll(
        &self,
        session_id: &str,
        timeout: Duration,
    ) -> Result<Vec<Message>, PollError> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or(PollError::UnknownSession)?;
        session.touch();
        let deadline = Instant::now() + timeout;
        loop {
            let notified = session.notified();
            if session.is_destroyed() {
                return Err(PollError::SessionDestroyed);
            }
            let batch = session.drain();
            if !batch.is_empty() {
                return Ok(batch);
            }
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return Ok(Vec::new());
            };
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    /// Destroys a session and cascades: every subscription it owned is
    /// removed from the channel registry. Returns the dropped subscription
    /// set so callers can notify interested services.
    pub fn destroy_session(&self, id: &str) -> Option<Vec<String>> {
        let session = self.sessions.destroy(id)?;
        let mut dropped = session.take_subscriptions();
        for channel in &dropped {
            self.channels.unsubscribe(channel, id);
        }
        dropped.sort();
        info!(session = %id, "session destroyed");
        Some(dropped)
    }

    /// Destroys sessions whose transport stopped re-arming the hold.
    pub fn sweep_expired(&self) {
        let max_interval = Duration::from_millis(self.settings.max_interval_ms);
        for id in self.sessions.expired(max_interval) {
            warn!(session = %id, "session expired");
            self.destroy_session(&id);
        }
    }
}
