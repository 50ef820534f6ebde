use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::config::ClientSettings;
use crate::extension::{Extension, ExtensionPipeline};
use crate::protocol::{
    ChannelId, Message, Reconnect, SubscriptionField, BAYEUX_VERSION, META_CONNECT,
    META_DISCONNECT, META_HANDSHAKE, META_SUBSCRIBE, META_UNSUBSCRIBE,
};
use crate::utils::error::TransportError;

use super::backoff;
use super::subscriptions::{
    ListenerBook, ListenerHandle, MessageListener, RemoveOutcome, SharedOutcome, Subscription,
    SubscriptionBook,
};
use super::transport::ClientTransport;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("illegal client state: {0}")]
    IllegalState(&'static str),
    #[error("message vetoed by an outgoing extension")]
    Vetoed,
    #[error("operation cancelled by disconnect")]
    Cancelled,
    #[error("reply channel dropped")]
    ReplyDropped,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Client configuration, passed through to transport collaborators.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub backoff_increment: Duration,
    pub max_backoff: Duration,
    pub append_message_type_to_url: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from_settings(&ClientSettings::default())
    }
}

impl ClientOptions {
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self {
            backoff_increment: Duration::from_millis(settings.backoff_increment_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            append_message_type_to_url: settings.append_message_type_to_url,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Handshaking,
    Connecting,
    Connected,
}

/// A single-fire reply: resolves exactly once, with the server reply, a
/// veto, a transport failure or a cancellation, even when the reply was
/// satisfied locally without a wire round trip.
pub struct PendingReply {
    rx: oneshot::Receiver<Result<Message, ClientError>>,
}

impl PendingReply {
    pub async fn wait(self) -> Result<Message, ClientError> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(ClientError::ReplyDropped),
        }
    }
}

struct ClientState {
    connection: ConnectionState,
    client_id: Option<String>,
    transport: Option<Arc<dyn ClientTransport>>,
    attempts: u32,
    /// Bumped on every disconnect; in-flight retries and the connect loop
    /// re-check it so no orphaned attempt survives.
    epoch: u64,
    batch_depth: u32,
    flush_scheduled: bool,
    next_id: u64,
    queue: Vec<Message>,
}

struct ClientCore {
    options: ClientOptions,
    transports: Vec<Arc<dyn ClientTransport>>,
    extensions: ExtensionPipeline,
    state: Mutex<ClientState>,
    subscriptions: Mutex<SubscriptionBook>,
    listeners: Mutex<ListenerBook>,
    pending: Mutex<HashMap<String, oneshot::Sender<Result<Message, ClientError>>>>,
}

/// The client connection controller: handshake and transport negotiation,
/// the one-outstanding connect loop, outgoing batching, refcounted
/// subscription bookkeeping and backoff-driven reconnection.
pub struct BayouClient {
    core: Arc<ClientCore>,
}

impl BayouClient {
    pub fn new(options: ClientOptions, transports: Vec<Arc<dyn ClientTransport>>) -> Self {
        for transport in &transports {
            transport.configure(&options);
        }
        Self {
            core: Arc::new(ClientCore {
                options,
                transports,
                extensions: ExtensionPipeline::new(),
                state: Mutex::new(ClientState {
                    connection: ConnectionState::Disconnected,
                    client_id: None,
                    transport: None,
                    attempts: 0,
                    epoch: 0,
                    batch_depth: 0,
                    flush_scheduled: false,
                    next_id: 0,
                    queue: Vec::new(),
                }),
                subscriptions: Mutex::new(SubscriptionBook::default()),
                listeners: Mutex::new(ListenerBook::default()),
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.core.state.lock().unwrap().connection
    }

    pub fn client_id(&self) -> Option<String> {
        self.core.state.lock().unwrap().client_id.clone()
    }

    pub fn options(&self) -> &ClientOptions {
        &self.core.options
    }

    /// Extensions survive re-handshake and disconnect; they are pipeline
    /// state, not session state.
    pub fn register_extension(&self, name: &str, extension: Arc<dyn Extension>) {
        self.core.extensions.register(name, extension);
    }

    pub fn unregister_extension(&self, name: &str) -> bool {
        self.core.extensions.unregister(name)
    }

    /// Registers a local listener on a channel pattern (including
    /// `/meta/*` replies). Listeners are not tied to the session and are
    /// never sent to the server.
    pub fn add_listener<F>(&self, channel: &str, listener: F) -> ListenerHandle
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.core
            .listeners
            .lock()
            .unwrap()
            .add(channel, Arc::new(listener))
    }

    pub fn remove_listener(&self, handle: &ListenerHandle) -> bool {
        self.core.listeners.lock().unwrap().remove(handle)
    }

    /// Starts the session: sends `/meta/handshake` offering the registered
    /// transport names, then enters the connect loop. Retries transport
    /// failures at the backoff cadence; a failed transport negotiation is
    /// terminal and returns the failed reply with the client left
    /// disconnected. Calling this anywhere but the disconnected state is a
    /// usage error and sends nothing.
    pub async fn handshake(&self) -> Result<Message, ClientError> {
        let epoch = {
            let mut state = self.core.state.lock().unwrap();
            if state.connection != ConnectionState::Disconnected {
                return Err(ClientError::IllegalState(
                    "handshake requires a disconnected client",
                ));
            }
            state.connection = ConnectionState::Handshaking;
            state.attempts = 0;
            state.epoch += 1;
            state.epoch
        };
        ClientCore::handshake_cycle(self.core.clone(), epoch).await
    }

    /// Subscribes a listener to a channel. Only the first local listener
    /// for a channel sends a wire `/meta/subscribe`; later callers share
    /// the subscription and still get their own reply. Meta channels fail
    /// without wire traffic; service channels register locally only.
    pub async fn subscribe<F>(
        &self,
        channel: &str,
        listener: F,
    ) -> Result<(Subscription, Message), ClientError>
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let parsed = ChannelId::parse(channel)
            .map_err(|_| ClientError::IllegalState("invalid channel id"))?;
        if parsed.is_meta() {
            return Err(ClientError::IllegalState(
                "meta channels do not allow subscription",
            ));
        }
        if self.state() == ConnectionState::Disconnected {
            return Err(ClientError::IllegalState("client is disconnected"));
        }

        let listener: Arc<MessageListener> = Arc::new(listener);
        let (subscription, first) = self
            .core
            .subscriptions
            .lock()
            .unwrap()
            .add(channel, listener);

        if parsed.is_service() {
            // Never a wire subscription; the caller still gets a
            // single-fire reply.
            self.core.subscriptions.lock().unwrap().establish(channel);
            return Ok((subscription, synthetic_subscribe_reply(channel)));
        }

        if !first {
            let outcome = self.core.subscriptions.lock().unwrap().attach(channel);
            return match outcome {
                SharedOutcome::Established => {
                    Ok((subscription, synthetic_subscribe_reply(channel)))
                }
                // The first subscriber's wire message is in flight; its
                // reply settles this caller too.
                SharedOutcome::Pending(rx) => match rx.await {
                    Ok(reply) => Ok((subscription, reply)),
                    Err(_) => Err(ClientError::Cancelled),
                },
            };
        }

        let mut request = Message::new(META_SUBSCRIBE);
        request.subscription = Some(SubscriptionField::One(channel.to_string()));
        let reply = match ClientCore::enqueue(&self.core, request).wait().await {
            Ok(reply) => reply,
            Err(e) => {
                // Parked subscribers would wait forever otherwise.
                self.core.subscriptions.lock().unwrap().abandon(channel);
                return Err(e);
            }
        };
        // Establishes on success; a denial drops the entry (this listener
        // and any parked ones) so a later subscribe retries the wire.
        self.core.subscriptions.lock().unwrap().settle(channel, &reply);
        Ok((subscription, reply))
    }

    /// Releases one local listener. The wire `/meta/unsubscribe` goes out
    /// only when the channel's last local listener is removed.
    pub async fn unsubscribe(&self, subscription: Subscription) -> Result<Message, ClientError> {
        let channel = subscription.channel().to_string();
        let service = ChannelId::parse(&channel)
            .map(|c| c.is_service())
            .unwrap_or(false);
        let outcome = self.core.subscriptions.lock().unwrap().remove(&subscription);
        match outcome {
            RemoveOutcome::NotFound => Err(ClientError::IllegalState("unknown subscription")),
            RemoveOutcome::Remaining => Ok(synthetic_unsubscribe_reply(&channel)),
            RemoveOutcome::Last if service => Ok(synthetic_unsubscribe_reply(&channel)),
            RemoveOutcome::Last => {
                if self.state() == ConnectionState::Disconnected {
                    return Ok(synthetic_unsubscribe_reply(&channel));
                }
                let mut request = Message::new(META_UNSUBSCRIBE);
                request.subscription = Some(SubscriptionField::One(channel));
                ClientCore::enqueue(&self.core, request).wait().await
            }
        }
    }

    /// Queues a publish. Outside an explicit batch the queue flushes in the
    /// current scheduling turn, so back-to-back publishes coalesce into one
    /// envelope without delaying ready messages across turns.
    pub fn publish(&self, channel: &str, data: serde_json::Value) -> Result<PendingReply, ClientError> {
        let parsed = ChannelId::parse(channel)
            .map_err(|_| ClientError::IllegalState("invalid channel id"))?;
        if parsed.is_meta() {
            return Err(ClientError::IllegalState("cannot publish to meta channels"));
        }
        if self.state() == ConnectionState::Disconnected {
            return Err(ClientError::IllegalState("client is disconnected"));
        }
        Ok(ClientCore::enqueue(&self.core, Message::publish(channel, data)))
    }

    pub fn start_batch(&self) {
        self.core.state.lock().unwrap().batch_depth += 1;
    }

    /// Closes a batch; when the outermost batch ends, the accumulated
    /// envelope is flushed in one wire round trip.
    pub async fn end_batch(&self) -> Result<(), ClientError> {
        let flush = {
            let mut state = self.core.state.lock().unwrap();
            if state.batch_depth == 0 {
                return Err(ClientError::IllegalState("end_batch without start_batch"));
            }
            state.batch_depth -= 1;
            state.batch_depth == 0
        };
        if flush {
            ClientCore::flush(self.core.clone()).await;
        }
        Ok(())
    }

    /// Terminal: sends a best-effort `/meta/disconnect`, cancels every
    /// scheduled retry and the connect loop, fails pending replies and
    /// voids the subscription book. Listeners and extensions survive.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let (client_id, transport, message_id) = {
            let mut state = self.core.state.lock().unwrap();
            state.connection = ConnectionState::Disconnected;
            state.epoch += 1;
            state.attempts = 0;
            state.queue.clear();
            state.next_id += 1;
            (
                state.client_id.take(),
                state.transport.take(),
                state.next_id.to_string(),
            )
        };

        let pending: Vec<_> = {
            let mut pending = self.core.pending.lock().unwrap();
            pending.drain().collect()
        };
        for (_, tx) in pending {
            let _ = tx.send(Err(ClientError::Cancelled));
        }
        self.core.subscriptions.lock().unwrap().clear();

        if let (Some(client_id), Some(transport)) = (client_id, transport) {
            let mut message = Message::new(META_DISCONNECT);
            message.client_id = Some(client_id);
            message.id = Some(message_id);
            if self.core.extensions.outgoing(&mut message) {
                match transport.send(vec![message]).await {
                    Ok(replies) => {
                        self.core.dispatch(replies);
                    }
                    Err(e) => debug!(error = %e, "disconnect send failed"),
                }
            }
        }
        Ok(())
    }
}

fn synthetic_subscribe_reply(channel: &str) -> Message {
    let mut reply = Message::new(META_SUBSCRIBE);
    reply.successful = Some(true);
    reply.subscription = Some(SubscriptionField::One(channel.to_string()));
    reply
}

fn synthetic_unsubscribe_reply(channel: &str) -> Message {
    let mut reply = Message::new(META_UNSUBSCRIBE);
    reply.successful = Some(true);
    reply.subscription = Some(SubscriptionField::One(channel.to_string()));
    reply
}

impl ClientCore {
    fn next_message_id(&self) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        state.next_id.to_string()
    }

    fn current(&self, epoch: u64) -> bool {
        self.state.lock().unwrap().epoch == epoch
    }

    fn set_disconnected(&self, epoch: u64) {
        let mut state = self.state.lock().unwrap();
        if state.epoch == epoch {
            state.connection = ConnectionState::Disconnected;
            state.client_id = None;
            state.transport = None;
        }
    }

    /// Queues a message with its single-fire reply slot and, outside a
    /// batch, schedules the micro-batch flush for this turn.
    fn enqueue(core: &Arc<Self>, mut message: Message) -> PendingReply {
        let (tx, rx) = oneshot::channel();
        let id = core.next_message_id();
        message.id = Some(id.clone());
        core.pending.lock().unwrap().insert(id, tx);

        let flush_now = {
            let mut state = core.state.lock().unwrap();
            state.queue.push(message);
            if state.batch_depth == 0 && !state.flush_scheduled {
                state.flush_scheduled = true;
                true
            } else {
                false
            }
        };
        if flush_now {
            Self::schedule_flush(core);
        }
        PendingReply { rx }
    }

    fn schedule_flush(core: &Arc<Self>) {
        let core = core.clone();
        tokio::spawn(async move {
            Self::flush(core).await;
        });
    }

    /// Sends the queued envelope. Messages without a clientId are stamped
    /// with the session's; an outgoing veto resolves that message's pending
    /// reply as failed and the rest of the envelope still goes out. While
    /// no session is established the queue stays put and is re-flushed once
    /// the handshake completes.
    async fn flush(core: Arc<Self>) {
        let (batch, transport) = {
            let mut state = core.state.lock().unwrap();
            state.flush_scheduled = false;
            if state.batch_depth > 0 || state.queue.is_empty() {
                return;
            }
            let (Some(client_id), Some(transport)) =
                (state.client_id.clone(), state.transport.clone())
            else {
                return;
            };
            let mut batch: Vec<Message> = state.queue.drain(..).collect();
            for message in &mut batch {
                if message.client_id.is_none() {
                    message.client_id = Some(client_id.clone());
                }
            }
            (batch, transport)
        };

        let mut envelope = Vec::new();
        for mut message in batch {
            let id = message.id.clone();
            if core.extensions.outgoing(&mut message) {
                envelope.push(message);
            } else if let Some(id) = id {
                if let Some(tx) = core.pending.lock().unwrap().remove(&id) {
                    let _ = tx.send(Err(ClientError::Vetoed));
                }
            }
        }
        if envelope.is_empty() {
            return;
        }

        let ids: Vec<String> = envelope.iter().filter_map(|m| m.id.clone()).collect();
        match transport.send(envelope).await {
            Ok(replies) => {
                core.dispatch(replies);
                // A request/reply transport answered; anything unresolved
                // will never resolve.
                for id in ids {
                    if let Some(tx) = core.pending.lock().unwrap().remove(&id) {
                        let _ = tx.send(Err(ClientError::ReplyDropped));
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "publish envelope failed");
                for id in ids {
                    if let Some(tx) = core.pending.lock().unwrap().remove(&id) {
                        let _ = tx.send(Err(ClientError::Transport(e.clone())));
                    }
                }
            }
        }
    }

    /// Runs every inbound message through the incoming pipeline stage, then
    /// resolves pending replies and fires channel and subscription
    /// listeners. Returns the surviving messages so callers can inspect
    /// their own replies.
    fn dispatch(&self, replies: Vec<Message>) -> Vec<Message> {
        let mut processed = Vec::new();
        for mut message in replies {
            if !self.extensions.incoming(&mut message) {
                debug!(channel = %message.channel, "inbound message vetoed");
                continue;
            }
            // Only replies settle pending requests. Broadcast deliveries
            // keep the publisher's id, which may collide with a local one.
            if message.successful.is_some() {
                if let Some(id) = &message.id {
                    if let Some(tx) = self.pending.lock().unwrap().remove(id) {
                        let _ = tx.send(Ok(message.clone()));
                    }
                }
            }
            let listeners = self.listeners.lock().unwrap().matching(&message.channel);
            for listener in listeners {
                listener(&message);
            }
            if !message.is_meta() && message.successful.is_none() {
                let subscribers = self
                    .subscriptions
                    .lock()
                    .unwrap()
                    .listeners_for(&message.channel);
                for listener in subscribers {
                    listener(&message);
                }
            }
            processed.push(message);
        }
        processed
    }

    async fn backoff_sleep(&self, epoch: u64) -> Result<(), ClientError> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            if state.epoch != epoch {
                return Err(ClientError::Cancelled);
            }
            state.attempts += 1;
            backoff::delay(
                state.attempts,
                self.options.backoff_increment,
                self.options.max_backoff,
            )
        };
        tokio::time::sleep(delay).await;
        if !self.current(epoch) {
            return Err(ClientError::Cancelled);
        }
        Ok(())
    }

    /// One handshake campaign: keeps sending `/meta/handshake` at the
    /// backoff cadence until the server answers, the failure is terminal or
    /// the epoch moves on. On success the connect loop is spawned and the
    /// queued envelope released. Boxed so the connect loop can start a new
    /// campaign after a lost session.
    fn handshake_cycle(
        core: Arc<Self>,
        epoch: u64,
    ) -> BoxFuture<'static, Result<Message, ClientError>> {
        async move {
            loop {
                if !core.current(epoch) {
                    return Err(ClientError::Cancelled);
                }
                let transport = core
                    .transports
                    .first()
                    .cloned()
                    .ok_or(ClientError::IllegalState("no transport registered"))?;

                let mut request = Message::new(META_HANDSHAKE);
                request.version = Some(BAYEUX_VERSION.to_string());
                request.supported_connection_types = Some(
                    core.transports
                        .iter()
                        .map(|t| t.name().to_string())
                        .collect(),
                );
                request.id = Some(core.next_message_id());
                if !core.extensions.outgoing(&mut request) {
                    core.set_disconnected(epoch);
                    return Err(ClientError::Vetoed);
                }

                match transport.send(vec![request]).await {
                    Ok(replies) => {
                        let processed = core.dispatch(replies);
                        let reply = processed
                            .into_iter()
                            .find(|r| r.channel == META_HANDSHAKE);
                        match reply {
                            Some(reply)
                                if reply.successful == Some(true)
                                    && reply.client_id.is_some() =>
                            {
                                let server = reply
                                    .supported_connection_types
                                    .clone()
                                    .unwrap_or_default();
                                let negotiated = core
                                    .transports
                                    .iter()
                                    .find(|t| server.iter().any(|s| s == t.name()))
                                    .cloned()
                                    .unwrap_or(transport);
                                {
                                    let mut state = core.state.lock().unwrap();
                                    if state.epoch != epoch {
                                        return Err(ClientError::Cancelled);
                                    }
                                    state.connection = ConnectionState::Connecting;
                                    state.client_id = reply.client_id.clone();
                                    state.transport = Some(negotiated);
                                    state.attempts = 0;
                                }
                                tokio::spawn(Self::connect_loop(core.clone(), epoch));
                                Self::schedule_flush(&core);
                                return Ok(reply);
                            }
                            Some(reply) => {
                                let retry = matches!(
                                    reply.advice.as_ref().and_then(|a| a.reconnect),
                                    Some(Reconnect::Retry) | Some(Reconnect::Handshake)
                                );
                                if retry {
                                    core.backoff_sleep(epoch).await?;
                                    continue;
                                }
                                // Terminal, e.g. no usable transport in
                                // common: stay disconnected, no retry.
                                core.set_disconnected(epoch);
                                return Ok(reply);
                            }
                            None => {
                                core.backoff_sleep(epoch).await?;
                            }
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "handshake transport failure");
                        core.backoff_sleep(epoch).await?;
                    }
                }
            }
        }
        .boxed()
    }

    /// The connect loop: exactly one outstanding `/meta/connect`, re-armed
    /// on every reply. A lost session (unsuccessful reply advising
    /// handshake, or a transport failure) voids the subscription book and
    /// starts a new handshake campaign; the loop then hands over to the
    /// campaign's freshly spawned loop.
    async fn connect_loop(core: Arc<Self>, epoch: u64) {
        loop {
            let (client_id, transport) = {
                let state = core.state.lock().unwrap();
                if state.epoch != epoch {
                    return;
                }
                match (state.client_id.clone(), state.transport.clone()) {
                    (Some(c), Some(t)) => (c, t),
                    _ => return,
                }
            };

            let mut request = Message::new(META_CONNECT);
            request.client_id = Some(client_id);
            request.connection_type = Some(transport.name().to_string());
            request.id = Some(core.next_message_id());
            if !core.extensions.outgoing(&mut request) {
                tokio::time::sleep(core.options.backoff_increment).await;
                continue;
            }

            match transport.send(vec![request]).await {
                Ok(replies) => {
                    let processed = core.dispatch(replies);
                    let reply = processed.iter().find(|r| r.channel == META_CONNECT);
                    match reply {
                        Some(reply) if reply.successful == Some(true) => {
                            let flush = {
                                let mut state = core.state.lock().unwrap();
                                if state.epoch != epoch {
                                    return;
                                }
                                state.connection = ConnectionState::Connected;
                                state.attempts = 0;
                                !state.queue.is_empty()
                            };
                            if flush {
                                Self::schedule_flush(&core);
                            }
                        }
                        Some(reply) => {
                            let rehandshake = matches!(
                                reply.advice.as_ref().and_then(|a| a.reconnect),
                                Some(Reconnect::Handshake)
                            );
                            if rehandshake {
                                // The session is gone: its subscriptions
                                // are void, listeners and extensions stay.
                                {
                                    let mut state = core.state.lock().unwrap();
                                    if state.epoch != epoch {
                                        return;
                                    }
                                    state.connection = ConnectionState::Handshaking;
                                    state.client_id = None;
                                }
                                core.subscriptions.lock().unwrap().clear();
                                let _ = Self::handshake_cycle(core.clone(), epoch).await;
                                return;
                            }
                            if core.backoff_sleep(epoch).await.is_err() {
                                return;
                            }
                        }
                        None => {
                            // Hold returned only piggybacked data; re-arm.
                        }
                    }
                }
                Err(e) => {
                    debug!(error = %e, "connect transport failure, reconnecting");
                    {
                        let mut state = core.state.lock().unwrap();
                        if state.epoch != epoch {
                            return;
                        }
                        state.connection = ConnectionState::Connecting;
                        state.client_id = None;
                    }
                    core.subscriptions.lock().unwrap().clear();
                    if core.backoff_sleep(epoch).await.is_err() {
                        return;
                    }
                    {
                        let mut state = core.state.lock().unwrap();
                        if state.epoch != epoch {
                            return;
                        }
                        state.connection = ConnectionState::Handshaking;
                    }
                    let _ = Self::handshake_cycle(core.clone(), epoch).await;
                    return;
                }
            }
        }
    }
}
