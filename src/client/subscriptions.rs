use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::protocol::{ChannelId, Message};

pub type MessageListener = dyn Fn(&Message) + Send + Sync;

/// A handle to one local subscribe call. Several handles may share a single
/// wire-level subscription to the same channel.
#[derive(Debug)]
pub struct Subscription {
    pub(crate) id: u64,
    pub(crate) channel: String,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

/// A handle to a listener registered with `add_listener`. Listeners are not
/// tied to a clientId and survive re-handshake and disconnect.
#[derive(Debug)]
pub struct ListenerHandle {
    pub(crate) id: u64,
    pub(crate) channel: String,
}

pub(crate) enum RemoveOutcome {
    /// The handle matched nothing.
    NotFound,
    /// Other local listeners still share the wire subscription.
    Remaining,
    /// The last local listener is gone; the wire unsubscribe is due.
    Last,
}

/// How a non-first subscriber joins a channel's wire subscription.
pub(crate) enum SharedOutcome {
    /// The server already acknowledged the subscription.
    Established,
    /// The first subscriber's wire message is still in flight; the receiver
    /// resolves with its reply.
    Pending(oneshot::Receiver<Message>),
}

struct ChannelSubs {
    established: bool,
    listeners: Vec<(u64, Arc<MessageListener>)>,
    waiters: Vec<oneshot::Sender<Message>>,
}

/// The client-side subscription book: a per-channel refcount of local
/// listeners sharing one wire-level subscription. Only the 0→1 transition
/// sends a wire subscribe, only the 1→0 transition a wire unsubscribe.
#[derive(Default)]
pub(crate) struct SubscriptionBook {
    next_id: u64,
    channels: HashMap<String, ChannelSubs>,
}

impl SubscriptionBook {
    /// Registers a listener, returning the handle and whether this was the
    /// channel's first local listener.
    pub fn add(&mut self, channel: &str, listener: Arc<MessageListener>) -> (Subscription, bool) {
        self.next_id += 1;
        let id = self.next_id;
        let entry = self.channels.entry(channel.to_string()).or_insert(ChannelSubs {
            established: false,
            listeners: Vec::new(),
            waiters: Vec::new(),
        });
        let first = entry.listeners.is_empty();
        entry.listeners.push((id, listener));
        (
            Subscription {
                id,
                channel: channel.to_string(),
            },
            first,
        )
    }

    /// Marks the channel's wire subscription as acknowledged by the server.
    pub fn establish(&mut self, channel: &str) {
        if let Some(entry) = self.channels.get_mut(channel) {
            entry.established = true;
        }
    }

    /// Joins an existing channel entry: either the wire subscription is
    /// already established, or the caller is parked on the first
    /// subscriber's reply.
    pub fn attach(&mut self, channel: &str) -> SharedOutcome {
        let Some(entry) = self.channels.get_mut(channel) else {
            // Entry vanished between add and attach; treat as settled so the
            // caller synthesizes from current state rather than parking.
            return SharedOutcome::Established;
        };
        if entry.established {
            return SharedOutcome::Established;
        }
        let (tx, rx) = oneshot::channel();
        entry.waiters.push(tx);
        SharedOutcome::Pending(rx)
    }

    /// Applies the first subscriber's wire reply: on success the channel is
    /// established, on denial the whole entry is dropped so a later
    /// subscribe starts a fresh wire attempt. Parked subscribers get the
    /// reply either way.
    pub fn settle(&mut self, channel: &str, reply: &Message) {
        let waiters = if reply.successful == Some(true) {
            let Some(entry) = self.channels.get_mut(channel) else {
                return;
            };
            entry.established = true;
            std::mem::take(&mut entry.waiters)
        } else {
            match self.channels.remove(channel) {
                Some(entry) => entry.waiters,
                None => return,
            }
        };
        for waiter in waiters {
            let _ = waiter.send(reply.clone());
        }
    }

    /// Drops a channel whose wire subscribe never completed; parked
    /// subscribers see their receiver closed.
    pub fn abandon(&mut self, channel: &str) {
        self.channels.remove(channel);
    }

    pub fn remove(&mut self, subscription: &Subscription) -> RemoveOutcome {
        let Some(entry) = self.channels.get_mut(&subscription.channel) else {
            return RemoveOutcome::NotFound;
        };
        let before = entry.listeners.len();
        entry.listeners.retain(|(id, _)| *id != subscription.id);
        if entry.listeners.len() == before {
            return RemoveOutcome::NotFound;
        }
        if entry.listeners.is_empty() {
            self.channels.remove(&subscription.channel);
            RemoveOutcome::Last
        } else {
            RemoveOutcome::Remaining
        }
    }

    /// Voids the whole book: the session that owned the wire subscriptions
    /// is gone and nothing is resent automatically.
    pub fn clear(&mut self) {
        self.channels.clear();
    }

    /// Listeners of established subscriptions whose channel pattern matches
    /// a delivered message, cloned out so invocation runs without the lock.
    pub fn listeners_for(&self, channel: &str) -> Vec<Arc<MessageListener>> {
        let Ok(concrete) = ChannelId::parse(channel) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for (pattern, entry) in &self.channels {
            if !entry.established {
                continue;
            }
            let matched = pattern == channel
                || ChannelId::parse(pattern)
                    .map(|p| p.matches(&concrete))
                    .unwrap_or(false);
            if matched {
                out.extend(entry.listeners.iter().map(|(_, l)| l.clone()));
            }
        }
        out
    }
}

/// Channel listeners registered with `add_listener`: no refcounting, no wire
/// traffic, fired for every matching inbound message including `/meta/*`
/// replies.
#[derive(Default)]
pub(crate) struct ListenerBook {
    next_id: u64,
    listeners: HashMap<String, Vec<(u64, Arc<MessageListener>)>>,
}

impl ListenerBook {
    pub fn add(&mut self, channel: &str, listener: Arc<MessageListener>) -> ListenerHandle {
        self.next_id += 1;
        let id = self.next_id;
        self.listeners
            .entry(channel.to_string())
            .or_default()
            .push((id, listener));
        ListenerHandle {
            id,
            channel: channel.to_string(),
        }
    }

    pub fn remove(&mut self, handle: &ListenerHandle) -> bool {
        let Some(entry) = self.listeners.get_mut(&handle.channel) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|(id, _)| *id != handle.id);
        let removed = entry.len() < before;
        if entry.is_empty() {
            self.listeners.remove(&handle.channel);
        }
        removed
    }

    pub fn matching(&self, channel: &str) -> Vec<Arc<MessageListener>> {
        let concrete = ChannelId::parse(channel).ok();
        let mut out = Vec::new();
        for (pattern, entry) in &self.listeners {
            let matched = pattern == channel
                || match (&concrete, ChannelId::parse(pattern)) {
                    (Some(c), Ok(p)) => p.matches(c),
                    _ => false,
                };
            if matched {
                out.extend(entry.iter().map(|(_, l)| l.clone()));
            }
        }
        out
    }
}
