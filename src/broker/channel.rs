use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use thiserror::Error;

use crate::protocol::{ChannelId, Message};

pub type ListenerId = u64;
pub type ChannelListener = dyn Fn(&Message) + Send + Sync;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubscribeError {
    #[error("meta channels do not allow subscription")]
    MetaChannel,
}

/// A node in the channel namespace: listeners are always invoked on a
/// matching publish, subscribers are sessions that opted in. Wildcard
/// channels hold subscribers for matching delivery but are never the target
/// of an exact publish themselves.
pub struct Channel {
    id: ChannelId,
    persistent: bool,
    subscribers: HashSet<String>,
    listeners: Vec<(ListenerId, Arc<ChannelListener>)>,
}

impl Channel {
    fn new(id: ChannelId) -> Self {
        Self {
            id,
            persistent: false,
            subscribers: HashSet::new(),
            listeners: Vec::new(),
        }
    }

    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn sweepable(&self) -> bool {
        !self.persistent && self.subscribers.is_empty() && self.listeners.is_empty()
    }
}

/// The snapshot a publish resolves to: every listener registered on a
/// matched channel plus the deduplicated subscriber sessions, in a
/// consistent per-publish order.
pub struct MatchSet {
    pub listeners: Vec<Arc<ChannelListener>>,
    pub subscribers: Vec<String>,
}

/// The channel namespace tree. Channels are created lazily on first
/// listener, subscriber or persistence mark, and swept as soon as they are
/// empty and non-persistent. Publish is the read-heavy path; subscription
/// changes are occasional writes.
pub struct ChannelRegistry {
    channels: RwLock<HashMap<String, Channel>>,
    next_listener: AtomicU64,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Ensures the channel exists, creating it lazily.
    pub fn resolve(&self, id: &ChannelId) {
        let mut channels = self.channels.write().unwrap();
        channels
            .entry(id.as_str().to_string())
            .or_insert_with(|| Channel::new(id.clone()));
    }

    pub fn add_listener(&self, id: &ChannelId, listener: Arc<ChannelListener>) -> ListenerId {
        let listener_id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        let mut channels = self.channels.write().unwrap();
        let channel = channels
            .entry(id.as_str().to_string())
            .or_insert_with(|| Channel::new(id.clone()));
        channel.listeners.push((listener_id, listener));
        listener_id
    }

    pub fn remove_listener(&self, channel: &str, listener_id: ListenerId) -> bool {
        let mut channels = self.channels.write().unwrap();
        let Some(entry) = channels.get_mut(channel) else {
            return false;
        };
        let before = entry.listeners.len();
        entry.listeners.retain(|(id, _)| *id != listener_id);
        let removed = entry.listeners.len() < before;
        if entry.sweepable() {
            channels.remove(channel);
        }
        removed
    }

    /// Records a subscription. Meta channels fail permanently; service
    /// channels report success without recording anything, because service
    /// publishes are routed to listeners directly.
    pub fn subscribe(&self, id: &ChannelId, session: &str) -> Result<bool, SubscribeError> {
        if id.is_meta() {
            return Err(SubscribeError::MetaChannel);
        }
        if id.is_service() {
            return Ok(false);
        }
        let mut channels = self.channels.write().unwrap();
        let channel = channels
            .entry(id.as_str().to_string())
            .or_insert_with(|| Channel::new(id.clone()));
        channel.subscribers.insert(session.to_string());
        Ok(true)
    }

    pub fn unsubscribe(&self, channel: &str, session: &str) -> bool {
        let mut channels = self.channels.write().unwrap();
        let Some(entry) = channels.get_mut(channel) else {
            return false;
        };
        let removed = entry.subscribers.remove(session);
        if entry.sweepable() {
            channels.remove(channel);
        }
        removed
    }

    /// Drops every subscription owned by `session`, returning the channels
    /// it was removed from.
    pub fn remove_session(&self, session: &str) -> Vec<String> {
        let mut channels = self.channels.write().unwrap();
        let mut dropped = Vec::new();
        channels.retain(|name, channel| {
            if channel.subscribers.remove(session) {
                dropped.push(name.clone());
            }
            !channel.sweepable()
        });
        dropped
    }

    /// Marks a channel as surviving with zero subscribers and listeners.
    pub fn set_persistent(&self, id: &ChannelId, persistent: bool) {
        let mut channels = self.channels.write().unwrap();
        let channel = channels
            .entry(id.as_str().to_string())
            .or_insert_with(|| Channel::new(id.clone()));
        channel.persistent = persistent;
        if channel.sweepable() {
            channels.remove(id.as_str());
        }
    }

    /// Resolves a published id to the channel itself plus every existing
    /// ancestor wildcard, snapshotting listeners and the deduplicated
    /// subscriber union so delivery runs outside the lock.
    pub fn matching(&self, published: &ChannelId) -> MatchSet {
        let mut names = vec![published.as_str().to_string()];
        names.extend(published.wildcard_expansions());

        let channels = self.channels.read().unwrap();
        let mut listeners = Vec::new();
        let mut subscribers = Vec::new();
        let mut seen = HashSet::new();
        for name in &names {
            let Some(channel) = channels.get(name) else {
                continue;
            };
            listeners.extend(channel.listeners.iter().map(|(_, l)| l.clone()));
            for session in &channel.subscribers {
                if seen.insert(session.clone()) {
                    subscribers.push(session.clone());
                }
            }
        }
        MatchSet {
            listeners,
            subscribers,
        }
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.channels.read().unwrap().contains_key(channel)
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .unwrap()
            .get(channel)
            .map(|c| c.subscribers.len())
            .unwrap_or(0)
    }
}
