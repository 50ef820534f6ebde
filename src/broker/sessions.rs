use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::warn;

use crate::extension::ExtensionPipeline;
use crate::protocol::Message;

/// A server-side session: the queue of messages waiting for the next
/// connect hold, the wake handle for that hold, the session's own extension
/// pipeline and its subscription set.
///
/// Sessions are owned by the `SessionRegistry` and referenced everywhere
/// else by id; channels never hold a session directly.
pub struct Session {
    id: String,
    queue: Mutex<VecDeque<Message>>,
    notify: Notify,
    destroyed: AtomicBool,
    extensions: ExtensionPipeline,
    subscriptions: Mutex<HashSet<String>>,
    last_activity: Mutex<Instant>,
    max_queue: usize,
}

impl Session {
    fn new(id: String, max_queue: usize) -> Self {
        Self {
            id,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            destroyed: AtomicBool::new(false),
            extensions: ExtensionPipeline::new(),
            subscriptions: Mutex::new(HashSet::new()),
            last_activity: Mutex::new(Instant::now()),
            max_queue,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn extensions(&self) -> &ExtensionPipeline {
        &self.extensions
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Queues a message for the next hold. Enqueueing never blocks: a full
    /// queue drops the new message so one stalled consumer cannot grow
    /// without bound, and a destroyed session swallows it silently.
    pub fn enqueue(&self, message: Message) -> bool {
        if self.is_destroyed() {
            return false;
        }
        {
            let mut queue = self.queue.lock().unwrap();
            if queue.len() >= self.max_queue {
                warn!(session = %self.id, channel = %message.channel, "session queue full, dropping message");
                return false;
            }
            queue.push_back(message);
        }
        self.notify.notify_one();
        true
    }

    pub fn drain(&self) -> Vec<Message> {
        self.queue.lock().unwrap().drain(..).collect()
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub(crate) fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    pub(crate) fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn touch(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    pub fn idle(&self) -> Duration {
        self.last_activity.lock().unwrap().elapsed()
    }

    pub(crate) fn add_subscription(&self, channel: &str) -> bool {
        self.subscriptions.lock().unwrap().insert(channel.to_string())
    }

    pub(crate) fn remove_subscription(&self, channel: &str) -> bool {
        self.subscriptions.lock().unwrap().remove(channel)
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.subscriptions.lock().unwrap().contains(channel)
    }

    pub(crate) fn take_subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().drain().collect()
    }
}

/// Identifier-keyed session storage. Ids are UUIDv4: unique and not
/// guessable from earlier ids.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    max_queue: usize,
}

impl SessionRegistry {
    pub fn new(max_queue: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_queue,
        }
    }

    pub fn create(&self) -> Arc<Session> {
        let id = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(Session::new(id.clone(), self.max_queue));
        self.sessions.write().unwrap().insert(id, session.clone());
        session
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().unwrap().get(id).cloned()
    }

    /// Removes the session, marks it destroyed and wakes any held poll.
    /// The caller cascades the returned session's subscriptions into the
    /// `ChannelRegistry`.
    pub fn destroy(&self, id: &str) -> Option<Arc<Session>> {
        let session = self.sessions.write().unwrap().remove(id)?;
        session.destroy();
        Some(session)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().unwrap().is_empty()
    }

    /// Sessions idle longer than `max_interval`, i.e. whose transport has
    /// stopped re-arming the connect hold.
    pub fn expired(&self, max_interval: Duration) -> Vec<String> {
        self.sessions
            .read()
            .unwrap()
            .values()
            .filter(|s| s.idle() > max_interval)
            .map(|s| s.id().to_string())
            .collect()
    }
}
