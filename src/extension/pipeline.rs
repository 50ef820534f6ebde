use std::sync::{Arc, RwLock};

use crate::protocol::Message;

/// A message interceptor. Every hook has a default body, so an extension
/// implements only the directions it cares about. Hooks may mutate the
/// message in place; returning `false` vetoes it: an incoming veto drops the
/// message from all further processing, an outgoing veto cancels the send
/// and fails any pending reply.
///
/// Extensions keep private state in the message `ext` map or behind their
/// own interior mutability; hooks run synchronously and must not block.
pub trait Extension: Send + Sync {
    fn incoming(&self, message: &mut Message) -> bool {
        let _ = message;
        true
    }

    fn outgoing(&self, message: &mut Message) -> bool {
        let _ = message;
        true
    }

    /// Called when the extension is added to a pipeline.
    fn registered(&self) {}

    /// Called when the extension is removed from a pipeline.
    fn unregistered(&self) {}
}

/// An ordered extension chain. Registration order governs both directions
/// identically; the first veto stops the chain.
///
/// Pipelines are per-instance: the server pipeline, a server session's
/// pipeline and a client's pipeline each see a message once per hop.
#[derive(Default)]
pub struct ExtensionPipeline {
    extensions: RwLock<Vec<(String, Arc<dyn Extension>)>>,
}

impl ExtensionPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, extension: Arc<dyn Extension>) {
        extension.registered();
        self.extensions
            .write()
            .unwrap()
            .push((name.to_string(), extension));
    }

    pub fn unregister(&self, name: &str) -> bool {
        let removed = {
            let mut extensions = self.extensions.write().unwrap();
            match extensions.iter().position(|(n, _)| n == name) {
                Some(pos) => Some(extensions.remove(pos).1),
                None => None,
            }
        };
        match removed {
            Some(extension) => {
                extension.unregistered();
                true
            }
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.read().unwrap().is_empty()
    }

    /// Runs the incoming hooks in registration order. `false` means the
    /// message was vetoed and must not be processed further.
    pub fn incoming(&self, message: &mut Message) -> bool {
        let extensions = self.snapshot();
        for extension in extensions {
            if !extension.incoming(message) {
                return false;
            }
        }
        true
    }

    /// Runs the outgoing hooks in registration order. `false` means the
    /// send is cancelled.
    pub fn outgoing(&self, message: &mut Message) -> bool {
        let extensions = self.snapshot();
        for extension in extensions {
            if !extension.outgoing(message) {
                return false;
            }
        }
        true
    }

    fn snapshot(&self) -> Vec<Arc<dyn Extension>> {
        self.extensions
            .read()
            .unwrap()
            .iter()
            .map(|(_, e)| e.clone())
            .collect()
    }
}
