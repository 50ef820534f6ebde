use crate::protocol::{ChannelId, Message};

use super::sessions::Session;

/// The authorization decision hook. Policy logic itself lives outside the
/// bus; the default grants everything.
pub trait SecurityPolicy: Send + Sync {
    fn can_handshake(&self, message: &Message) -> bool {
        let _ = message;
        true
    }

    fn can_subscribe(&self, session: &Session, channel: &ChannelId) -> bool {
        let _ = (session, channel);
        true
    }

    fn can_publish(&self, session: Option<&Session>, channel: &ChannelId, message: &Message) -> bool {
        let _ = (session, channel, message);
        true
    }
}

/// The default policy: every handshake, subscribe and publish is allowed.
pub struct AllowAll;

impl SecurityPolicy for AllowAll {}
