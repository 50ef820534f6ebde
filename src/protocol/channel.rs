use std::fmt;

use thiserror::Error;

/// Wildcard kind of a channel id, determined by its last segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Wildcard {
    /// A concrete channel such as `/stock/goog`.
    None,
    /// `*` matches exactly one segment: `/stock/*` matches `/stock/goog`
    /// but not `/stock/goog/trades`.
    Single,
    /// `**` matches the prefix itself and any depth below it: `/stock/**`
    /// matches `/stock`, `/stock/goog` and `/stock/goog/trades`.
    Deep,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelIdError {
    #[error("channel id must start with '/'")]
    MissingSlash,
    #[error("channel id contains an empty segment")]
    EmptySegment,
    #[error("wildcards are only valid as the whole last segment")]
    WildcardPosition,
}

/// A validated, slash-separated Bayeux channel id.
///
/// Meta channels (`/meta/...`) carry the protocol itself; service channels
/// (`/service/...`) are delivered to listeners only and never create
/// network-level subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelId {
    id: String,
    wildcard: Wildcard,
}

impl ChannelId {
    pub fn parse(id: &str) -> Result<Self, ChannelIdError> {
        if !id.starts_with('/') {
            return Err(ChannelIdError::MissingSlash);
        }
        let segments: Vec<&str> = id[1..].split('/').collect();
        let last = segments.len() - 1;
        let mut wildcard = Wildcard::None;
        for (pos, segment) in segments.iter().enumerate() {
            if segment.is_empty() {
                return Err(ChannelIdError::EmptySegment);
            }
            match *segment {
                "*" if pos == last => wildcard = Wildcard::Single,
                "**" if pos == last => wildcard = Wildcard::Deep,
                s if s.contains('*') => return Err(ChannelIdError::WildcardPosition),
                _ => {}
            }
        }
        Ok(Self {
            id: id.to_string(),
            wildcard,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }

    pub fn wildcard(&self) -> Wildcard {
        self.wildcard
    }

    pub fn is_wild(&self) -> bool {
        self.wildcard != Wildcard::None
    }

    pub fn is_meta(&self) -> bool {
        self.id == "/meta" || self.id.starts_with("/meta/")
    }

    pub fn is_service(&self) -> bool {
        self.id == "/service" || self.id.starts_with("/service/")
    }

    fn segments(&self) -> Vec<&str> {
        self.id[1..].split('/').collect()
    }

    /// Segment-wise wildcard match of this id against a concrete channel.
    pub fn matches(&self, concrete: &ChannelId) -> bool {
        let own = self.segments();
        let other = concrete.segments();
        match self.wildcard {
            Wildcard::None => self.id == concrete.id,
            Wildcard::Single => {
                other.len() == own.len() && own[..own.len() - 1] == other[..own.len() - 1]
            }
            Wildcard::Deep => {
                let prefix = &own[..own.len() - 1];
                other.len() >= prefix.len() && &other[..prefix.len()] == prefix
            }
        }
    }

    /// Every ancestor wildcard id of a concrete channel, the set a publish
    /// to this channel must also be routed through. For `/a/b/c` that is
    /// `/a/b/*`, `/**`, `/a/**` and `/a/b/**`.
    pub fn wildcard_expansions(&self) -> Vec<String> {
        if self.is_wild() {
            return Vec::new();
        }
        let segments = self.segments();
        let mut out = Vec::with_capacity(segments.len() + 1);
        let parent = &segments[..segments.len() - 1];
        out.push(format!("/{}", join_with(parent, "*")));
        for depth in 0..segments.len() {
            out.push(format!("/{}", join_with(&segments[..depth], "**")));
        }
        out
    }
}

fn join_with(prefix: &[&str], tail: &str) -> String {
    if prefix.is_empty() {
        tail.to_string()
    } else {
        format!("{}/{}", prefix.join("/"), tail)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}
