use std::fmt;
use uuid::Uuid;

/// Unique identifier for one live connection (one socket, one tab).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A fan-out target. Every connection is implicitly joined to its user's
/// private channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Conversation(Uuid),
    User(Uuid),
}

impl Channel {
    /// The one canonical wire name for a channel.
    pub fn name(&self) -> String {
        match self {
            Channel::Conversation(id) => format!("conversation:{id}"),
            Channel::User(id) => format!("user:{id}"),
        }
    }

    pub fn conversation_id(&self) -> Option<Uuid> {
        match self {
            Channel::Conversation(id) => Some(*id),
            Channel::User(_) => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names_are_prefixed() {
        let id = Uuid::nil();
        assert_eq!(
            Channel::Conversation(id).name(),
            "conversation:00000000-0000-0000-0000-000000000000"
        );
        assert!(Channel::User(id).name().starts_with("user:"));
        assert_ne!(Channel::User(id), Channel::Conversation(id));
    }
}
