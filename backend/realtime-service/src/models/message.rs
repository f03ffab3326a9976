use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Delivery status as observed by the sender.
///
/// Advances forward only (`sending → sent → delivered → read`). Any state
/// except `failed` may move to `failed`, which is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    fn rank(self) -> u8 {
        match self {
            MessageStatus::Sending => 0,
            MessageStatus::Sent => 1,
            MessageStatus::Delivered => 2,
            MessageStatus::Read => 3,
            MessageStatus::Failed => u8::MAX,
        }
    }

    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        match (self, next) {
            (MessageStatus::Failed, _) => false,
            (_, MessageStatus::Failed) => true,
            (current, next) => next.rank() > current.rank(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Sending => "sending",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Failed => "failed",
        }
    }
}

impl FromStr for MessageStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sending" => Ok(MessageStatus::Sending),
            "sent" => Ok(MessageStatus::Sent),
            "delivered" => Ok(MessageStatus::Delivered),
            "read" => Ok(MessageStatus::Read),
            "failed" => Ok(MessageStatus::Failed),
            other => Err(AppError::Validation(format!("unknown message status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
    System,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::File => "file",
            MessageKind::System => "system",
        }
    }
}

impl FromStr for MessageKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageKind::Text),
            "image" => Ok(MessageKind::Image),
            "file" => Ok(MessageKind::File),
            "system" => Ok(MessageKind::System),
            other => Err(AppError::Validation(format!("unknown message type: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAttachment {
    pub url: String,
    pub name: Option<String>,
    pub size: Option<i64>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub user_id: Uuid,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

/// A per-user read or delivery timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub user_id: Uuid,
    pub at: DateTime<Utc>,
}

/// Payload of a message being sent
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    #[serde(default, alias = "messageType")]
    pub kind: MessageKind,
    pub text: Option<String>,
    pub image: Option<String>,
    pub file: Option<FileAttachment>,
    #[serde(alias = "repliedTo")]
    pub reply_to: Option<Uuid>,
}

impl NewMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    /// Per-conversation monotonic position
    pub sequence: i64,
    #[serde(rename = "messageType")]
    pub kind: MessageKind,
    pub text: Option<String>,
    pub image: Option<String>,
    pub file: Option<FileAttachment>,
    pub status: MessageStatus,
    /// Includes the sender
    pub read_by: Vec<Receipt>,
    pub delivered_to: Vec<Receipt>,
    pub reply_to: Option<Uuid>,
    pub reactions: Vec<Reaction>,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Build a freshly sent message; the sender is already in the read set.
    pub fn new(conversation_id: Uuid, sender_id: Uuid, sequence: i64, draft: NewMessage) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            sequence,
            kind: draft.kind,
            text: draft.text,
            image: draft.image,
            file: draft.file,
            status: MessageStatus::Sent,
            read_by: vec![Receipt {
                user_id: sender_id,
                at: now,
            }],
            delivered_to: Vec::new(),
            reply_to: draft.reply_to,
            reactions: Vec::new(),
            deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_read_by(&self, user_id: Uuid) -> bool {
        self.read_by.iter().any(|r| r.user_id == user_id)
    }

    pub fn is_delivered_to(&self, user_id: Uuid) -> bool {
        self.delivered_to.iter().any(|r| r.user_id == user_id)
    }

    /// Readers other than the sender
    pub fn has_recipient_reads(&self) -> bool {
        self.read_by.iter().any(|r| r.user_id != self.sender_id)
    }

    /// Record a delivery receipt for `user_id` unless they already have one or
    /// have read the message. The message status only moves `sent -> delivered`,
    /// so a late timer can never pull `read` back to `delivered`.
    pub fn mark_delivered(&mut self, user_id: Uuid, at: DateTime<Utc>) -> bool {
        if user_id == self.sender_id
            || self.status == MessageStatus::Failed
            || self.is_delivered_to(user_id)
            || self.is_read_by(user_id)
        {
            return false;
        }
        self.delivered_to.push(Receipt { user_id, at });
        if self.status == MessageStatus::Sent {
            self.status = MessageStatus::Delivered;
        }
        self.updated_at = at;
        true
    }

    /// Record a read by `user_id`. Returns false if already read by them.
    pub fn mark_read(&mut self, user_id: Uuid, at: DateTime<Utc>) -> bool {
        if self.is_read_by(user_id) {
            return false;
        }
        self.read_by.push(Receipt { user_id, at });
        if user_id != self.sender_id && self.status.can_transition_to(MessageStatus::Read) {
            self.status = MessageStatus::Read;
        }
        self.updated_at = at;
        true
    }

    pub fn mark_failed(&mut self) -> bool {
        if !self.status.can_transition_to(MessageStatus::Failed) {
            return false;
        }
        self.status = MessageStatus::Failed;
        self.updated_at = Utc::now();
        true
    }

    /// Replace-or-insert: at most one reaction per user.
    pub fn upsert_reaction(&mut self, user_id: Uuid, emoji: String) {
        self.reactions.retain(|r| r.user_id != user_id);
        self.reactions.push(Reaction {
            user_id,
            emoji,
            created_at: Utc::now(),
        });
        self.updated_at = Utc::now();
    }

    /// Clear content but keep the record for ordering and reply threading.
    pub fn soft_delete(&mut self) {
        self.deleted = true;
        self.text = None;
        self.image = None;
        self.file = None;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Message, Uuid, Uuid) {
        let (sender, recipient) = (Uuid::new_v4(), Uuid::new_v4());
        let msg = Message::new(Uuid::new_v4(), sender, 1, NewMessage::text("hi"));
        (msg, sender, recipient)
    }

    #[test]
    fn test_status_only_moves_forward() {
        use MessageStatus::*;
        assert!(Sent.can_transition_to(Delivered));
        assert!(Sent.can_transition_to(Read));
        assert!(Delivered.can_transition_to(Read));
        assert!(!Read.can_transition_to(Delivered));
        assert!(!Delivered.can_transition_to(Sent));
        assert!(!Sent.can_transition_to(Sent));
        assert!(Read.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Read));
    }

    #[test]
    fn test_new_message_is_sent_and_read_by_sender() {
        let (msg, sender, _) = sample();
        assert_eq!(msg.status, MessageStatus::Sent);
        assert!(msg.is_read_by(sender));
        assert!(!msg.has_recipient_reads());
    }

    #[test]
    fn test_delivery_after_read_is_ignored() {
        let (mut msg, _, recipient) = sample();
        assert!(msg.mark_read(recipient, Utc::now()));
        assert!(!msg.mark_delivered(recipient, Utc::now()));
        assert_eq!(msg.status, MessageStatus::Read);
        assert!(msg.delivered_to.is_empty());
    }

    #[test]
    fn test_group_delivery_receipt_survives_another_reader() {
        let (mut msg, _, first) = sample();
        let second = Uuid::new_v4();
        assert!(msg.mark_read(first, Utc::now()));
        assert!(msg.mark_delivered(second, Utc::now()));
        assert!(msg.is_delivered_to(second));
        assert_eq!(msg.status, MessageStatus::Read);
        assert!(!msg.mark_delivered(second, Utc::now()));
    }

    #[test]
    fn test_delivered_then_read() {
        let (mut msg, _, recipient) = sample();
        assert!(msg.mark_delivered(recipient, Utc::now()));
        assert_eq!(msg.status, MessageStatus::Delivered);
        assert!(!msg.has_recipient_reads());
        assert!(msg.mark_read(recipient, Utc::now()));
        assert_eq!(msg.status, MessageStatus::Read);
        assert!(!msg.mark_read(recipient, Utc::now()));
    }

    #[test]
    fn test_failed_is_terminal() {
        let (mut msg, _, recipient) = sample();
        assert!(msg.mark_failed());
        assert!(!msg.mark_delivered(recipient, Utc::now()));
        msg.mark_read(recipient, Utc::now());
        assert_eq!(msg.status, MessageStatus::Failed);
    }

    #[test]
    fn test_reaction_replaces_previous_from_same_user() {
        let (mut msg, sender, recipient) = sample();
        msg.upsert_reaction(recipient, "👍".into());
        msg.upsert_reaction(sender, "😂".into());
        msg.upsert_reaction(recipient, "❤️".into());
        assert_eq!(msg.reactions.len(), 2);
        let mine: Vec<_> = msg
            .reactions
            .iter()
            .filter(|r| r.user_id == recipient)
            .collect();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].emoji, "❤️");
    }

    #[test]
    fn test_soft_delete_clears_content() {
        let (mut msg, _, _) = sample();
        msg.soft_delete();
        assert!(msg.deleted);
        assert!(msg.text.is_none());
        assert_eq!(msg.sequence, 1);
    }
}
