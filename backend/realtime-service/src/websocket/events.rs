use crate::models::{
    FileAttachment, Message, MessageKind, Notification, Reaction, UserProfile,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inbound frames from a client
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    JoinChat {
        #[serde(alias = "chatId")]
        conversation_id: Uuid,
    },
    #[serde(rename_all = "camelCase")]
    LeaveChat {
        #[serde(alias = "chatId")]
        conversation_id: Uuid,
    },
    #[serde(rename_all = "camelCase")]
    TypingStart {
        #[serde(alias = "chatId")]
        conversation_id: Uuid,
    },
    #[serde(rename_all = "camelCase")]
    TypingStop {
        #[serde(alias = "chatId")]
        conversation_id: Uuid,
    },
    #[serde(rename_all = "camelCase")]
    SendMessage {
        #[serde(alias = "chatId")]
        conversation_id: Uuid,
        #[serde(default)]
        message_type: MessageKind,
        text: Option<String>,
        image: Option<String>,
        file: Option<FileAttachment>,
        #[serde(alias = "replyTo")]
        replied_to: Option<Uuid>,
        /// Echoed back in `message_sent` for optimistic UI reconciliation
        #[serde(alias = "tempId")]
        client_token: Option<String>,
    },
    /// Without `messageId` the whole conversation is marked read.
    #[serde(rename_all = "camelCase")]
    MarkAsRead {
        #[serde(alias = "chatId")]
        conversation_id: Uuid,
        message_id: Option<Uuid>,
    },
    #[serde(rename_all = "camelCase")]
    ReactToMessage { message_id: Uuid, emoji: String },
}

impl ClientEvent {
    /// Wire name, for logs
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinChat { .. } => "join_chat",
            ClientEvent::LeaveChat { .. } => "leave_chat",
            ClientEvent::TypingStart { .. } => "typing_start",
            ClientEvent::TypingStop { .. } => "typing_stop",
            ClientEvent::SendMessage { .. } => "send_message",
            ClientEvent::MarkAsRead { .. } => "mark_as_read",
            ClientEvent::ReactToMessage { .. } => "react_to_message",
        }
    }
}

/// A message with its author's profile attached
#[derive(Debug, Clone, Serialize)]
pub struct PopulatedMessage {
    #[serde(flatten)]
    pub message: Message,
    pub sender: Option<UserProfile>,
}

/// Outbound frames to clients
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    UserOnline {
        user_id: Uuid,
        user: Option<UserProfile>,
        last_seen: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    UserOffline {
        user_id: Uuid,
        last_seen: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    UserTyping { conversation_id: Uuid, user_id: Uuid },
    #[serde(rename_all = "camelCase")]
    UserStopTyping { conversation_id: Uuid, user_id: Uuid },
    #[serde(rename_all = "camelCase")]
    MessageSent {
        conversation_id: Uuid,
        message_id: Uuid,
        client_token: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    NewMessage {
        conversation_id: Uuid,
        message: PopulatedMessage,
    },
    #[serde(rename_all = "camelCase")]
    ChatUpdated {
        conversation_id: Uuid,
        last_message: PopulatedMessage,
        unread_count: i64,
    },
    #[serde(rename_all = "camelCase")]
    MessageDelivered {
        conversation_id: Uuid,
        message_id: Uuid,
        to_user_id: Uuid,
        delivered_at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    MessageRead {
        conversation_id: Uuid,
        message_ids: Vec<Uuid>,
        reader_id: Uuid,
        read_at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    MessageReacted {
        conversation_id: Uuid,
        message_id: Uuid,
        reactions: Vec<Reaction>,
    },
    #[serde(rename_all = "camelCase")]
    MessageDeleted {
        conversation_id: Uuid,
        message_id: Uuid,
    },
    #[serde(rename_all = "camelCase")]
    NotificationReceived {
        notification: Notification,
        unread_count: i64,
    },
    Error {
        code: String,
        message: String,
        retryable: bool,
    },
}

impl ServerEvent {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewMessage;
    use serde_json::json;

    #[test]
    fn test_parse_send_message_with_legacy_names() {
        let chat = Uuid::new_v4();
        let raw = json!({
            "type": "send_message",
            "chatId": chat,
            "text": "hello",
            "messageType": "text",
            "tempId": "tmp-1"
        });
        match serde_json::from_value::<ClientEvent>(raw).unwrap() {
            ClientEvent::SendMessage {
                conversation_id,
                text,
                client_token,
                ..
            } => {
                assert_eq!(conversation_id, chat);
                assert_eq!(text.as_deref(), Some("hello"));
                assert_eq!(client_token.as_deref(), Some("tmp-1"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_mark_as_read_message_id_is_optional() {
        let raw = json!({ "type": "mark_as_read", "conversationId": Uuid::new_v4() });
        let evt: ClientEvent = serde_json::from_value(raw).unwrap();
        assert!(matches!(evt, ClientEvent::MarkAsRead { message_id: None, .. }));
    }

    #[test]
    fn test_unknown_event_type_is_rejected() {
        let raw = json!({ "type": "get_unacked" });
        assert!(serde_json::from_value::<ClientEvent>(raw).is_err());
    }

    #[test]
    fn test_outbound_uses_snake_case_type_and_camel_case_fields() {
        let (conv, user) = (Uuid::new_v4(), Uuid::new_v4());
        let out = ServerEvent::UserTyping {
            conversation_id: conv,
            user_id: user,
        }
        .to_json()
        .unwrap();
        let v: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["type"], "user_typing");
        assert_eq!(v["conversationId"], conv.to_string());
        assert_eq!(v["userId"], user.to_string());
    }

    #[test]
    fn test_populated_message_flattens_fields() {
        let sender = UserProfile::new(Uuid::new_v4(), "Ada", "ada");
        let msg = Message::new(Uuid::new_v4(), sender.id, 7, NewMessage::text("hi"));
        let out = ServerEvent::NewMessage {
            conversation_id: msg.conversation_id,
            message: PopulatedMessage {
                message: msg.clone(),
                sender: Some(sender),
            },
        }
        .to_json()
        .unwrap();
        let v: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["message"]["id"], msg.id.to_string());
        assert_eq!(v["message"]["sequence"], 7);
        assert_eq!(v["message"]["sender"]["username"], "ada");
        assert_eq!(v["message"]["status"], "sent");
    }
}
