use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Like,
    Comment,
    Follow,
    Message,
    Mention,
    Admired,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Like => "like",
            NotificationType::Comment => "comment",
            NotificationType::Follow => "follow",
            NotificationType::Message => "message",
            NotificationType::Mention => "mention",
            NotificationType::Admired => "admired",
        }
    }

    /// Every comment is distinct content, so comments always notify.
    pub fn is_deduplicated(&self) -> bool {
        !matches!(self, NotificationType::Comment)
    }
}

impl FromStr for NotificationType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "like" => Ok(NotificationType::Like),
            "comment" => Ok(NotificationType::Comment),
            "follow" => Ok(NotificationType::Follow),
            "message" => Ok(NotificationType::Message),
            "mention" => Ok(NotificationType::Mention),
            "admired" => Ok(NotificationType::Admired),
            other => Err(AppError::Validation(format!(
                "invalid notification type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    /// Absent for system notifications
    pub sender_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub post_id: Option<Uuid>,
    pub comment_id: Option<Uuid>,
    pub data: serde_json::Value,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// What the triggering event points at, plus an opaque payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationContext {
    pub post_id: Option<Uuid>,
    pub comment_id: Option<Uuid>,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationStats {
    pub total: i64,
    pub unread: i64,
    pub likes: i64,
    pub comments: i64,
    pub follows: i64,
    pub mentions: i64,
}

/// Why a notification was dropped without being an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressReason {
    SelfNotification,
    Duplicate,
    PrivacyDisabled,
}

impl SuppressReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuppressReason::SelfNotification => "self_notification",
            SuppressReason::Duplicate => "duplicate",
            SuppressReason::PrivacyDisabled => "privacy_disabled",
        }
    }
}

#[derive(Debug, Clone)]
pub enum NotifyOutcome {
    Created(Notification),
    Suppressed(SuppressReason),
}

impl NotifyOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, NotifyOutcome::Created(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_closed_enumeration() {
        assert_eq!(
            "admired".parse::<NotificationType>().unwrap(),
            NotificationType::Admired
        );
        let err = "poke".parse::<NotificationType>().unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_only_comments_skip_dedupe() {
        assert!(!NotificationType::Comment.is_deduplicated());
        assert!(NotificationType::Like.is_deduplicated());
        assert!(NotificationType::Message.is_deduplicated());
    }

    #[test]
    fn test_type_serialized_under_type_key() {
        let n = Notification {
            id: Uuid::new_v4(),
            recipient_id: Uuid::new_v4(),
            sender_id: None,
            kind: NotificationType::Follow,
            post_id: None,
            comment_id: None,
            data: serde_json::Value::Null,
            read: false,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["type"], "follow");
        assert_eq!(json["read"], false);
    }
}
