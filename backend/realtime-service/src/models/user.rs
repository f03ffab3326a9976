use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Profile view of a user as provided by the identity/profile collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub username: String,
    pub avatar: Option<String>,
    /// When false, only followers may start chats or trigger message notifications.
    pub allow_messages: bool,
}

impl UserProfile {
    pub fn new(id: Uuid, name: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            username: username.into(),
            avatar: None,
            allow_messages: true,
        }
    }
}
