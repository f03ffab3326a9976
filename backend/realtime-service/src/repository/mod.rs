//! Durable stores behind async traits.
//!
//! `postgres` is the production backend; `memory` keeps everything in
//! process maps and backs the tests and `STORE_BACKEND=memory`.

use crate::error::AppResult;
use crate::models::{
    Conversation, Message, NewMessage, Notification, NotificationStats, NotificationType,
    ParticipantSettings, SettingsUpdate, UserProfile,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::{
    InMemoryChatRepository, InMemoryMessageRepository, InMemoryNotificationRepository,
    InMemoryUserDirectory,
};
pub use postgres::{
    PgChatRepository, PgMessageRepository, PgNotificationRepository, PgUserDirectory,
};

/// One page of history, oldest first
#[derive(Debug, Clone)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub has_more: bool,
}

#[async_trait]
pub trait ChatRepository: Send + Sync {
    /// Lookup-before-create on the unordered pair. Returns the conversation and
    /// whether it was created by this call.
    async fn find_or_create_direct(&self, a: Uuid, b: Uuid) -> AppResult<(Conversation, bool)>;

    async fn insert_group(&self, conversation: Conversation) -> AppResult<Conversation>;

    async fn get(&self, id: Uuid) -> AppResult<Option<Conversation>>;

    /// Most recently active first
    async fn list_for_user(&self, user_id: Uuid) -> AppResult<Vec<Conversation>>;

    /// Set the last-message pointer, bump activity, +1 unread for everyone but
    /// the sender, all in one step. Returns the updated conversation.
    async fn record_message(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        sender_id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<Conversation>;

    async fn reset_unread(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<()>;

    /// Decrement by at most one, floored at zero. Returns the new count.
    async fn decrement_unread(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<i64>;

    async fn set_unread(&self, conversation_id: Uuid, user_id: Uuid, count: i64) -> AppResult<()>;

    async fn set_typing(&self, conversation_id: Uuid, user_id: Uuid, typing: bool)
        -> AppResult<()>;

    async fn update_settings(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        update: &SettingsUpdate,
    ) -> AppResult<ParticipantSettings>;

    async fn delete(&self, conversation_id: Uuid) -> AppResult<bool>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Persist with status `sent`, the next conversation sequence, and the
    /// sender in the read set.
    async fn insert(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        draft: NewMessage,
    ) -> AppResult<Message>;

    async fn get(&self, id: Uuid) -> AppResult<Option<Message>>;

    /// Page 1 is the newest `per_page` messages. Soft-deleted messages are skipped.
    async fn page(&self, conversation_id: Uuid, page: u32, per_page: u32)
        -> AppResult<MessagePage>;

    /// Returns the message if a delivery receipt was added.
    async fn mark_delivered(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Message>>;

    /// Returns the message if `user_id` had not read it before.
    async fn mark_read(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Message>>;

    /// Mark every message from other senders read. Returns the newly read ones.
    async fn mark_conversation_read(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<Message>>;

    /// Non-deleted messages from other senders that `user_id` has not read
    async fn count_unread(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<i64>;

    async fn set_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str)
        -> AppResult<Option<Message>>;

    async fn soft_delete(&self, message_id: Uuid) -> AppResult<Option<Message>>;

    async fn delete_for_conversation(&self, conversation_id: Uuid) -> AppResult<u64>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn insert(&self, notification: &Notification) -> AppResult<()>;

    async fn exists_since(
        &self,
        recipient_id: Uuid,
        sender_id: Option<Uuid>,
        kind: NotificationType,
        since: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// Newest first
    async fn list(&self, recipient_id: Uuid, offset: i64, limit: i64)
        -> AppResult<Vec<Notification>>;

    async fn count(&self, recipient_id: Uuid) -> AppResult<i64>;

    async fn count_unread(&self, recipient_id: Uuid) -> AppResult<i64>;

    async fn get(&self, id: Uuid) -> AppResult<Option<Notification>>;

    async fn mark_read(&self, id: Uuid) -> AppResult<bool>;

    async fn mark_all_read(&self, recipient_id: Uuid) -> AppResult<u64>;

    async fn delete(&self, id: Uuid) -> AppResult<bool>;

    async fn delete_all(&self, recipient_id: Uuid) -> AppResult<u64>;

    async fn stats(&self, recipient_id: Uuid) -> AppResult<NotificationStats>;

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> AppResult<u64>;
}

/// Read access to the external profile/follow-graph collaborator.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_profile(&self, user_id: Uuid) -> AppResult<Option<UserProfile>>;

    /// Whether `candidate` follows `user_id`
    async fn is_follower(&self, user_id: Uuid, candidate: Uuid) -> AppResult<bool>;

    /// Stamp online state and last-seen on the user record
    async fn set_last_seen(&self, user_id: Uuid, online: bool, at: DateTime<Utc>)
        -> AppResult<()>;
}

/// All stores the service needs, as shared trait objects.
#[derive(Clone)]
pub struct Stores {
    pub chats: Arc<dyn ChatRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
    pub users: Arc<dyn UserDirectory>,
}

impl Stores {
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        Self {
            chats: Arc::new(PgChatRepository::new(pool.clone())),
            messages: Arc::new(PgMessageRepository::new(pool.clone())),
            notifications: Arc::new(PgNotificationRepository::new(pool.clone())),
            users: Arc::new(PgUserDirectory::new(pool)),
        }
    }

    pub fn in_memory(users: Arc<InMemoryUserDirectory>) -> Self {
        Self {
            chats: Arc::new(InMemoryChatRepository::new()),
            messages: Arc::new(InMemoryMessageRepository::new()),
            notifications: Arc::new(InMemoryNotificationRepository::new()),
            users,
        }
    }
}
