//! Read receipts and per-participant unread counters.
//!
//! The counter on the conversation is a cache. The message collection is the
//! source of truth and `reconcile` repairs any drift from it.

use super::emit;
use crate::error::{AppError, AppResult, Resource};
use crate::metrics;
use crate::models::{Conversation, Message, MessageStatus};
use crate::presence::{Channel, PresenceRegistry};
use crate::repository::Stores;
use crate::websocket::events::{PopulatedMessage, ServerEvent};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct UnreadService {
    stores: Stores,
    presence: Arc<dyn PresenceRegistry>,
}

impl UnreadService {
    pub fn new(stores: Stores, presence: Arc<dyn PresenceRegistry>) -> Self {
        Self { stores, presence }
    }

    /// Load a conversation the caller participates in.
    pub async fn participant_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> AppResult<Conversation> {
        let conversation = self
            .stores
            .chats
            .get(conversation_id)
            .await?
            .ok_or(AppError::NotFound(Resource::Conversation))?;
        if !conversation.is_participant(user_id) {
            return Err(AppError::Forbidden);
        }
        Ok(conversation)
    }

    /// Mark one message read. Returns the updated message, or `None` when the
    /// reader had already read it.
    pub async fn mark_read(&self, user_id: Uuid, message_id: Uuid) -> AppResult<Option<Message>> {
        let message = self
            .stores
            .messages
            .get(message_id)
            .await?
            .ok_or(AppError::NotFound(Resource::Message))?;
        self.participant_conversation(user_id, message.conversation_id)
            .await?;

        let now = Utc::now();
        let Some(updated) = self
            .stores
            .messages
            .mark_read(message_id, user_id, now)
            .await?
        else {
            return Ok(None);
        };

        // A soft-deleted message already left the counter when it was deleted.
        if user_id != updated.sender_id && !message.deleted {
            let remaining = self
                .stores
                .chats
                .decrement_unread(updated.conversation_id, user_id)
                .await?;
            if updated.status == MessageStatus::Read && message.status != MessageStatus::Read {
                metrics::STATUS_TRANSITIONS_TOTAL
                    .with_label_values(&["read"])
                    .inc();
            }
            debug!(
                message_id = %message_id,
                reader_id = %user_id,
                remaining,
                "message read"
            );
            self.notify_sender(
                updated.sender_id,
                updated.conversation_id,
                vec![updated.id],
                user_id,
                now,
            )
            .await;
        }

        Ok(Some(updated))
    }

    /// Mark everything from other senders read and zero the caller's counter.
    /// Returns the ids of messages that were newly read.
    pub async fn mark_conversation_read(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> AppResult<Vec<Uuid>> {
        self.participant_conversation(user_id, conversation_id)
            .await?;

        let now = Utc::now();
        let newly_read = self
            .stores
            .messages
            .mark_conversation_read(conversation_id, user_id, now)
            .await?;
        self.stores
            .chats
            .reset_unread(conversation_id, user_id)
            .await?;

        if !newly_read.is_empty() {
            metrics::STATUS_TRANSITIONS_TOTAL
                .with_label_values(&["read"])
                .inc_by(newly_read.len() as u64);
        }

        let mut by_sender: BTreeMap<Uuid, Vec<Uuid>> = BTreeMap::new();
        for message in &newly_read {
            by_sender.entry(message.sender_id).or_default().push(message.id);
        }
        for (sender_id, ids) in by_sender {
            self.notify_sender(sender_id, conversation_id, ids, user_id, now)
                .await;
        }

        Ok(newly_read.into_iter().map(|m| m.id).collect())
    }

    /// Drop a soft-deleted message from the counters of everyone who had not
    /// read it, then refresh each participant's chat list entry.
    pub async fn forget_deleted(&self, message: &Message) -> AppResult<()> {
        let conversation = self
            .stores
            .chats
            .get(message.conversation_id)
            .await?
            .ok_or(AppError::NotFound(Resource::Conversation))?;

        for participant in &conversation.participants {
            if *participant == message.sender_id || message.is_read_by(*participant) {
                continue;
            }
            self.stores
                .chats
                .decrement_unread(conversation.id, *participant)
                .await?;
        }

        let Some(conversation) = self.stores.chats.get(conversation.id).await? else {
            return Ok(());
        };
        let Some(last_id) = conversation.last_message_id else {
            return Ok(());
        };
        let Some(last) = self.stores.messages.get(last_id).await? else {
            return Ok(());
        };
        let sender = match self.stores.users.get_profile(last.sender_id).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(sender_id = %last.sender_id, error = %e, "sender profile lookup failed");
                None
            }
        };
        let last_message = PopulatedMessage {
            message: last,
            sender,
        };

        for participant in &conversation.participants {
            let update = ServerEvent::ChatUpdated {
                conversation_id: conversation.id,
                last_message: last_message.clone(),
                unread_count: conversation.unread_for(*participant),
            };
            emit(self.presence.as_ref(), Channel::User(*participant), &update, None).await;
        }
        Ok(())
    }

    /// Recount unread messages for `user_id` and repair the cached counter if
    /// it drifted. Returns the authoritative count.
    pub async fn reconcile(&self, user_id: Uuid, conversation: &Conversation) -> AppResult<i64> {
        let actual = self
            .stores
            .messages
            .count_unread(conversation.id, user_id)
            .await?;
        let cached = conversation.unread_for(user_id);
        if actual != cached {
            warn!(
                conversation_id = %conversation.id,
                user_id = %user_id,
                cached,
                actual,
                "unread counter drifted, repairing"
            );
            self.stores
                .chats
                .set_unread(conversation.id, user_id, actual)
                .await?;
        }
        Ok(actual)
    }

    async fn notify_sender(
        &self,
        sender_id: Uuid,
        conversation_id: Uuid,
        message_ids: Vec<Uuid>,
        reader_id: Uuid,
        read_at: DateTime<Utc>,
    ) {
        let event = ServerEvent::MessageRead {
            conversation_id,
            message_ids,
            reader_id,
            read_at,
        };
        emit(self.presence.as_ref(), Channel::User(sender_id), &event, None).await;
    }
}
