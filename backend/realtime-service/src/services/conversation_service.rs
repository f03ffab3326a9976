use super::emit;
use super::message_pipeline::MessagePipeline;
use super::unread::UnreadService;
use crate::error::{AppError, AppResult, Resource};
use crate::models::{Conversation, Message, NewMessage, ParticipantSettings, SettingsUpdate};
use crate::presence::{Channel, ConnectionId, PresenceRegistry};
use crate::repository::{MessagePage, Stores};
use crate::websocket::events::ServerEvent;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub const HISTORY_PAGE_SIZE: u32 = 50;
const MAX_EMOJI_CHARS: usize = 16;
const MAX_GROUP_NAME_CHARS: usize = 100;

/// A conversation as listed for one participant
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub last_message: Option<Message>,
    pub unread_count: i64,
}

pub struct ConversationService {
    stores: Stores,
    presence: Arc<dyn PresenceRegistry>,
    pipeline: Arc<MessagePipeline>,
    unread: Arc<UnreadService>,
}

impl ConversationService {
    pub fn new(
        stores: Stores,
        presence: Arc<dyn PresenceRegistry>,
        pipeline: Arc<MessagePipeline>,
        unread: Arc<UnreadService>,
    ) -> Self {
        Self {
            stores,
            presence,
            pipeline,
            unread,
        }
    }

    pub async fn require_participant(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> AppResult<Conversation> {
        self.unread
            .participant_conversation(user_id, conversation_id)
            .await
    }

    /// Conversations for `user_id`, most recently active first, with the
    /// caller's unread count recomputed from the messages.
    pub async fn list(&self, user_id: Uuid) -> AppResult<Vec<ConversationView>> {
        let conversations = self.stores.chats.list_for_user(user_id).await?;
        let mut views = Vec::with_capacity(conversations.len());
        for mut conversation in conversations {
            let unread_count = self.unread.reconcile(user_id, &conversation).await?;
            conversation.unread_counts.insert(user_id, unread_count);
            let last_message = match conversation.last_message_id {
                Some(id) => self.stores.messages.get(id).await?,
                None => None,
            };
            views.push(ConversationView {
                conversation,
                last_message,
                unread_count,
            });
        }
        Ok(views)
    }

    /// Find-or-create the direct conversation with `receiver_id`.
    pub async fn start_direct(
        &self,
        user_id: Uuid,
        receiver_id: Uuid,
    ) -> AppResult<(Conversation, bool)> {
        if user_id == receiver_id {
            return Err(AppError::Validation(
                "cannot start a conversation with yourself".into(),
            ));
        }
        let receiver = self
            .stores
            .users
            .get_profile(receiver_id)
            .await?
            .ok_or(AppError::NotFound(Resource::User))?;
        if !receiver.allow_messages && !self.stores.users.is_follower(receiver_id, user_id).await? {
            return Err(AppError::Forbidden);
        }

        let (conversation, created) = self
            .stores
            .chats
            .find_or_create_direct(user_id, receiver_id)
            .await?;
        if created {
            info!(
                conversation_id = %conversation.id,
                user_id = %user_id,
                receiver_id = %receiver_id,
                "direct conversation created"
            );
        }
        Ok((conversation, created))
    }

    pub async fn create_group(
        &self,
        creator_id: Uuid,
        name: String,
        participant_ids: Vec<Uuid>,
    ) -> AppResult<Conversation> {
        let name = name.trim().to_string();
        if name.is_empty() || name.chars().count() > MAX_GROUP_NAME_CHARS {
            return Err(AppError::Validation(format!(
                "group name must be 1-{MAX_GROUP_NAME_CHARS} characters"
            )));
        }

        let mut seen = HashSet::new();
        let participants: Vec<Uuid> = std::iter::once(creator_id)
            .chain(participant_ids)
            .filter(|id| seen.insert(*id))
            .collect();
        if participants.len() < 2 {
            return Err(AppError::Validation(
                "a group needs at least one other participant".into(),
            ));
        }
        for id in &participants[1..] {
            if self.stores.users.get_profile(*id).await?.is_none() {
                return Err(AppError::NotFound(Resource::User));
            }
        }

        let conversation = self
            .stores
            .chats
            .insert_group(Conversation::new_group(name, creator_id, participants))
            .await?;
        info!(
            conversation_id = %conversation.id,
            admin_id = %creator_id,
            members = conversation.participants.len(),
            "group conversation created"
        );
        Ok(conversation)
    }

    pub async fn update_settings(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        update: SettingsUpdate,
    ) -> AppResult<ParticipantSettings> {
        self.require_participant(user_id, conversation_id).await?;
        self.stores
            .chats
            .update_settings(conversation_id, user_id, &update)
            .await
    }

    /// One page of history. Viewing marks the conversation read for the caller.
    pub async fn history(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        page: u32,
    ) -> AppResult<MessagePage> {
        self.require_participant(user_id, conversation_id).await?;
        self.unread
            .mark_conversation_read(user_id, conversation_id)
            .await?;
        self.stores
            .messages
            .page(conversation_id, page.max(1), HISTORY_PAGE_SIZE)
            .await
    }

    pub async fn send(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        draft: NewMessage,
        origin: Option<ConnectionId>,
        client_token: Option<String>,
    ) -> AppResult<Message> {
        self.pipeline
            .send(user_id, conversation_id, draft, origin, client_token)
            .await
    }

    pub async fn mark_read(&self, user_id: Uuid, message_id: Uuid) -> AppResult<Option<Message>> {
        self.unread.mark_read(user_id, message_id).await
    }

    pub async fn mark_conversation_read(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> AppResult<Vec<Uuid>> {
        self.unread
            .mark_conversation_read(user_id, conversation_id)
            .await
    }

    /// Replace-or-insert the caller's reaction and broadcast the new list.
    pub async fn react(&self, user_id: Uuid, message_id: Uuid, emoji: &str) -> AppResult<Message> {
        let emoji = emoji.trim();
        if emoji.is_empty() || emoji.chars().count() > MAX_EMOJI_CHARS {
            return Err(AppError::Validation("emoji is required".into()));
        }
        let message = self.existing_message(message_id).await?;
        self.require_participant(user_id, message.conversation_id)
            .await?;

        let updated = self
            .stores
            .messages
            .set_reaction(message_id, user_id, emoji)
            .await?
            .ok_or(AppError::NotFound(Resource::Message))?;

        emit(
            self.presence.as_ref(),
            Channel::Conversation(updated.conversation_id),
            &ServerEvent::MessageReacted {
                conversation_id: updated.conversation_id,
                message_id,
                reactions: updated.reactions.clone(),
            },
            None,
        )
        .await;
        Ok(updated)
    }

    /// Soft delete; only the sender may delete.
    pub async fn delete_message(&self, user_id: Uuid, message_id: Uuid) -> AppResult<Message> {
        let message = self.existing_message(message_id).await?;
        if message.sender_id != user_id {
            return Err(AppError::Forbidden);
        }

        let deleted = self
            .stores
            .messages
            .soft_delete(message_id)
            .await?
            .ok_or(AppError::NotFound(Resource::Message))?;

        if !message.deleted {
            if let Err(e) = self.unread.forget_deleted(&message).await {
                warn!(message_id = %message_id, error = %e, "unread counters not adjusted after delete");
            }
        }

        emit(
            self.presence.as_ref(),
            Channel::Conversation(deleted.conversation_id),
            &ServerEvent::MessageDeleted {
                conversation_id: deleted.conversation_id,
                message_id,
            },
            None,
        )
        .await;
        Ok(deleted)
    }

    /// Hard delete, cascading to every message in the conversation.
    pub async fn delete_conversation(&self, user_id: Uuid, conversation_id: Uuid) -> AppResult<u64> {
        self.require_participant(user_id, conversation_id).await?;
        let removed = self
            .stores
            .messages
            .delete_for_conversation(conversation_id)
            .await?;
        if !self.stores.chats.delete(conversation_id).await? {
            warn!(conversation_id = %conversation_id, "conversation vanished during delete");
        }
        info!(
            conversation_id = %conversation_id,
            user_id = %user_id,
            messages = removed,
            "conversation deleted"
        );
        Ok(removed)
    }

    async fn existing_message(&self, message_id: Uuid) -> AppResult<Message> {
        self.stores
            .messages
            .get(message_id)
            .await?
            .ok_or(AppError::NotFound(Resource::Message))
    }
}
