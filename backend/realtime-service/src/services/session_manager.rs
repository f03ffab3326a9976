//! Per-connection protocol handling for the realtime channel.
//!
//! Errors from an inbound event go back to the originating connection only and
//! never end the session.

use super::conversation_service::ConversationService;
use super::emit;
use crate::error::{AppError, AppResult};
use crate::models::NewMessage;
use crate::presence::{Channel, ConnectionId, OutboundSender, PresenceRegistry};
use crate::repository::Stores;
use crate::websocket::events::{ClientEvent, ServerEvent};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub struct RealtimeSessionManager {
    presence: Arc<dyn PresenceRegistry>,
    stores: Stores,
    conversations: Arc<ConversationService>,
    /// Conversations each connection is currently typing in
    typing: DashMap<ConnectionId, HashSet<Uuid>>,
}

impl RealtimeSessionManager {
    pub fn new(
        presence: Arc<dyn PresenceRegistry>,
        stores: Stores,
        conversations: Arc<ConversationService>,
    ) -> Self {
        Self {
            presence,
            stores,
            conversations,
            typing: DashMap::new(),
        }
    }

    /// Register a verified connection. The first connection of a user flips
    /// them online for everyone else.
    pub async fn connect(&self, connection: ConnectionId, user_id: Uuid, sender: OutboundSender) {
        let went_online = self.presence.register(connection, user_id, sender).await;
        info!(connection_id = %connection, user_id = %user_id, "realtime session connected");
        if !went_online {
            return;
        }

        let now = Utc::now();
        if let Err(e) = self.stores.users.set_last_seen(user_id, true, now).await {
            warn!(user_id = %user_id, error = %e, "failed to stamp online status");
        }
        let user = match self.stores.users.get_profile(user_id).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "profile lookup failed");
                None
            }
        };
        self.broadcast(
            &ServerEvent::UserOnline {
                user_id,
                user,
                last_seen: now,
            },
            Some(connection),
        )
        .await;
    }

    /// Tear down a connection: presence, typing it contributed, and the
    /// offline signal when it was the user's last one.
    pub async fn disconnect(&self, connection: ConnectionId) {
        let Some(departure) = self.presence.deregister(connection).await else {
            return;
        };
        let user_id = departure.user_id;

        if let Some((_, conversations)) = self.typing.remove(&connection) {
            let still_typing = self.typing_elsewhere(user_id).await;
            for conversation_id in conversations {
                if !still_typing.contains(&conversation_id) {
                    self.clear_typing(user_id, conversation_id, None).await;
                }
            }
        }

        info!(
            connection_id = %connection,
            user_id = %user_id,
            went_offline = departure.went_offline,
            "realtime session disconnected"
        );
        if !departure.went_offline {
            return;
        }

        let now = Utc::now();
        if let Err(e) = self.stores.users.set_last_seen(user_id, false, now).await {
            warn!(user_id = %user_id, error = %e, "failed to stamp last seen");
        }
        self.broadcast(
            &ServerEvent::UserOffline {
                user_id,
                last_seen: now,
            },
            None,
        )
        .await;
    }

    /// Dispatch one inbound frame. Never fails: errors become an `error`
    /// frame on the calling connection.
    pub async fn handle_event(&self, connection: ConnectionId, user_id: Uuid, event: ClientEvent) {
        let name = event.name();
        if let Err(e) = self.dispatch(connection, user_id, event).await {
            if e.is_retryable() {
                error!(
                    connection_id = %connection,
                    user_id = %user_id,
                    event = name,
                    error = %e,
                    "realtime event failed"
                );
            } else {
                debug!(event = name, error = %e, "realtime event rejected");
            }
            self.reject(connection, &e).await;
        }
    }

    async fn dispatch(
        &self,
        connection: ConnectionId,
        user_id: Uuid,
        event: ClientEvent,
    ) -> AppResult<()> {
        match event {
            ClientEvent::JoinChat { conversation_id } => {
                self.join_conversation(connection, user_id, conversation_id)
                    .await
            }
            ClientEvent::LeaveChat { conversation_id } => {
                self.leave_conversation(connection, user_id, conversation_id)
                    .await;
                Ok(())
            }
            ClientEvent::TypingStart { conversation_id } => {
                self.start_typing(connection, user_id, conversation_id)
                    .await
            }
            ClientEvent::TypingStop { conversation_id } => {
                self.stop_typing(connection, user_id, conversation_id)
                    .await
            }
            ClientEvent::SendMessage {
                conversation_id,
                message_type,
                text,
                image,
                file,
                replied_to,
                client_token,
            } => {
                let draft = NewMessage {
                    kind: message_type,
                    text,
                    image,
                    file,
                    reply_to: replied_to,
                };
                self.stop_typing_quietly(connection, user_id, conversation_id)
                    .await;
                self.conversations
                    .send(
                        user_id,
                        conversation_id,
                        draft,
                        Some(connection),
                        client_token,
                    )
                    .await
                    .map(|_| ())
            }
            ClientEvent::MarkAsRead {
                message_id: Some(message_id),
                ..
            } => self
                .conversations
                .mark_read(user_id, message_id)
                .await
                .map(|_| ()),
            ClientEvent::MarkAsRead {
                conversation_id,
                message_id: None,
            } => self
                .conversations
                .mark_conversation_read(user_id, conversation_id)
                .await
                .map(|_| ()),
            ClientEvent::ReactToMessage { message_id, emoji } => self
                .conversations
                .react(user_id, message_id, &emoji)
                .await
                .map(|_| ()),
        }
    }

    pub async fn join_conversation(
        &self,
        connection: ConnectionId,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> AppResult<()> {
        self.conversations
            .require_participant(user_id, conversation_id)
            .await?;
        if self
            .presence
            .join_channel(connection, Channel::Conversation(conversation_id))
            .await
        {
            debug!(connection_id = %connection, conversation_id = %conversation_id, "joined conversation");
        }
        Ok(())
    }

    pub async fn leave_conversation(
        &self,
        connection: ConnectionId,
        user_id: Uuid,
        conversation_id: Uuid,
    ) {
        self.stop_typing_quietly(connection, user_id, conversation_id)
            .await;
        self.presence
            .leave_channel(connection, Channel::Conversation(conversation_id))
            .await;
    }

    pub async fn start_typing(
        &self,
        connection: ConnectionId,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> AppResult<()> {
        self.conversations
            .require_participant(user_id, conversation_id)
            .await?;
        let announced = self
            .typing_elsewhere(user_id)
            .await
            .contains(&conversation_id);
        let newly = self
            .typing
            .entry(connection)
            .or_default()
            .insert(conversation_id);
        if !newly || announced {
            return Ok(());
        }
        self.conversations_typing(user_id, conversation_id, true)
            .await?;
        emit(
            self.presence.as_ref(),
            Channel::Conversation(conversation_id),
            &ServerEvent::UserTyping {
                conversation_id,
                user_id,
            },
            Some(connection),
        )
        .await;
        Ok(())
    }

    pub async fn stop_typing(
        &self,
        connection: ConnectionId,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> AppResult<()> {
        self.conversations
            .require_participant(user_id, conversation_id)
            .await?;
        self.stop_typing_quietly(connection, user_id, conversation_id)
            .await;
        Ok(())
    }

    /// Drop this connection's typing state for a conversation, if any.
    async fn stop_typing_quietly(
        &self,
        connection: ConnectionId,
        user_id: Uuid,
        conversation_id: Uuid,
    ) {
        let was_typing = self
            .typing
            .get_mut(&connection)
            .map(|mut set| set.remove(&conversation_id))
            .unwrap_or(false);
        self.typing.remove_if(&connection, |_, set| set.is_empty());
        // Another tab still typing keeps the user in the typing set.
        if was_typing && !self.typing_elsewhere(user_id).await.contains(&conversation_id) {
            self.clear_typing(user_id, conversation_id, Some(connection))
                .await;
        }
    }

    async fn clear_typing(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        except: Option<ConnectionId>,
    ) {
        if let Err(e) = self
            .conversations_typing(user_id, conversation_id, false)
            .await
        {
            warn!(
                conversation_id = %conversation_id,
                user_id = %user_id,
                error = %e,
                "failed to clear typing state"
            );
        }
        emit(
            self.presence.as_ref(),
            Channel::Conversation(conversation_id),
            &ServerEvent::UserStopTyping {
                conversation_id,
                user_id,
            },
            except,
        )
        .await;
    }

    async fn conversations_typing(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        typing: bool,
    ) -> AppResult<()> {
        self.stores
            .chats
            .set_typing(conversation_id, user_id, typing)
            .await
    }

    /// Conversations the user is typing in from their other live connections
    async fn typing_elsewhere(&self, user_id: Uuid) -> HashSet<Uuid> {
        let mut conversations = HashSet::new();
        for connection in self.presence.connections_for(user_id).await {
            if let Some(set) = self.typing.get(&connection) {
                conversations.extend(set.iter().copied());
            }
        }
        conversations
    }

    async fn broadcast(&self, event: &ServerEvent, except: Option<ConnectionId>) {
        match event.to_json() {
            Ok(payload) => {
                self.presence.broadcast(&payload, except).await;
            }
            Err(e) => warn!(error = %e, "presence event serialization failed"),
        }
    }

    async fn reject(&self, connection: ConnectionId, err: &AppError) {
        let event = ServerEvent::Error {
            code: err.error_code().to_string(),
            message: err.client_message(),
            retryable: err.is_retryable(),
        };
        if let Ok(payload) = event.to_json() {
            self.presence.send_to_connection(connection, &payload).await;
        }
    }
}
