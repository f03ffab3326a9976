//! The send path, shared by the realtime and REST entry points.

use super::emit;
use super::notification_service::NotificationService;
use crate::error::{AppError, AppResult, Resource};
use crate::metrics;
use crate::models::{
    Message, MessageKind, NewMessage, NotificationContext, NotificationType, UserProfile,
};
use crate::presence::{Channel, ConnectionId, PresenceRegistry};
use crate::repository::{MessageRepository, Stores};
use crate::websocket::events::{PopulatedMessage, ServerEvent};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const PREVIEW_CHARS: usize = 100;

pub struct MessagePipeline {
    stores: Stores,
    presence: Arc<dyn PresenceRegistry>,
    notifications: Arc<NotificationService>,
    delivery_delay: Duration,
}

impl MessagePipeline {
    pub fn new(
        stores: Stores,
        presence: Arc<dyn PresenceRegistry>,
        notifications: Arc<NotificationService>,
        delivery_delay: Duration,
    ) -> Self {
        Self {
            stores,
            presence,
            notifications,
            delivery_delay,
        }
    }

    /// Persist and fan out one message.
    ///
    /// `origin` is the sending connection for realtime sends and `None` for
    /// REST, which has no socket to acknowledge. Delivery confirmation and
    /// notification fan-out run as detached tasks after this returns.
    pub async fn send(
        &self,
        sender_id: Uuid,
        conversation_id: Uuid,
        draft: NewMessage,
        origin: Option<ConnectionId>,
        client_token: Option<String>,
    ) -> AppResult<Message> {
        let conversation = self
            .stores
            .chats
            .get(conversation_id)
            .await?
            .ok_or(AppError::NotFound(Resource::Conversation))?;
        if !conversation.is_participant(sender_id) {
            return Err(AppError::Forbidden);
        }

        let message = self
            .stores
            .messages
            .insert(conversation_id, sender_id, draft)
            .await?;
        let conversation = self
            .stores
            .chats
            .record_message(conversation_id, message.id, sender_id, message.created_at)
            .await?;

        metrics::MESSAGES_SENT_TOTAL
            .with_label_values(&[if origin.is_some() { "ws" } else { "rest" }])
            .inc();
        info!(
            message_id = %message.id,
            conversation_id = %conversation_id,
            sender_id = %sender_id,
            sequence = message.sequence,
            "message persisted"
        );

        if let Some(connection) = origin {
            let ack = ServerEvent::MessageSent {
                conversation_id,
                message_id: message.id,
                client_token,
            };
            match ack.to_json() {
                Ok(payload) => {
                    self.presence.send_to_connection(connection, &payload).await;
                }
                Err(e) => warn!(error = %e, "message_sent serialization failed"),
            }
        }

        let populated = PopulatedMessage {
            message: message.clone(),
            sender: self.sender_profile(sender_id).await,
        };

        emit(
            self.presence.as_ref(),
            Channel::Conversation(conversation_id),
            &ServerEvent::NewMessage {
                conversation_id,
                message: populated.clone(),
            },
            None,
        )
        .await;

        for participant in &conversation.participants {
            let update = ServerEvent::ChatUpdated {
                conversation_id,
                last_message: populated.clone(),
                unread_count: conversation.unread_for(*participant),
            };
            emit(
                self.presence.as_ref(),
                Channel::User(*participant),
                &update,
                None,
            )
            .await;
        }

        let recipients: Vec<Uuid> = conversation.other_participants(sender_id).collect();

        tokio::spawn(confirm_delivery(
            self.delivery_delay,
            self.stores.messages.clone(),
            self.presence.clone(),
            message.clone(),
            recipients.clone(),
        ));

        let preview = preview_of(&message);
        for recipient in recipients {
            let notifications = self.notifications.clone();
            let context = NotificationContext {
                post_id: None,
                comment_id: None,
                data: json!({
                    "conversationId": conversation_id,
                    "messageId": message.id,
                    "preview": preview,
                }),
            };
            tokio::spawn(async move {
                if let Err(e) = notifications
                    .notify(recipient, Some(sender_id), NotificationType::Message, context)
                    .await
                {
                    warn!(
                        recipient_id = %recipient,
                        error = %e,
                        "message notification failed"
                    );
                    metrics::BACKGROUND_FAILURES_TOTAL
                        .with_label_values(&["message_notification"])
                        .inc();
                }
            });
        }

        Ok(message)
    }

    async fn sender_profile(&self, sender_id: Uuid) -> Option<UserProfile> {
        match self.stores.users.get_profile(sender_id).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(sender_id = %sender_id, error = %e, "sender profile lookup failed");
                None
            }
        }
    }
}

/// Deferred `delivered` transition for every recipient online when the timer
/// fires. A recipient who already read the message is skipped by the store,
/// so a late timer never pulls `read` back to `delivered`.
async fn confirm_delivery(
    delay: Duration,
    messages: Arc<dyn MessageRepository>,
    presence: Arc<dyn PresenceRegistry>,
    message: Message,
    recipients: Vec<Uuid>,
) {
    tokio::time::sleep(delay).await;

    for recipient in recipients {
        if !presence.is_online(recipient).await {
            continue;
        }
        let delivered_at = Utc::now();
        match messages
            .mark_delivered(message.id, recipient, delivered_at)
            .await
        {
            Ok(Some(_)) => {
                metrics::STATUS_TRANSITIONS_TOTAL
                    .with_label_values(&["delivered"])
                    .inc();
                let event = ServerEvent::MessageDelivered {
                    conversation_id: message.conversation_id,
                    message_id: message.id,
                    to_user_id: recipient,
                    delivered_at,
                };
                emit(presence.as_ref(), Channel::User(recipient), &event, None).await;
                emit(
                    presence.as_ref(),
                    Channel::User(message.sender_id),
                    &event,
                    None,
                )
                .await;
            }
            Ok(None) => {
                debug!(
                    message_id = %message.id,
                    recipient_id = %recipient,
                    "delivery skipped, already delivered or read"
                );
            }
            Err(e) => {
                warn!(
                    message_id = %message.id,
                    recipient_id = %recipient,
                    error = %e,
                    "delivery confirmation failed"
                );
                metrics::BACKGROUND_FAILURES_TOTAL
                    .with_label_values(&["delivery_timer"])
                    .inc();
            }
        }
    }
}

fn preview_of(message: &Message) -> String {
    match message.kind {
        MessageKind::Image => "[image]".to_string(),
        MessageKind::File => "[file]".to_string(),
        MessageKind::Text | MessageKind::System => message
            .text
            .as_deref()
            .unwrap_or_default()
            .chars()
            .take(PREVIEW_CHARS)
            .collect(),
    }
}
