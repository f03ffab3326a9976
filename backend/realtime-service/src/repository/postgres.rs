use super::{
    ChatRepository, MessagePage, MessageRepository, NotificationRepository, UserDirectory,
};
use crate::error::{AppError, AppResult, Resource};
use crate::models::{
    Conversation, FileAttachment, Message, MessageStatus, NewMessage, Notification,
    NotificationStats, NotificationType, ParticipantSettings, Reaction, Receipt, SettingsUpdate,
    UserProfile,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use uuid::Uuid;

// ============================================================================
// Conversations
// ============================================================================

#[derive(FromRow)]
struct ConversationRow {
    id: Uuid,
    is_group: bool,
    group_name: Option<String>,
    group_admin: Option<Uuid>,
    last_message_id: Option<Uuid>,
    last_activity_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct ParticipantRow {
    conversation_id: Uuid,
    user_id: Uuid,
    unread_count: i64,
    is_typing: bool,
    archived: bool,
    muted: bool,
    pinned: bool,
}

pub struct PgChatRepository {
    pool: PgPool,
}

impl PgChatRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_many(&self, ids: &[Uuid]) -> AppResult<Vec<Conversation>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, ConversationRow>(
            r#"
            SELECT id, is_group, group_name, group_admin, last_message_id,
                   last_activity_at, created_at
            FROM conversations
            WHERE id = ANY($1)
            ORDER BY last_activity_at DESC
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let participants = sqlx::query_as::<_, ParticipantRow>(
            r#"
            SELECT conversation_id, user_id, unread_count, is_typing, archived, muted, pinned
            FROM conversation_participants
            WHERE conversation_id = ANY($1)
            ORDER BY position ASC
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_conversation: HashMap<Uuid, Vec<ParticipantRow>> = HashMap::new();
        for p in participants {
            by_conversation.entry(p.conversation_id).or_default().push(p);
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let members = by_conversation.remove(&row.id).unwrap_or_default();
                assemble_conversation(row, members)
            })
            .collect())
    }

    async fn load(&self, id: Uuid) -> AppResult<Option<Conversation>> {
        Ok(self.load_many(&[id]).await?.into_iter().next())
    }

    async fn load_existing(&self, id: Uuid) -> AppResult<Conversation> {
        self.load(id)
            .await?
            .ok_or(AppError::NotFound(Resource::Conversation))
    }

    async fn insert_conversation(
        &self,
        conversation: &Conversation,
        direct_key: Option<&str>,
    ) -> AppResult<bool> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO conversations (
                id, is_group, group_name, group_admin, direct_key, last_activity_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (direct_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(conversation.id)
        .bind(conversation.is_group)
        .bind(&conversation.group_name)
        .bind(conversation.group_admin)
        .bind(direct_key)
        .bind(conversation.last_activity_at)
        .bind(conversation.created_at)
        .fetch_optional(&mut *tx)
        .await?;

        if inserted.is_none() {
            tx.rollback().await?;
            return Ok(false);
        }

        for (position, user_id) in conversation.participants.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO conversation_participants (conversation_id, user_id, position)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(conversation.id)
            .bind(user_id)
            .bind(position as i32)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }
}

fn assemble_conversation(row: ConversationRow, members: Vec<ParticipantRow>) -> Conversation {
    let mut conversation = Conversation {
        id: row.id,
        participants: Vec::with_capacity(members.len()),
        is_group: row.is_group,
        group_name: row.group_name,
        group_admin: row.group_admin,
        unread_counts: HashMap::new(),
        last_message_id: row.last_message_id,
        typing_users: Default::default(),
        settings: HashMap::new(),
        last_activity_at: row.last_activity_at,
        created_at: row.created_at,
    };
    for m in members {
        conversation.participants.push(m.user_id);
        conversation.unread_counts.insert(m.user_id, m.unread_count);
        if m.is_typing {
            conversation.typing_users.insert(m.user_id);
        }
        conversation.settings.insert(
            m.user_id,
            ParticipantSettings {
                archived: m.archived,
                muted: m.muted,
                pinned: m.pinned,
            },
        );
    }
    conversation
}

#[async_trait]
impl ChatRepository for PgChatRepository {
    async fn find_or_create_direct(&self, a: Uuid, b: Uuid) -> AppResult<(Conversation, bool)> {
        let key = Conversation::direct_key(a, b);

        let existing: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM conversations WHERE direct_key = $1")
                .bind(&key)
                .fetch_optional(&self.pool)
                .await?;
        if let Some(id) = existing {
            return Ok((self.load_existing(id).await?, false));
        }

        let conversation = Conversation::new_direct(a, b);
        if self.insert_conversation(&conversation, Some(&key)).await? {
            return Ok((conversation, true));
        }

        // Lost the race on the unique key; the winner's row is the conversation.
        let id: Uuid = sqlx::query_scalar("SELECT id FROM conversations WHERE direct_key = $1")
            .bind(&key)
            .fetch_one(&self.pool)
            .await?;
        Ok((self.load_existing(id).await?, false))
    }

    async fn insert_group(&self, conversation: Conversation) -> AppResult<Conversation> {
        self.insert_conversation(&conversation, None).await?;
        Ok(conversation)
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<Conversation>> {
        self.load(id).await
    }

    async fn list_for_user(&self, user_id: Uuid) -> AppResult<Vec<Conversation>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT conversation_id FROM conversation_participants WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        self.load_many(&ids).await
    }

    async fn record_message(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        sender_id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<Conversation> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE conversations
            SET last_message_id = $2, last_activity_at = $3
            WHERE id = $1
            "#,
        )
        .bind(conversation_id)
        .bind(message_id)
        .bind(at)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(AppError::NotFound(Resource::Conversation));
        }

        sqlx::query(
            r#"
            UPDATE conversation_participants
            SET unread_count = unread_count + 1
            WHERE conversation_id = $1 AND user_id <> $2
            "#,
        )
        .bind(conversation_id)
        .bind(sender_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        self.load_existing(conversation_id).await
    }

    async fn reset_unread(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<()> {
        self.set_unread(conversation_id, user_id, 0).await
    }

    async fn decrement_unread(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<i64> {
        sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE conversation_participants
            SET unread_count = GREATEST(unread_count - 1, 0)
            WHERE conversation_id = $1 AND user_id = $2
            RETURNING unread_count
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotFound(Resource::Conversation))
    }

    async fn set_unread(&self, conversation_id: Uuid, user_id: Uuid, count: i64) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE conversation_participants
            SET unread_count = $3
            WHERE conversation_id = $1 AND user_id = $2
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(count.max(0))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(Resource::Conversation));
        }
        Ok(())
    }

    async fn set_typing(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        typing: bool,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE conversation_participants
            SET is_typing = $3
            WHERE conversation_id = $1 AND user_id = $2
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(typing)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_settings(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        update: &SettingsUpdate,
    ) -> AppResult<ParticipantSettings> {
        let row: Option<(bool, bool, bool)> = sqlx::query_as(
            r#"
            UPDATE conversation_participants
            SET archived = COALESCE($3, archived),
                muted = COALESCE($4, muted),
                pinned = COALESCE($5, pinned)
            WHERE conversation_id = $1 AND user_id = $2
            RETURNING archived, muted, pinned
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(update.archived)
        .bind(update.muted)
        .bind(update.pinned)
        .fetch_optional(&self.pool)
        .await?;

        let (archived, muted, pinned) = row.ok_or(AppError::NotFound(Resource::Conversation))?;
        Ok(ParticipantSettings {
            archived,
            muted,
            pinned,
        })
    }

    async fn delete(&self, conversation_id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM conversations WHERE id = $1")
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(FromRow)]
struct MessageRow {
    id: Uuid,
    conversation_id: Uuid,
    sender_id: Uuid,
    sequence: i64,
    kind: String,
    text: Option<String>,
    image: Option<String>,
    file: Option<Json<FileAttachment>>,
    status: String,
    reply_to: Option<Uuid>,
    deleted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct ReceiptRow {
    message_id: Uuid,
    user_id: Uuid,
    at: DateTime<Utc>,
}

#[derive(FromRow)]
struct ReactionRow {
    message_id: Uuid,
    user_id: Uuid,
    emoji: String,
    created_at: DateTime<Utc>,
}

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, sequence, kind, text, image, \
                               file, status, reply_to, deleted, created_at, updated_at";

pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Attach read/delivery receipts and reactions, preserving row order.
    async fn hydrate(&self, rows: Vec<MessageRow>) -> AppResult<Vec<Message>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();

        let reads = sqlx::query_as::<_, ReceiptRow>(
            r#"
            SELECT message_id, user_id, read_at AS at
            FROM message_reads
            WHERE message_id = ANY($1)
            ORDER BY read_at ASC
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let deliveries = sqlx::query_as::<_, ReceiptRow>(
            r#"
            SELECT message_id, user_id, delivered_at AS at
            FROM message_deliveries
            WHERE message_id = ANY($1)
            ORDER BY delivered_at ASC
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let reactions = sqlx::query_as::<_, ReactionRow>(
            r#"
            SELECT message_id, user_id, emoji, created_at
            FROM message_reactions
            WHERE message_id = ANY($1)
            ORDER BY created_at ASC
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut read_map: HashMap<Uuid, Vec<Receipt>> = HashMap::new();
        for r in reads {
            read_map.entry(r.message_id).or_default().push(Receipt {
                user_id: r.user_id,
                at: r.at,
            });
        }
        let mut delivery_map: HashMap<Uuid, Vec<Receipt>> = HashMap::new();
        for d in deliveries {
            delivery_map.entry(d.message_id).or_default().push(Receipt {
                user_id: d.user_id,
                at: d.at,
            });
        }
        let mut reaction_map: HashMap<Uuid, Vec<Reaction>> = HashMap::new();
        for r in reactions {
            reaction_map.entry(r.message_id).or_default().push(Reaction {
                user_id: r.user_id,
                emoji: r.emoji,
                created_at: r.created_at,
            });
        }

        rows.into_iter()
            .map(|row| {
                Ok(Message {
                    id: row.id,
                    conversation_id: row.conversation_id,
                    sender_id: row.sender_id,
                    sequence: row.sequence,
                    kind: row.kind.parse()?,
                    text: row.text,
                    image: row.image,
                    file: row.file.map(|f| f.0),
                    status: row.status.parse()?,
                    read_by: read_map.remove(&row.id).unwrap_or_default(),
                    delivered_to: delivery_map.remove(&row.id).unwrap_or_default(),
                    reply_to: row.reply_to,
                    reactions: reaction_map.remove(&row.id).unwrap_or_default(),
                    deleted: row.deleted,
                    created_at: row.created_at,
                    updated_at: row.updated_at,
                })
            })
            .collect()
    }

    async fn load_many(&self, ids: &[Uuid]) -> AppResult<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ANY($1) ORDER BY sequence ASC"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        self.hydrate(rows).await
    }

    async fn load(&self, id: Uuid) -> AppResult<Option<Message>> {
        Ok(self.load_many(&[id]).await?.into_iter().next())
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn insert(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        draft: NewMessage,
    ) -> AppResult<Message> {
        let mut tx = self.pool.begin().await?;

        // Row lock on the conversation serializes sequence assignment.
        let sequence: i64 = sqlx::query_scalar(
            r#"
            UPDATE conversations
            SET last_sequence = last_sequence + 1
            WHERE id = $1
            RETURNING last_sequence
            "#,
        )
        .bind(conversation_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound(Resource::Conversation))?;

        let message = Message::new(conversation_id, sender_id, sequence, draft);

        sqlx::query(
            r#"
            INSERT INTO messages (
                id, conversation_id, sender_id, sequence, kind, text, image, file,
                status, reply_to, deleted, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, FALSE, $11, $11)
            "#,
        )
        .bind(message.id)
        .bind(message.conversation_id)
        .bind(message.sender_id)
        .bind(message.sequence)
        .bind(message.kind.as_str())
        .bind(&message.text)
        .bind(&message.image)
        .bind(message.file.clone().map(Json))
        .bind(message.status.as_str())
        .bind(message.reply_to)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO message_reads (message_id, user_id, read_at) VALUES ($1, $2, $3)")
            .bind(message.id)
            .bind(sender_id)
            .bind(message.created_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(message)
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<Message>> {
        self.load(id).await
    }

    async fn page(
        &self,
        conversation_id: Uuid,
        page: u32,
        per_page: u32,
    ) -> AppResult<MessagePage> {
        let page = i64::from(page.max(1));
        let per_page = i64::from(per_page);

        let mut rows = sqlx::query_as::<_, MessageRow>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages
            WHERE conversation_id = $1 AND NOT deleted
            ORDER BY sequence DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(conversation_id)
        .bind(per_page + 1)
        .bind((page - 1) * per_page)
        .fetch_all(&self.pool)
        .await?;

        let has_more = rows.len() as i64 > per_page;
        rows.truncate(per_page as usize);
        rows.reverse();

        Ok(MessagePage {
            messages: self.hydrate(rows).await?,
            has_more,
        })
    }

    async fn mark_delivered(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Message>> {
        let mut tx = self.pool.begin().await?;

        let status: Option<String> = sqlx::query_scalar(
            "SELECT status FROM messages WHERE id = $1 AND sender_id <> $2 FOR UPDATE",
        )
        .bind(message_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let status = match status {
            Some(s) => s.parse::<MessageStatus>()?,
            None => {
                tx.rollback().await?;
                return Ok(None);
            }
        };
        let already_read: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM message_reads WHERE message_id = $1 AND user_id = $2)",
        )
        .bind(message_id)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;
        if status == MessageStatus::Failed || already_read {
            tx.rollback().await?;
            return Ok(None);
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO message_deliveries (message_id, user_id, delivered_at)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(message_id)
        .bind(user_id)
        .bind(at)
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        // Status only advances out of `sent`; later receipts leave it alone.
        sqlx::query(
            "UPDATE messages SET status = CASE WHEN status = 'sent' THEN 'delivered' ELSE status END, \
             updated_at = $2 WHERE id = $1",
        )
        .bind(message_id)
        .bind(at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        self.load(message_id).await
    }

    async fn mark_read(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Message>> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(Uuid, String)> =
            sqlx::query_as("SELECT sender_id, status FROM messages WHERE id = $1 FOR UPDATE")
                .bind(message_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((sender_id, status)) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO message_reads (message_id, user_id, read_at)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(message_id)
        .bind(user_id)
        .bind(at)
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let status: MessageStatus = status.parse()?;
        if user_id != sender_id && status.can_transition_to(MessageStatus::Read) {
            sqlx::query("UPDATE messages SET status = 'read', updated_at = $2 WHERE id = $1")
                .bind(message_id)
                .bind(at)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        self.load(message_id).await
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<Message>> {
        let mut tx = self.pool.begin().await?;

        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO message_reads (message_id, user_id, read_at)
            SELECT id, $2, $3
            FROM messages
            WHERE conversation_id = $1 AND sender_id <> $2
            ON CONFLICT DO NOTHING
            RETURNING message_id
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(at)
        .fetch_all(&mut *tx)
        .await?;

        if !ids.is_empty() {
            sqlx::query(
                r#"
                UPDATE messages
                SET status = 'read', updated_at = $2
                WHERE id = ANY($1) AND status IN ('sending', 'sent', 'delivered')
                "#,
            )
            .bind(&ids)
            .bind(at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        self.load_many(&ids).await
    }

    async fn count_unread(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM messages m
            WHERE m.conversation_id = $1
              AND m.sender_id <> $2
              AND NOT m.deleted
              AND NOT EXISTS (
                  SELECT 1 FROM message_reads r
                  WHERE r.message_id = m.id AND r.user_id = $2
              )
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn set_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> AppResult<Option<Message>> {
        let result = sqlx::query(
            r#"
            INSERT INTO message_reactions (message_id, user_id, emoji, created_at)
            SELECT id, $2, $3, NOW() FROM messages WHERE id = $1
            ON CONFLICT (message_id, user_id)
            DO UPDATE SET emoji = EXCLUDED.emoji, created_at = EXCLUDED.created_at
            "#,
        )
        .bind(message_id)
        .bind(user_id)
        .bind(emoji)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.load(message_id).await
    }

    async fn soft_delete(&self, message_id: Uuid) -> AppResult<Option<Message>> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET deleted = TRUE, text = NULL, image = NULL, file = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.load(message_id).await
    }

    async fn delete_for_conversation(&self, conversation_id: Uuid) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM messages WHERE conversation_id = $1")
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// ============================================================================
// Notifications
// ============================================================================

#[derive(FromRow)]
struct NotificationRow {
    id: Uuid,
    recipient_id: Uuid,
    sender_id: Option<Uuid>,
    kind: String,
    post_id: Option<Uuid>,
    comment_id: Option<Uuid>,
    data: serde_json::Value,
    read: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = AppError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        Ok(Notification {
            id: row.id,
            recipient_id: row.recipient_id,
            sender_id: row.sender_id,
            kind: row.kind.parse()?,
            post_id: row.post_id,
            comment_id: row.comment_id,
            data: row.data,
            read: row.read,
            created_at: row.created_at,
        })
    }
}

const NOTIFICATION_COLUMNS: &str =
    "id, recipient_id, sender_id, type AS kind, post_id, comment_id, data, read, created_at";

pub struct PgNotificationRepository {
    pool: PgPool,
}

impl PgNotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationRepository for PgNotificationRepository {
    async fn insert(&self, notification: &Notification) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (
                id, recipient_id, sender_id, type, post_id, comment_id, data, read, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(notification.id)
        .bind(notification.recipient_id)
        .bind(notification.sender_id)
        .bind(notification.kind.as_str())
        .bind(notification.post_id)
        .bind(notification.comment_id)
        .bind(&notification.data)
        .bind(notification.read)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn exists_since(
        &self,
        recipient_id: Uuid,
        sender_id: Option<Uuid>,
        kind: NotificationType,
        since: DateTime<Utc>,
    ) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM notifications
                WHERE recipient_id = $1
                  AND sender_id IS NOT DISTINCT FROM $2
                  AND type = $3
                  AND created_at >= $4
            )
            "#,
        )
        .bind(recipient_id)
        .bind(sender_id)
        .bind(kind.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn list(
        &self,
        recipient_id: Uuid,
        offset: i64,
        limit: i64,
    ) -> AppResult<Vec<Notification>> {
        let rows = sqlx::query_as::<_, NotificationRow>(&format!(
            r#"
            SELECT {NOTIFICATION_COLUMNS}
            FROM notifications
            WHERE recipient_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(recipient_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Notification::try_from).collect()
    }

    async fn count(&self, recipient_id: Uuid) -> AppResult<i64> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE recipient_id = $1")
                .bind(recipient_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(total)
    }

    async fn count_unread(&self, recipient_id: Uuid) -> AppResult<i64> {
        let unread: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE recipient_id = $1 AND read = FALSE",
        )
        .bind(recipient_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(unread)
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<Notification>> {
        sqlx::query_as::<_, NotificationRow>(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(Notification::try_from)
        .transpose()
    }

    async fn mark_read(&self, id: Uuid) -> AppResult<bool> {
        let result =
            sqlx::query("UPDATE notifications SET read = TRUE WHERE id = $1 AND read = FALSE")
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_all_read(&self, recipient_id: Uuid) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE notifications SET read = TRUE WHERE recipient_id = $1 AND read = FALSE",
        )
        .bind(recipient_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_all(&self, recipient_id: Uuid) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM notifications WHERE recipient_id = $1")
            .bind(recipient_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn stats(&self, recipient_id: Uuid) -> AppResult<NotificationStats> {
        let (total, unread, likes, comments, follows, mentions): (i64, i64, i64, i64, i64, i64) =
            sqlx::query_as(
                r#"
                SELECT
                    COUNT(*),
                    COUNT(*) FILTER (WHERE NOT read),
                    COUNT(*) FILTER (WHERE type = 'like'),
                    COUNT(*) FILTER (WHERE type = 'comment'),
                    COUNT(*) FILTER (WHERE type = 'follow'),
                    COUNT(*) FILTER (WHERE type = 'mention')
                FROM notifications
                WHERE recipient_id = $1
                "#,
            )
            .bind(recipient_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(NotificationStats {
            total,
            unread,
            likes,
            comments,
            follows,
            mentions,
        })
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM notifications WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// ============================================================================
// User directory
// ============================================================================

pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn get_profile(&self, user_id: Uuid) -> AppResult<Option<UserProfile>> {
        let profile = sqlx::query_as::<_, UserProfile>(
            "SELECT id, name, username, avatar, allow_messages FROM user_profiles WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(profile)
    }

    async fn is_follower(&self, user_id: Uuid, candidate: Uuid) -> AppResult<bool> {
        let follows: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM user_followers WHERE user_id = $1 AND follower_id = $2
            )
            "#,
        )
        .bind(user_id)
        .bind(candidate)
        .fetch_one(&self.pool)
        .await?;
        Ok(follows)
    }

    async fn set_last_seen(
        &self,
        user_id: Uuid,
        online: bool,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query("UPDATE user_profiles SET online = $2, last_seen_at = $3 WHERE id = $1")
            .bind(user_id)
            .bind(online)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
