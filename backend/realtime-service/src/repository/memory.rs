use super::{
    ChatRepository, MessagePage, MessageRepository, NotificationRepository, UserDirectory,
};
use crate::error::{AppError, AppResult, Resource};
use crate::models::{
    Conversation, Message, NewMessage, Notification, NotificationStats, NotificationType,
    ParticipantSettings, SettingsUpdate, UserProfile,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct ChatTable {
    by_id: HashMap<Uuid, Conversation>,
    direct: HashMap<String, Uuid>,
}

impl ChatTable {
    fn get_mut(&mut self, id: Uuid) -> AppResult<&mut Conversation> {
        self.by_id
            .get_mut(&id)
            .ok_or(AppError::NotFound(Resource::Conversation))
    }
}

#[derive(Default)]
pub struct InMemoryChatRepository {
    inner: RwLock<ChatTable>,
}

impl InMemoryChatRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatRepository for InMemoryChatRepository {
    async fn find_or_create_direct(&self, a: Uuid, b: Uuid) -> AppResult<(Conversation, bool)> {
        let key = Conversation::direct_key(a, b);
        // Lookup and insert under one write guard so concurrent callers converge.
        let mut table = self.inner.write().await;
        if let Some(existing) = table.direct.get(&key).and_then(|id| table.by_id.get(id)) {
            return Ok((existing.clone(), false));
        }
        let conversation = Conversation::new_direct(a, b);
        table.direct.insert(key, conversation.id);
        table.by_id.insert(conversation.id, conversation.clone());
        Ok((conversation, true))
    }

    async fn insert_group(&self, conversation: Conversation) -> AppResult<Conversation> {
        let mut table = self.inner.write().await;
        table.by_id.insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<Conversation>> {
        Ok(self.inner.read().await.by_id.get(&id).cloned())
    }

    async fn list_for_user(&self, user_id: Uuid) -> AppResult<Vec<Conversation>> {
        let table = self.inner.read().await;
        let mut conversations: Vec<Conversation> = table
            .by_id
            .values()
            .filter(|c| c.is_participant(user_id))
            .cloned()
            .collect();
        conversations.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(conversations)
    }

    async fn record_message(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        sender_id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<Conversation> {
        let mut table = self.inner.write().await;
        let conversation = table.get_mut(conversation_id)?;
        conversation.record_message(message_id, sender_id, at);
        Ok(conversation.clone())
    }

    async fn reset_unread(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<()> {
        let mut table = self.inner.write().await;
        table
            .get_mut(conversation_id)?
            .unread_counts
            .insert(user_id, 0);
        Ok(())
    }

    async fn decrement_unread(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<i64> {
        let mut table = self.inner.write().await;
        Ok(table.get_mut(conversation_id)?.decrement_unread(user_id))
    }

    async fn set_unread(&self, conversation_id: Uuid, user_id: Uuid, count: i64) -> AppResult<()> {
        let mut table = self.inner.write().await;
        table
            .get_mut(conversation_id)?
            .unread_counts
            .insert(user_id, count.max(0));
        Ok(())
    }

    async fn set_typing(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        typing: bool,
    ) -> AppResult<()> {
        let mut table = self.inner.write().await;
        let conversation = table.get_mut(conversation_id)?;
        if typing {
            conversation.typing_users.insert(user_id);
        } else {
            conversation.typing_users.remove(&user_id);
        }
        Ok(())
    }

    async fn update_settings(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        update: &SettingsUpdate,
    ) -> AppResult<ParticipantSettings> {
        let mut table = self.inner.write().await;
        let settings = table
            .get_mut(conversation_id)?
            .settings
            .entry(user_id)
            .or_default();
        settings.apply(update);
        Ok(*settings)
    }

    async fn delete(&self, conversation_id: Uuid) -> AppResult<bool> {
        let mut table = self.inner.write().await;
        let Some(conversation) = table.by_id.remove(&conversation_id) else {
            return Ok(false);
        };
        if !conversation.is_group {
            if let [a, b] = conversation.participants[..] {
                table.direct.remove(&Conversation::direct_key(a, b));
            }
        }
        Ok(true)
    }
}

#[derive(Default)]
struct MessageTable {
    by_id: HashMap<Uuid, Message>,
    /// Message ids per conversation in sequence order
    by_conversation: HashMap<Uuid, Vec<Uuid>>,
    last_sequence: HashMap<Uuid, i64>,
}

#[derive(Default)]
pub struct InMemoryMessageRepository {
    inner: RwLock<MessageTable>,
}

impl InMemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn insert(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        draft: NewMessage,
    ) -> AppResult<Message> {
        let mut table = self.inner.write().await;
        let sequence = {
            let seq = table.last_sequence.entry(conversation_id).or_insert(0);
            *seq += 1;
            *seq
        };
        let message = Message::new(conversation_id, sender_id, sequence, draft);
        table
            .by_conversation
            .entry(conversation_id)
            .or_default()
            .push(message.id);
        table.by_id.insert(message.id, message.clone());
        Ok(message)
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<Message>> {
        Ok(self.inner.read().await.by_id.get(&id).cloned())
    }

    async fn page(
        &self,
        conversation_id: Uuid,
        page: u32,
        per_page: u32,
    ) -> AppResult<MessagePage> {
        let table = self.inner.read().await;
        let visible: Vec<&Message> = table
            .by_conversation
            .get(&conversation_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| table.by_id.get(id))
                    .filter(|m| !m.deleted)
                    .collect()
            })
            .unwrap_or_default();

        let total = visible.len();
        let page = page.max(1) as usize;
        let per_page = per_page as usize;
        let end = total.saturating_sub((page - 1) * per_page);
        let start = total.saturating_sub(page * per_page);

        Ok(MessagePage {
            messages: visible[start..end].iter().map(|m| (*m).clone()).collect(),
            has_more: start > 0,
        })
    }

    async fn mark_delivered(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Message>> {
        let mut table = self.inner.write().await;
        let Some(message) = table.by_id.get_mut(&message_id) else {
            return Ok(None);
        };
        Ok(message.mark_delivered(user_id, at).then(|| message.clone()))
    }

    async fn mark_read(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Message>> {
        let mut table = self.inner.write().await;
        let Some(message) = table.by_id.get_mut(&message_id) else {
            return Ok(None);
        };
        Ok(message.mark_read(user_id, at).then(|| message.clone()))
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<Message>> {
        let mut table = self.inner.write().await;
        let ids = table
            .by_conversation
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default();

        let mut newly_read = Vec::new();
        for id in ids {
            if let Some(message) = table.by_id.get_mut(&id) {
                if message.sender_id != user_id && message.mark_read(user_id, at) {
                    newly_read.push(message.clone());
                }
            }
        }
        Ok(newly_read)
    }

    async fn count_unread(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<i64> {
        let table = self.inner.read().await;
        let count = table
            .by_conversation
            .get(&conversation_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| table.by_id.get(id))
                    .filter(|m| !m.deleted && m.sender_id != user_id && !m.is_read_by(user_id))
                    .count()
            })
            .unwrap_or(0);
        Ok(count as i64)
    }

    async fn set_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> AppResult<Option<Message>> {
        let mut table = self.inner.write().await;
        Ok(table.by_id.get_mut(&message_id).map(|message| {
            message.upsert_reaction(user_id, emoji.to_string());
            message.clone()
        }))
    }

    async fn soft_delete(&self, message_id: Uuid) -> AppResult<Option<Message>> {
        let mut table = self.inner.write().await;
        Ok(table.by_id.get_mut(&message_id).map(|message| {
            message.soft_delete();
            message.clone()
        }))
    }

    async fn delete_for_conversation(&self, conversation_id: Uuid) -> AppResult<u64> {
        let mut table = self.inner.write().await;
        let ids = table
            .by_conversation
            .remove(&conversation_id)
            .unwrap_or_default();
        table.last_sequence.remove(&conversation_id);
        for id in &ids {
            table.by_id.remove(id);
        }
        Ok(ids.len() as u64)
    }
}

#[derive(Default)]
pub struct InMemoryNotificationRepository {
    /// Insertion (creation) order
    inner: RwLock<Vec<Notification>>,
}

impl InMemoryNotificationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationRepository for InMemoryNotificationRepository {
    async fn insert(&self, notification: &Notification) -> AppResult<()> {
        self.inner.write().await.push(notification.clone());
        Ok(())
    }

    async fn exists_since(
        &self,
        recipient_id: Uuid,
        sender_id: Option<Uuid>,
        kind: NotificationType,
        since: DateTime<Utc>,
    ) -> AppResult<bool> {
        Ok(self.inner.read().await.iter().any(|n| {
            n.recipient_id == recipient_id
                && n.sender_id == sender_id
                && n.kind == kind
                && n.created_at >= since
        }))
    }

    async fn list(
        &self,
        recipient_id: Uuid,
        offset: i64,
        limit: i64,
    ) -> AppResult<Vec<Notification>> {
        Ok(self
            .inner
            .read()
            .await
            .iter()
            .rev()
            .filter(|n| n.recipient_id == recipient_id)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn count(&self, recipient_id: Uuid) -> AppResult<i64> {
        Ok(self
            .inner
            .read()
            .await
            .iter()
            .filter(|n| n.recipient_id == recipient_id)
            .count() as i64)
    }

    async fn count_unread(&self, recipient_id: Uuid) -> AppResult<i64> {
        Ok(self
            .inner
            .read()
            .await
            .iter()
            .filter(|n| n.recipient_id == recipient_id && !n.read)
            .count() as i64)
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<Notification>> {
        Ok(self.inner.read().await.iter().find(|n| n.id == id).cloned())
    }

    async fn mark_read(&self, id: Uuid) -> AppResult<bool> {
        let mut all = self.inner.write().await;
        match all.iter_mut().find(|n| n.id == id) {
            Some(n) if !n.read => {
                n.read = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_all_read(&self, recipient_id: Uuid) -> AppResult<u64> {
        let mut all = self.inner.write().await;
        let mut modified = 0;
        for n in all
            .iter_mut()
            .filter(|n| n.recipient_id == recipient_id && !n.read)
        {
            n.read = true;
            modified += 1;
        }
        Ok(modified)
    }

    async fn delete(&self, id: Uuid) -> AppResult<bool> {
        let mut all = self.inner.write().await;
        let before = all.len();
        all.retain(|n| n.id != id);
        Ok(all.len() != before)
    }

    async fn delete_all(&self, recipient_id: Uuid) -> AppResult<u64> {
        let mut all = self.inner.write().await;
        let before = all.len();
        all.retain(|n| n.recipient_id != recipient_id);
        Ok((before - all.len()) as u64)
    }

    async fn stats(&self, recipient_id: Uuid) -> AppResult<NotificationStats> {
        let all = self.inner.read().await;
        let mut stats = NotificationStats::default();
        for n in all.iter().filter(|n| n.recipient_id == recipient_id) {
            stats.total += 1;
            if !n.read {
                stats.unread += 1;
            }
            match n.kind {
                NotificationType::Like => stats.likes += 1,
                NotificationType::Comment => stats.comments += 1,
                NotificationType::Follow => stats.follows += 1,
                NotificationType::Mention => stats.mentions += 1,
                NotificationType::Message | NotificationType::Admired => {}
            }
        }
        Ok(stats)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let mut all = self.inner.write().await;
        let before = all.len();
        all.retain(|n| n.created_at >= cutoff);
        Ok((before - all.len()) as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceStamp {
    pub online: bool,
    pub last_seen: DateTime<Utc>,
}

#[derive(Default)]
struct UserTable {
    profiles: HashMap<Uuid, UserProfile>,
    /// user -> followers
    followers: HashMap<Uuid, HashSet<Uuid>>,
    presence: HashMap<Uuid, PresenceStamp>,
}

/// Process-local stand-in for the profile collaborator.
#[derive(Default)]
pub struct InMemoryUserDirectory {
    inner: RwLock<UserTable>,
    /// Answer unknown ids with a placeholder profile instead of `None`
    synthesize_unknown: bool,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory that invents a profile for any id, for local runs without a
    /// profile service.
    pub fn permissive() -> Self {
        Self {
            synthesize_unknown: true,
            ..Self::default()
        }
    }

    pub async fn upsert_profile(&self, profile: UserProfile) {
        self.inner
            .write()
            .await
            .profiles
            .insert(profile.id, profile);
    }

    pub async fn add_follower(&self, user_id: Uuid, follower_id: Uuid) {
        self.inner
            .write()
            .await
            .followers
            .entry(user_id)
            .or_default()
            .insert(follower_id);
    }

    pub async fn presence_of(&self, user_id: Uuid) -> Option<PresenceStamp> {
        self.inner.read().await.presence.get(&user_id).copied()
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn get_profile(&self, user_id: Uuid) -> AppResult<Option<UserProfile>> {
        let table = self.inner.read().await;
        Ok(match table.profiles.get(&user_id) {
            Some(profile) => Some(profile.clone()),
            None if self.synthesize_unknown => {
                let short = user_id.simple().to_string();
                Some(UserProfile::new(user_id, short.clone(), short))
            }
            None => None,
        })
    }

    async fn is_follower(&self, user_id: Uuid, candidate: Uuid) -> AppResult<bool> {
        Ok(self
            .inner
            .read()
            .await
            .followers
            .get(&user_id)
            .map(|f| f.contains(&candidate))
            .unwrap_or(false))
    }

    async fn set_last_seen(
        &self,
        user_id: Uuid,
        online: bool,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        self.inner.write().await.presence.insert(
            user_id,
            PresenceStamp {
                online,
                last_seen: at,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_concurrent_find_or_create_yields_one_conversation() {
        let repo = Arc::new(InMemoryChatRepository::new());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let repo = repo.clone();
                tokio::spawn(async move {
                    if i % 2 == 0 {
                        repo.find_or_create_direct(a, b).await
                    } else {
                        repo.find_or_create_direct(b, a).await
                    }
                })
            })
            .collect();

        let mut ids = HashSet::new();
        let mut created = 0;
        for handle in handles {
            let (conv, was_created) = handle.await.unwrap().unwrap();
            ids.insert(conv.id);
            created += was_created as usize;
        }
        assert_eq!(ids.len(), 1);
        assert_eq!(created, 1);
        assert_eq!(repo.list_for_user(a).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sequences_are_per_conversation() {
        let repo = InMemoryMessageRepository::new();
        let (c1, c2, s) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let m1 = repo.insert(c1, s, NewMessage::text("a")).await.unwrap();
        let m2 = repo.insert(c1, s, NewMessage::text("b")).await.unwrap();
        let m3 = repo.insert(c2, s, NewMessage::text("c")).await.unwrap();
        assert_eq!((m1.sequence, m2.sequence, m3.sequence), (1, 2, 1));
    }

    #[tokio::test]
    async fn test_page_is_newest_first_but_ascending_within() {
        let repo = InMemoryMessageRepository::new();
        let (conv, s) = (Uuid::new_v4(), Uuid::new_v4());
        for i in 0..5 {
            repo.insert(conv, s, NewMessage::text(format!("m{i}")))
                .await
                .unwrap();
        }

        let first = repo.page(conv, 1, 2).await.unwrap();
        let seqs: Vec<i64> = first.messages.iter().map(|m| m.sequence).collect();
        assert_eq!(seqs, vec![4, 5]);
        assert!(first.has_more);

        let last = repo.page(conv, 3, 2).await.unwrap();
        let seqs: Vec<i64> = last.messages.iter().map(|m| m.sequence).collect();
        assert_eq!(seqs, vec![1]);
        assert!(!last.has_more);

        assert!(repo.page(conv, 9, 2).await.unwrap().messages.is_empty());
    }

    #[tokio::test]
    async fn test_page_skips_soft_deleted() {
        let repo = InMemoryMessageRepository::new();
        let (conv, s) = (Uuid::new_v4(), Uuid::new_v4());
        let gone = repo.insert(conv, s, NewMessage::text("x")).await.unwrap();
        repo.insert(conv, s, NewMessage::text("y")).await.unwrap();
        repo.soft_delete(gone.id).await.unwrap();

        let page = repo.page(conv, 1, 50).await.unwrap();
        assert_eq!(page.messages.len(), 1);
        assert_eq!(page.messages[0].text.as_deref(), Some("y"));
    }

    #[tokio::test]
    async fn test_count_unread_matches_conversation_read() {
        let repo = InMemoryMessageRepository::new();
        let (conv, a, b) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        repo.insert(conv, a, NewMessage::text("1")).await.unwrap();
        repo.insert(conv, a, NewMessage::text("2")).await.unwrap();
        repo.insert(conv, b, NewMessage::text("3")).await.unwrap();

        assert_eq!(repo.count_unread(conv, b).await.unwrap(), 2);
        assert_eq!(repo.count_unread(conv, a).await.unwrap(), 1);

        let read = repo.mark_conversation_read(conv, b, Utc::now()).await.unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(repo.count_unread(conv, b).await.unwrap(), 0);
        assert!(repo
            .mark_conversation_read(conv, b, Utc::now())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_notification_stats_and_cleanup() {
        let repo = InMemoryNotificationRepository::new();
        let recipient = Uuid::new_v4();
        let make = |kind, age_days: i64| Notification {
            id: Uuid::new_v4(),
            recipient_id: recipient,
            sender_id: Some(Uuid::new_v4()),
            kind,
            post_id: None,
            comment_id: None,
            data: serde_json::Value::Null,
            read: false,
            created_at: Utc::now() - chrono::Duration::days(age_days),
        };
        repo.insert(&make(NotificationType::Like, 0)).await.unwrap();
        repo.insert(&make(NotificationType::Comment, 0)).await.unwrap();
        repo.insert(&make(NotificationType::Follow, 40)).await.unwrap();

        let stats = repo.stats(recipient).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.likes, 1);
        assert_eq!(stats.comments, 1);
        assert_eq!(stats.follows, 1);

        let purged = repo
            .delete_older_than(Utc::now() - chrono::Duration::days(30))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert_eq!(repo.count(recipient).await.unwrap(), 2);
        assert_eq!(repo.mark_all_read(recipient).await.unwrap(), 2);
        assert_eq!(repo.count_unread(recipient).await.unwrap(), 0);
    }
}
