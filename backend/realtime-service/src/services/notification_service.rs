//! Notification fan-out: validate, dedupe, persist, then push.
//!
//! Persistence is the durability guarantee. The realtime push that follows is
//! best effort and its failure never fails the call.

use super::emit;
use super::sanitize::sanitize_payload;
use crate::error::{AppError, AppResult, Resource};
use crate::metrics;
use crate::models::{
    Notification, NotificationContext, NotificationStats, NotificationType, NotifyOutcome,
    SuppressReason,
};
use crate::presence::{Channel, PresenceRegistry};
use crate::repository::{NotificationRepository, UserDirectory};
use crate::websocket::events::ServerEvent;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 50;

type DedupeKey = (Uuid, Option<Uuid>, NotificationType);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPage {
    pub notifications: Vec<Notification>,
    pub total: i64,
    pub page: u32,
    pub pages: i64,
    pub unread_count: i64,
}

pub struct NotificationService {
    notifications: Arc<dyn NotificationRepository>,
    users: Arc<dyn UserDirectory>,
    presence: Arc<dyn PresenceRegistry>,
    dedupe_window: chrono::Duration,
    /// Last accepted creation per key. Claimed before the store is consulted
    /// so two concurrent identical events cannot both pass the check.
    recent: DashMap<DedupeKey, DateTime<Utc>>,
}

impl NotificationService {
    pub fn new(
        notifications: Arc<dyn NotificationRepository>,
        users: Arc<dyn UserDirectory>,
        presence: Arc<dyn PresenceRegistry>,
        dedupe_window: Duration,
    ) -> Self {
        Self {
            notifications,
            users,
            presence,
            dedupe_window: chrono::Duration::from_std(dedupe_window)
                .unwrap_or_else(|_| chrono::Duration::seconds(5)),
            recent: DashMap::new(),
        }
    }

    pub async fn notify(
        &self,
        recipient_id: Uuid,
        sender_id: Option<Uuid>,
        kind: NotificationType,
        context: NotificationContext,
    ) -> AppResult<NotifyOutcome> {
        if sender_id == Some(recipient_id) {
            return Ok(self.suppressed(SuppressReason::SelfNotification));
        }

        let recipient = self
            .users
            .get_profile(recipient_id)
            .await?
            .ok_or(AppError::NotFound(Resource::User))?;

        if let Some(sender) = sender_id {
            if self.users.get_profile(sender).await?.is_none() {
                return Err(AppError::NotFound(Resource::User));
            }
            if kind == NotificationType::Message
                && !recipient.allow_messages
                && !self.users.is_follower(recipient_id, sender).await?
            {
                return Ok(self.suppressed(SuppressReason::PrivacyDisabled));
            }
        }

        let now = Utc::now();
        let key = (recipient_id, sender_id, kind);
        if kind.is_deduplicated() {
            if !self.claim(key, now) {
                return Ok(self.suppressed(SuppressReason::Duplicate));
            }
            match self
                .notifications
                .exists_since(recipient_id, sender_id, kind, now - self.dedupe_window)
                .await
            {
                Ok(false) => {}
                Ok(true) => return Ok(self.suppressed(SuppressReason::Duplicate)),
                Err(e) => {
                    self.release(&key, now);
                    return Err(e);
                }
            }
        }

        let notification = Notification {
            id: Uuid::new_v4(),
            recipient_id,
            sender_id,
            kind,
            post_id: context.post_id,
            comment_id: context.comment_id,
            data: sanitize_payload(context.data),
            read: false,
            created_at: now,
        };

        if let Err(e) = self.notifications.insert(&notification).await {
            if kind.is_deduplicated() {
                self.release(&key, now);
            }
            return Err(e);
        }

        metrics::NOTIFICATIONS_CREATED_TOTAL
            .with_label_values(&[kind.as_str()])
            .inc();
        debug!(
            notification_id = %notification.id,
            recipient_id = %recipient_id,
            kind = kind.as_str(),
            "notification stored"
        );

        self.push(&notification).await;
        Ok(NotifyOutcome::Created(notification))
    }

    /// Same event to many recipients. The sender is filtered out and each
    /// recipient runs independently, so one failure does not abort the batch.
    pub async fn notify_many(
        &self,
        recipient_ids: &[Uuid],
        sender_id: Option<Uuid>,
        kind: NotificationType,
        context: NotificationContext,
    ) -> Vec<(Uuid, AppResult<NotifyOutcome>)> {
        let mut seen = HashSet::new();
        let targets: Vec<Uuid> = recipient_ids
            .iter()
            .copied()
            .filter(|id| Some(*id) != sender_id && seen.insert(*id))
            .collect();

        let results = join_all(
            targets
                .iter()
                .map(|id| self.notify(*id, sender_id, kind, context.clone())),
        )
        .await;

        for (id, result) in targets.iter().zip(&results) {
            if let Err(e) = result {
                warn!(recipient_id = %id, error = %e, "bulk notification failed for recipient");
                metrics::BACKGROUND_FAILURES_TOTAL
                    .with_label_values(&["notify_bulk"])
                    .inc();
            }
        }

        targets.into_iter().zip(results).collect()
    }

    pub async fn list(&self, user_id: Uuid, page: u32, limit: u32) -> AppResult<NotificationPage> {
        let page = page.max(1);
        let limit = match limit {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        };
        let offset = i64::from(page - 1) * i64::from(limit);

        let notifications = self
            .notifications
            .list(user_id, offset, i64::from(limit))
            .await?;
        let total = self.notifications.count(user_id).await?;
        let unread_count = self.notifications.count_unread(user_id).await?;

        Ok(NotificationPage {
            notifications,
            total,
            page,
            pages: (total + i64::from(limit) - 1) / i64::from(limit),
            unread_count,
        })
    }

    pub async fn unread_count(&self, user_id: Uuid) -> AppResult<i64> {
        self.notifications.count_unread(user_id).await
    }

    pub async fn stats(&self, user_id: Uuid) -> AppResult<NotificationStats> {
        self.notifications.stats(user_id).await
    }

    /// Marking an already read notification is a success.
    pub async fn mark_read(&self, user_id: Uuid, notification_id: Uuid) -> AppResult<Notification> {
        let mut notification = self.owned(user_id, notification_id).await?;
        if !notification.read {
            self.notifications.mark_read(notification_id).await?;
            notification.read = true;
        }
        Ok(notification)
    }

    pub async fn mark_all_read(&self, user_id: Uuid) -> AppResult<u64> {
        self.notifications.mark_all_read(user_id).await
    }

    pub async fn delete(&self, user_id: Uuid, notification_id: Uuid) -> AppResult<()> {
        self.owned(user_id, notification_id).await?;
        self.notifications.delete(notification_id).await?;
        Ok(())
    }

    pub async fn delete_all(&self, user_id: Uuid) -> AppResult<u64> {
        self.notifications.delete_all(user_id).await
    }

    /// Retention purge plus pruning of stale dedupe claims.
    pub async fn cleanup(&self, retention_days: i64) -> AppResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(retention_days);
        let purged = self.notifications.delete_older_than(cutoff).await?;
        metrics::NOTIFICATIONS_PURGED_TOTAL.inc_by(purged);
        self.prune_dedupe_guard();
        if purged > 0 {
            info!(purged, retention_days, "expired notifications removed");
        }
        Ok(purged)
    }

    pub fn prune_dedupe_guard(&self) {
        let horizon = Utc::now() - self.dedupe_window;
        self.recent.retain(|_, at| *at >= horizon);
    }

    async fn owned(&self, user_id: Uuid, notification_id: Uuid) -> AppResult<Notification> {
        let notification = self
            .notifications
            .get(notification_id)
            .await?
            .ok_or(AppError::NotFound(Resource::Notification))?;
        if notification.recipient_id != user_id {
            return Err(AppError::Forbidden);
        }
        Ok(notification)
    }

    async fn push(&self, notification: &Notification) {
        let unread_count = match self.notifications.count_unread(notification.recipient_id).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "unread notification count failed, push skipped");
                metrics::BACKGROUND_FAILURES_TOTAL
                    .with_label_values(&["notification_push"])
                    .inc();
                return;
            }
        };
        let event = ServerEvent::NotificationReceived {
            notification: notification.clone(),
            unread_count,
        };
        let reached = emit(
            self.presence.as_ref(),
            Channel::User(notification.recipient_id),
            &event,
            None,
        )
        .await;
        debug!(
            recipient_id = %notification.recipient_id,
            connections = reached,
            "notification pushed"
        );
    }

    fn claim(&self, key: DedupeKey, now: DateTime<Utc>) -> bool {
        match self.recent.entry(key) {
            Entry::Occupied(mut slot) => {
                if now - *slot.get() < self.dedupe_window {
                    return false;
                }
                slot.insert(now);
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }

    fn release(&self, key: &DedupeKey, claimed_at: DateTime<Utc>) {
        self.recent.remove_if(key, |_, at| *at == claimed_at);
    }

    fn suppressed(&self, reason: SuppressReason) -> NotifyOutcome {
        metrics::NOTIFICATIONS_SUPPRESSED_TOTAL
            .with_label_values(&[reason.as_str()])
            .inc();
        debug!(reason = reason.as_str(), "notification suppressed");
        NotifyOutcome::Suppressed(reason)
    }
}
