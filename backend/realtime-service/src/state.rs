use crate::{
    config::Config,
    error::AppResult,
    middleware::IdentityVerifier,
    presence::{InMemoryPresenceRegistry, PresenceRegistry},
    repository::Stores,
    services::{
        ConversationService, ListRateLimiter, MessagePipeline, NotificationService,
        RealtimeSessionManager, UnreadService,
    },
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub stores: Stores,
    pub presence: Arc<dyn PresenceRegistry>,
    pub sessions: Arc<RealtimeSessionManager>,
    pub conversations: Arc<ConversationService>,
    pub notifications: Arc<NotificationService>,
    pub identity: Arc<IdentityVerifier>,
    /// Throttles notification-list reads per user, process-local
    pub list_limiter: Arc<ListRateLimiter>,
}

impl AppState {
    /// Wire every service over the given stores with a fresh presence registry.
    pub fn build(config: Config, stores: Stores) -> AppResult<Self> {
        let presence: Arc<dyn PresenceRegistry> = Arc::new(InMemoryPresenceRegistry::new());
        let identity = Arc::new(IdentityVerifier::new(&config.jwt_key)?);
        let list_limiter = Arc::new(ListRateLimiter::per_minute(
            config.notifications.list_rate_per_minute,
        )?);

        let notifications = Arc::new(NotificationService::new(
            stores.notifications.clone(),
            stores.users.clone(),
            presence.clone(),
            config.notifications.dedupe_window,
        ));
        let unread = Arc::new(UnreadService::new(stores.clone(), presence.clone()));
        let pipeline = Arc::new(MessagePipeline::new(
            stores.clone(),
            presence.clone(),
            notifications.clone(),
            config.realtime.delivery_delay,
        ));
        let conversations = Arc::new(ConversationService::new(
            stores.clone(),
            presence.clone(),
            pipeline,
            unread,
        ));
        let sessions = Arc::new(RealtimeSessionManager::new(
            presence.clone(),
            stores.clone(),
            conversations.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            stores,
            presence,
            sessions,
            conversations,
            notifications,
            identity,
            list_limiter,
        })
    }
}
