pub mod conversation_service;
pub mod maintenance;
pub mod message_pipeline;
pub mod notification_service;
pub mod rate_limit;
pub mod sanitize;
pub mod session_manager;
pub mod unread;

pub use conversation_service::ConversationService;
pub use message_pipeline::MessagePipeline;
pub use notification_service::{NotificationPage, NotificationService};
pub use rate_limit::ListRateLimiter;
pub use session_manager::RealtimeSessionManager;
pub use unread::UnreadService;

use crate::presence::{Channel, ConnectionId, PresenceRegistry};
use crate::websocket::events::ServerEvent;

/// Serialize once and hand the frame to every connection on `channel`.
pub(crate) async fn emit(
    presence: &dyn PresenceRegistry,
    channel: Channel,
    event: &ServerEvent,
    except: Option<ConnectionId>,
) -> usize {
    match event.to_json() {
        Ok(payload) => presence.send_to_channel(channel, &payload, except).await,
        Err(e) => {
            tracing::warn!(error = %e, channel = %channel, "outbound event serialization failed");
            0
        }
    }
}
