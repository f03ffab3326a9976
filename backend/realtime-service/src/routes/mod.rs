pub mod conversations;
pub mod messages;
pub mod notifications;
pub mod ws;

use crate::middleware::{IdentityVerifier, JwtAuth};
use actix_web::web;
use std::sync::Arc;

/// Mount the `/ws` upgrade and the authenticated `/api/v1` surface.
pub fn configure(cfg: &mut web::ServiceConfig, identity: Arc<IdentityVerifier>) {
    cfg.service(ws::ws_handler).service(
        web::scope("/api/v1")
            .wrap(JwtAuth::new(identity))
            .service(conversations::list_conversations)
            .service(conversations::start_direct)
            .service(conversations::create_group)
            .service(conversations::update_settings)
            .service(conversations::get_messages)
            .service(conversations::send_message)
            .service(conversations::mark_conversation_read)
            .service(conversations::delete_conversation)
            .service(messages::mark_message_read)
            .service(messages::delete_message)
            .service(messages::react_to_message)
            .service(notifications::list_notifications)
            .service(notifications::unread_count)
            .service(notifications::stats)
            .service(notifications::mark_all_read)
            .service(notifications::mark_read)
            .service(notifications::delete_all)
            .service(notifications::delete_notification)
            .service(notifications::create_bulk)
            .service(notifications::create_notification),
    );
}
