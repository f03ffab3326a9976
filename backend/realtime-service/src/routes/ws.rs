use crate::middleware::auth::bearer_token;
use crate::state::AppState;
use crate::websocket::WsSession;
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Browsers cannot set headers on the upgrade, so the token may ride in the query.
    pub token: Option<String>,
}

/// Upgrade to the realtime channel. The identity is verified before the
/// session exists; an unverified connection is never registered.
#[get("/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    query: web::Query<WsParams>,
) -> Result<HttpResponse, Error> {
    let token = query
        .into_inner()
        .token
        .filter(|t| !t.is_empty())
        .or_else(|| bearer_token(&req));

    let Some(token) = token else {
        warn!("websocket upgrade without identity token");
        return Ok(HttpResponse::Unauthorized().finish());
    };
    let user_id = match state.identity.verify(&token) {
        Ok(id) => id,
        Err(_) => return Ok(HttpResponse::Unauthorized().finish()),
    };

    let session = WsSession::new(
        user_id,
        state.sessions.clone(),
        state.config.realtime.heartbeat_interval,
        state.config.realtime.client_timeout,
    );
    ws::start(session, &req, stream)
}
