use super::events::{ClientEvent, ServerEvent};
use crate::presence::ConnectionId;
use crate::services::RealtimeSessionManager;
use actix::{Actor, ActorContext, AsyncContext, StreamHandler, WrapFuture};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One authenticated realtime connection.
///
/// Inbound frames are handled one at a time, in arrival order, so a client's
/// `send_message` followed by `typing_stop` is never reordered.
pub struct WsSession {
    connection_id: ConnectionId,
    user_id: Uuid,
    manager: Arc<RealtimeSessionManager>,
    outbound: Option<UnboundedReceiver<String>>,
    outbound_tx: Option<tokio::sync::mpsc::UnboundedSender<String>>,
    hb: Instant,
    heartbeat_interval: Duration,
    client_timeout: Duration,
}

impl WsSession {
    pub fn new(
        user_id: Uuid,
        manager: Arc<RealtimeSessionManager>,
        heartbeat_interval: Duration,
        client_timeout: Duration,
    ) -> Self {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        Self {
            connection_id: ConnectionId::new(),
            user_id,
            manager,
            outbound: Some(rx),
            outbound_tx: Some(tx),
            hb: Instant::now(),
            heartbeat_interval,
            client_timeout,
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let timeout = self.client_timeout;
        ctx.run_interval(self.heartbeat_interval, move |act, ctx| {
            if Instant::now().duration_since(act.hb) > timeout {
                warn!(
                    connection_id = %act.connection_id,
                    user_id = %act.user_id,
                    "websocket heartbeat timed out, disconnecting"
                );
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn handle_text(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let event = match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => event,
            Err(e) => {
                debug!(connection_id = %self.connection_id, error = %e, "unparseable frame");
                let reject = ServerEvent::Error {
                    code: error_types::error_codes::VALIDATION_FAILED.to_string(),
                    message: format!("invalid event: {e}"),
                    retryable: false,
                };
                if let Ok(payload) = reject.to_json() {
                    ctx.text(payload);
                }
                return;
            }
        };

        let manager = self.manager.clone();
        let (connection, user) = (self.connection_id, self.user_id);
        ctx.wait(
            async move { manager.handle_event(connection, user, event).await }.into_actor(self),
        );
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(
            connection_id = %self.connection_id,
            user_id = %self.user_id,
            "websocket session started"
        );

        if let Some(rx) = self.outbound.take() {
            ctx.add_stream(UnboundedReceiverStream::new(rx));
        }

        // Registration finishes before any inbound frame is processed.
        if let Some(tx) = self.outbound_tx.take() {
            let manager = self.manager.clone();
            let (connection, user) = (self.connection_id, self.user_id);
            ctx.wait(
                async move { manager.connect(connection, user, tx).await }.into_actor(self),
            );
        }

        self.hb(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(
            connection_id = %self.connection_id,
            user_id = %self.user_id,
            "websocket session stopped"
        );
        let manager = self.manager.clone();
        let connection = self.connection_id;
        actix::spawn(async move {
            manager.disconnect(connection).await;
        });
    }
}

/// Frames queued for this connection by the presence registry
impl StreamHandler<String> for WsSession {
    fn handle(&mut self, payload: String, ctx: &mut Self::Context) {
        ctx.text(payload);
    }

    // The registry holds the sender until disconnect; nothing to do when the
    // stream ends.
    fn finished(&mut self, _ctx: &mut Self::Context) {}
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                self.handle_text(&text, ctx);
            }
            Ok(ws::Message::Binary(_)) => {
                warn!(connection_id = %self.connection_id, "binary websocket frames not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                debug!(connection_id = %self.connection_id, ?reason, "close frame received");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(e) => {
                warn!(connection_id = %self.connection_id, error = %e, "websocket protocol error");
                ctx.stop();
            }
        }
    }
}
