#![allow(dead_code)]

use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use realtime_service::{
    config::Config,
    middleware::auth::Claims,
    models::UserProfile,
    presence::ConnectionId,
    repository::{InMemoryUserDirectory, Stores},
    state::AppState,
    websocket::ClientEvent,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use uuid::Uuid;

pub const SECRET: &str = "integration-test-secret";

pub struct Harness {
    pub state: AppState,
    pub users: Arc<InMemoryUserDirectory>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::in_memory(SECRET))
    }

    pub fn with_config(config: Config) -> Self {
        let users = Arc::new(InMemoryUserDirectory::new());
        let stores = Stores::in_memory(users.clone());
        let state = AppState::build(config, stores).expect("state");
        Self { state, users }
    }

    pub async fn user(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.users
            .upsert_profile(UserProfile::new(id, name, name.to_lowercase()))
            .await;
        id
    }

    pub async fn connect(&self, user_id: Uuid) -> Client {
        let (tx, rx) = unbounded_channel();
        let connection = ConnectionId::new();
        self.state.sessions.connect(connection, user_id, tx).await;
        Client {
            connection,
            user_id,
            rx,
        }
    }

    pub async fn disconnect(&self, client: &Client) {
        self.state.sessions.disconnect(client.connection).await;
    }

    pub async fn send(&self, client: &Client, event: Value) {
        let event: ClientEvent = serde_json::from_value(event).expect("client event");
        self.state
            .sessions
            .handle_event(client.connection, client.user_id, event)
            .await;
    }

    pub async fn direct(&self, a: Uuid, b: Uuid) -> Uuid {
        let (conversation, _) = self
            .state
            .conversations
            .start_direct(a, b)
            .await
            .expect("direct conversation");
        conversation.id
    }
}

pub struct Client {
    pub connection: ConnectionId,
    pub user_id: Uuid,
    rx: UnboundedReceiver<String>,
}

impl Client {
    /// Every frame queued so far, parsed.
    pub fn drain(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(raw) = self.rx.try_recv() {
            frames.push(serde_json::from_str(&raw).expect("server frame is json"));
        }
        frames
    }

    pub fn drain_of(&mut self, kind: &str) -> Vec<Value> {
        self.drain()
            .into_iter()
            .filter(|f| f["type"] == kind)
            .collect()
    }
}

pub fn token_for(user_id: Uuid) -> String {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: Utc::now().timestamp() + 3600,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("token")
}
