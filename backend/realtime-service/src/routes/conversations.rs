use crate::{
    error::AppError,
    middleware::guards::User,
    models::{NewMessage, SettingsUpdate},
    state::AppState,
};
use actix_web::{delete, get, post, put, web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartDirectRequest {
    #[serde(alias = "receiver_id")]
    pub receiver_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(default)]
    pub participants: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub page: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub messages: Vec<crate::models::Message>,
    pub page: u32,
    pub has_more: bool,
}

/// GET /api/v1/chats
#[get("/chats")]
pub async fn list_conversations(
    state: web::Data<AppState>,
    user: User,
) -> Result<HttpResponse, AppError> {
    let views = state.conversations.list(user.id).await?;
    Ok(HttpResponse::Ok().json(views))
}

/// POST /api/v1/chats/start
/// Find-or-create the direct conversation with `receiverId`
#[post("/chats/start")]
pub async fn start_direct(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<StartDirectRequest>,
) -> Result<HttpResponse, AppError> {
    let (conversation, created) = state
        .conversations
        .start_direct(user.id, body.receiver_id)
        .await?;
    if created {
        Ok(HttpResponse::Created().json(conversation))
    } else {
        Ok(HttpResponse::Ok().json(conversation))
    }
}

/// POST /api/v1/chats/group
#[post("/chats/group")]
pub async fn create_group(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<CreateGroupRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let conversation = state
        .conversations
        .create_group(user.id, body.name, body.participants)
        .await?;
    Ok(HttpResponse::Created().json(conversation))
}

/// PUT /api/v1/chats/{id}/settings
#[put("/chats/{id}/settings")]
pub async fn update_settings(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
    body: web::Json<SettingsUpdate>,
) -> Result<HttpResponse, AppError> {
    let settings = state
        .conversations
        .update_settings(user.id, conversation_id.into_inner(), body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(settings))
}

/// GET /api/v1/chats/{id}/messages?page=
/// Viewing history marks the conversation read for the caller.
#[get("/chats/{id}/messages")]
pub async fn get_messages(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, AppError> {
    let page = query.page.unwrap_or(1).max(1);
    let history = state
        .conversations
        .history(user.id, conversation_id.into_inner(), page)
        .await?;
    Ok(HttpResponse::Ok().json(HistoryResponse {
        messages: history.messages,
        page,
        has_more: history.has_more,
    }))
}

/// POST /api/v1/chats/{id}/messages
/// Send outside the realtime channel. Same pipeline, no socket to acknowledge.
#[post("/chats/{id}/messages")]
pub async fn send_message(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
    body: web::Json<NewMessage>,
) -> Result<HttpResponse, AppError> {
    let message = state
        .conversations
        .send(
            user.id,
            conversation_id.into_inner(),
            body.into_inner(),
            None,
            None,
        )
        .await?;
    Ok(HttpResponse::Created().json(message))
}

/// POST /api/v1/chats/{id}/read
#[post("/chats/{id}/read")]
pub async fn mark_conversation_read(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let message_ids = state
        .conversations
        .mark_conversation_read(user.id, conversation_id.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "messageIds": message_ids,
        "count": message_ids.len(),
    })))
}

/// DELETE /api/v1/chats/{id}
/// Removes the conversation and every message in it.
#[delete("/chats/{id}")]
pub async fn delete_conversation(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let removed = state
        .conversations
        .delete_conversation(user.id, conversation_id.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "deletedMessages": removed })))
}
