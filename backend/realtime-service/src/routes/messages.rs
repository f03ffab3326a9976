use crate::{error::AppError, middleware::guards::User, state::AppState};
use actix_web::{delete, post, web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct ReactRequest {
    pub emoji: String,
}

/// POST /api/v1/messages/{id}/read
#[post("/messages/{id}/read")]
pub async fn mark_message_read(
    state: web::Data<AppState>,
    user: User,
    message_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let updated = state
        .conversations
        .mark_read(user.id, message_id.into_inner())
        .await?;
    // Already-read is success; `newlyRead` tells the two apart.
    Ok(HttpResponse::Ok().json(serde_json::json!({ "newlyRead": updated.is_some() })))
}

/// DELETE /api/v1/messages/{id}
/// Soft delete by the sender; the record stays for ordering and replies.
#[delete("/messages/{id}")]
pub async fn delete_message(
    state: web::Data<AppState>,
    user: User,
    message_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let message = state
        .conversations
        .delete_message(user.id, message_id.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(message))
}

/// POST /api/v1/messages/{id}/react
#[post("/messages/{id}/react")]
pub async fn react_to_message(
    state: web::Data<AppState>,
    user: User,
    message_id: web::Path<Uuid>,
    body: web::Json<ReactRequest>,
) -> Result<HttpResponse, AppError> {
    let message = state
        .conversations
        .react(user.id, message_id.into_inner(), &body.emoji)
        .await?;
    Ok(HttpResponse::Ok().json(message))
}
