//! Notification REST handlers

use crate::{
    error::AppError,
    middleware::guards::User,
    models::{NotificationContext, NotificationType, NotifyOutcome, SuppressReason},
    services::notification_service::DEFAULT_PAGE_SIZE,
    state::AppState,
};
use actix_web::{delete, get, post, put, web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// API Response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// Create a notification on behalf of the caller
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNotificationPayload {
    pub recipient_id: Uuid,
    #[serde(rename = "type")]
    pub notification_type: String,
    #[serde(flatten)]
    pub context: NotificationContext,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkNotificationPayload {
    pub recipient_ids: Vec<Uuid>,
    #[serde(rename = "type")]
    pub notification_type: String,
    #[serde(flatten)]
    pub context: NotificationContext,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyResult {
    pub recipient_id: Uuid,
    pub created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppressed: Option<SuppressReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NotifyResult {
    fn from_outcome(recipient_id: Uuid, outcome: &NotifyOutcome) -> Self {
        let (notification_id, suppressed) = match outcome {
            NotifyOutcome::Created(n) => (Some(n.id), None),
            NotifyOutcome::Suppressed(reason) => (None, Some(*reason)),
        };
        Self {
            recipient_id,
            created: outcome.is_created(),
            notification_id,
            suppressed,
            error: None,
        }
    }
}

/// GET /api/v1/notifications
#[get("/notifications")]
pub async fn list_notifications(
    state: web::Data<AppState>,
    user: User,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, AppError> {
    state.list_limiter.check(user.id)?;
    let page = state
        .notifications
        .list(
            user.id,
            query.page.unwrap_or(1),
            query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
        )
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(page)))
}

/// GET /api/v1/notifications/unread-count
#[get("/notifications/unread-count")]
pub async fn unread_count(
    state: web::Data<AppState>,
    user: User,
) -> Result<HttpResponse, AppError> {
    let count = state.notifications.unread_count(user.id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(serde_json::json!({ "unreadCount": count }))))
}

/// GET /api/v1/notifications/stats
#[get("/notifications/stats")]
pub async fn stats(state: web::Data<AppState>, user: User) -> Result<HttpResponse, AppError> {
    let stats = state.notifications.stats(user.id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(stats)))
}

/// PUT /api/v1/notifications/read-all
#[put("/notifications/read-all")]
pub async fn mark_all_read(
    state: web::Data<AppState>,
    user: User,
) -> Result<HttpResponse, AppError> {
    let modified = state.notifications.mark_all_read(user.id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(
        serde_json::json!({ "modifiedCount": modified }),
    )))
}

/// PUT /api/v1/notifications/{id}/read
#[put("/notifications/{id}/read")]
pub async fn mark_read(
    state: web::Data<AppState>,
    user: User,
    notification_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let notification = state
        .notifications
        .mark_read(user.id, notification_id.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(notification)))
}

/// DELETE /api/v1/notifications
#[delete("/notifications")]
pub async fn delete_all(
    state: web::Data<AppState>,
    user: User,
) -> Result<HttpResponse, AppError> {
    let deleted = state.notifications.delete_all(user.id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(
        serde_json::json!({ "deletedCount": deleted }),
    )))
}

/// DELETE /api/v1/notifications/{id}
#[delete("/notifications/{id}")]
pub async fn delete_notification(
    state: web::Data<AppState>,
    user: User,
    notification_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let notification_id = notification_id.into_inner();
    state.notifications.delete(user.id, notification_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(
        serde_json::json!({ "id": notification_id }),
    )))
}

/// POST /api/v1/notifications
#[post("/notifications")]
pub async fn create_notification(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<CreateNotificationPayload>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let kind: NotificationType = body.notification_type.parse()?;
    let outcome = state
        .notifications
        .notify(body.recipient_id, Some(user.id), kind, body.context)
        .await?;

    let result = NotifyResult::from_outcome(body.recipient_id, &outcome);
    if outcome.is_created() {
        Ok(HttpResponse::Created().json(ApiResponse::ok(result)))
    } else {
        Ok(HttpResponse::Ok().json(ApiResponse::ok(result)))
    }
}

/// POST /api/v1/notifications/bulk
/// One result per distinct recipient; a failed recipient does not fail the batch.
#[post("/notifications/bulk")]
pub async fn create_bulk(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<BulkNotificationPayload>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let kind: NotificationType = body.notification_type.parse()?;
    let results = state
        .notifications
        .notify_many(&body.recipient_ids, Some(user.id), kind, body.context)
        .await;

    let results: Vec<NotifyResult> = results
        .into_iter()
        .map(|(recipient_id, result)| match result {
            Ok(outcome) => NotifyResult::from_outcome(recipient_id, &outcome),
            Err(e) => NotifyResult {
                recipient_id,
                created: false,
                notification_id: None,
                suppressed: None,
                error: Some(e.client_message()),
            },
        })
        .collect();
    Ok(HttpResponse::Ok().json(ApiResponse::ok(results)))
}
