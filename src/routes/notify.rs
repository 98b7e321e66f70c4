use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::db::models::{Channel, NotificationStatus};
use crate::error::AppResult;
use crate::services::notifier::CreateNotificationRequest;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/notify", post(create_notification))
        .route("/notify/:id", get(get_notification).delete(cancel_notification))
}

// ============================================================================
// Response Types
// ============================================================================

/// Standard success envelope: `{"result": ...}`. Errors render as
/// `{"error": "..."}` through `AppError`.
#[derive(Serialize)]
struct ApiResponse<T> {
    result: T,
}

#[derive(Serialize)]
struct CreatedResponse {
    id: String,
    status: NotificationStatus,
}

#[derive(Serialize)]
struct NotificationResponse {
    id: String,
    status: NotificationStatus,
    payload: String,
    channel: Channel,
    notification_date: String,
    recipient_id: String,
}

#[derive(Serialize)]
struct CancelledResponse {
    status: &'static str,
}

// ============================================================================
// Handlers
// ============================================================================

/// Handles POST /api/v1/notify
async fn create_notification(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateNotificationRequest>,
) -> AppResult<Json<ApiResponse<CreatedResponse>>> {
    state.validator.validate_create_request(&req)?;

    let notification = state.service.create_notification(req).await?;

    tracing::info!(
        notification_id = %notification.id,
        channel = %notification.channel.as_str(),
        recipient_id = %notification.recipient_id,
        "Notification created successfully"
    );

    Ok(Json(ApiResponse {
        result: CreatedResponse {
            id: notification.id,
            status: notification.status,
        },
    }))
}

/// Handles GET /api/v1/notify/{id}
async fn get_notification(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<NotificationResponse>>> {
    state.validator.validate_notification_id(&id)?;

    let notification = state.service.get_notification(&id).await?;

    tracing::info!(
        notification_id = %notification.id,
        status = %notification.status.as_str(),
        "Notification status retrieved"
    );

    Ok(Json(ApiResponse {
        result: NotificationResponse {
            id: notification.id,
            status: notification.status,
            payload: notification.payload,
            channel: notification.channel,
            notification_date: notification.scheduled_at.to_rfc3339(),
            recipient_id: notification.recipient_id,
        },
    }))
}

/// Handles DELETE /api/v1/notify/{id}
async fn cancel_notification(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<CancelledResponse>>> {
    state.validator.validate_notification_id(&id)?;

    state.service.cancel_notification(&id).await?;

    tracing::info!(notification_id = %id, "Notification cancelled successfully");

    Ok(Json(ApiResponse {
        result: CancelledResponse { status: "OK" },
    }))
}
