use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::header,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

use crate::notifications::models::{Subscription, UnsubscribeRequest};
use crate::web::{AppState, error::AppError};

pub fn create_notification_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/vapid_public_key", get(get_vapid_public_key))
        .route("/subscribed_devices", get(get_subscribed_devices))
        .route("/subscribe", post(subscribe))
        .route("/unsubscribe", post(unsubscribe))
        .route("/broadcast", post(broadcast))
}

fn message(text: &str) -> Json<Value> {
    Json(json!({ "message": text }))
}

async fn get_vapid_public_key(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Value>, AppError> {
    let path = &app_state.vapid_public_key_path;
    let key = tokio::fs::read_to_string(path).await.map_err(|e| {
        AppError::InternalServerError(format!(
            "VAPID public key file could not be read at {}: {e}",
            path.display()
        ))
    })?;
    Ok(Json(json!({ "vapid_public_key": key.trim() })))
}

async fn get_subscribed_devices(
    State(app_state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let content = app_state.subscription_store.list_raw().await?;
    Ok((
        [
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
        ],
        Json(json!({ "subscribed_devices": content })),
    ))
}

async fn subscribe(
    State(app_state): State<Arc<AppState>>,
    payload: Result<Json<Subscription>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(subscription) =
        payload.map_err(|_| AppError::InvalidInput("Invalid JSON in request body.".to_string()))?;

    if app_state.subscription_store.add(subscription).await? {
        Ok(message("Subscription added successfully."))
    } else {
        Ok(message("Subscription already exists."))
    }
}

async fn unsubscribe(
    State(app_state): State<Arc<AppState>>,
    payload: Result<Json<UnsubscribeRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(request) = payload.map_err(|_| {
        AppError::InvalidInput(
            "Invalid request format. Expected a JSON body with an \"endpoint\" key.".to_string(),
        )
    })?;

    if app_state.subscription_store.remove(&request.endpoint).await? {
        Ok(message("Unsubscribed successfully."))
    } else {
        Ok(message("Subscription not found or already removed."))
    }
}

// Any JSON value is accepted except the empty ones (null, false, 0, "", [], {}).
fn is_blank(payload: &Value) -> bool {
    match payload {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
    }
}

async fn broadcast(
    State(app_state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let payload = match payload {
        Ok(Json(payload)) if !is_blank(&payload) => payload,
        _ => return Err(AppError::InvalidInput("Invalid payload.".to_string())),
    };

    info!("Broadcasting push notification on request.");
    let report = app_state.notification_service.broadcast(&payload).await?;
    Ok(Json(json!({
        "message": "Broadcast sent successfully.",
        "report": report,
    })))
}
