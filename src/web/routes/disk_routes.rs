use axum::{Json, Router, extract::State, routing::get};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::web::{AppState, error::AppError};

pub fn create_disk_router() -> Router<Arc<AppState>> {
    Router::new().route("/disk_stats", get(get_disk_stats))
}

// Latest sample, or `{}` until the first check has completed.
async fn get_disk_stats(State(app_state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    match app_state.latest_sample.get() {
        Some(sample) => Ok(Json(serde_json::to_value(sample.as_ref())?)),
        None => {
            debug!("Disk stats requested before the first check completed.");
            Ok(Json(serde_json::json!({})))
        }
    }
}
