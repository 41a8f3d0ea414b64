use axum::{Router, http::Method, routing::get};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::monitor::scheduler::LatestSample;
use crate::notifications::service::NotificationService;
use crate::notifications::store::SubscriptionStore;
use crate::web::routes::*;

pub mod error;
pub mod routes;

#[derive(Clone)]
pub struct AppState {
    pub latest_sample: LatestSample,
    pub subscription_store: Arc<SubscriptionStore>,
    pub notification_service: Arc<NotificationService>,
    pub vapid_public_key_path: PathBuf,
}

async fn health_check_handler() -> &'static str {
    "OK"
}

pub fn create_axum_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_check_handler))
        .merge(disk_routes::create_disk_router())
        .merge(notification_routes::create_notification_router())
        .merge(static_routes::create_static_router())
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
