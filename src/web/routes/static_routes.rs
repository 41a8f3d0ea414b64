use axum::{
    Router,
    extract::Path,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use rust_embed::RustEmbed;
use std::sync::Arc;

use crate::web::AppState;

/// Browser front end: the status page and the push service worker.
#[derive(RustEmbed, Clone)]
#[folder = "static/"]
pub struct Assets;

pub fn create_static_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(index))
        .route("/static/{*path}", get(static_file))
}

async fn index() -> Response {
    serve_embedded("index.html")
}

async fn static_file(Path(path): Path<String>) -> Response {
    serve_embedded(&path)
}

fn serve_embedded(path: &str) -> Response {
    match Assets::get(path) {
        Some(file) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            (
                [
                    (header::CONTENT_TYPE, mime.to_string()),
                    // Browsers must pick up service worker updates promptly.
                    (header::CACHE_CONTROL, "no-cache".to_string()),
                ],
                file.data,
            )
                .into_response()
        }
        None => (StatusCode::NOT_FOUND, "Not Found").into_response(),
    }
}
