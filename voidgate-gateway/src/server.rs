//! # Router
//!
//! Wires every handler from [`crate::handlers`] onto its route (spec §6),
//! plus the cross-cutting tower-http layers the teacher's own server
//! assembles: tracing, a blanket request timeout, and permissive CORS
//! (narrowed at the edge by the operator's reverse proxy, not here).

use crate::dispatch::AppState;
use crate::handlers;
use crate::snake_case::to_snake_case;
use axum::body::Body;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Spec §6 "all outbound JSON keys are converted to snake_case at the
/// edge": a response-mapping middleware rather than per-handler
/// conversion, so no handler can accidentally skip it. SSE bodies
/// (`text/event-stream`) are untouched — their `data:` payloads are
/// built snake_case already by `dispatch::dispatch_streaming`.
async fn snake_case_response(response: Response) -> Response {
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false);
    if !is_json {
        return response;
    }
    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return Response::from_parts(parts, Body::empty()),
    };
    let transformed = match serde_json::from_slice::<serde_json::Value>(&bytes) {
        Ok(value) => serde_json::to_vec(&to_snake_case(value)).unwrap_or_else(|_| bytes.to_vec()),
        Err(_) => bytes.to_vec(),
    };
    parts.headers.remove(CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(transformed))
}

pub fn build_router(state: Arc<AppState>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/responses", post(handlers::create_response))
        .route("/v1/embeddings", post(handlers::embeddings))
        .route("/v1/audio/speech", post(handlers::audio_speech))
        .route("/v1/audio/transcriptions", post(handlers::audio_transcriptions))
        .route("/v1/audio/translations", post(handlers::audio_translations))
        .route("/v1/images/generations", post(handlers::image_generations))
        .route("/v1/images/edits", post(handlers::image_edits))
        .route("/v1/moderations", post(handlers::moderations))
        .route("/v1/videos", post(handlers::create_video))
        .route("/v1/videos", get(handlers::list_videos))
        .route("/v1/videos/{id}", get(handlers::get_video))
        .route("/v1/videos/{id}", delete(handlers::delete_video))
        .route("/v1/videos/{id}/content", get(handlers::video_content))
        .route("/v1/videos/{id}/remix", post(handlers::remix_video))
        .route("/v1/models", get(handlers::list_models))
        .route("/v1/models/{id}", get(handlers::get_model))
        .route("/v1/discounts/my-discounts", get(handlers::my_discounts))
        .route("/v1/discounts/eligible-models", get(handlers::eligible_models))
        .route("/admin/users", get(handlers::admin_list_users))
        .route("/admin/users/{id}", get(handlers::admin_get_user))
        .route("/admin/sub-providers/{provider_id}", get(handlers::admin_list_sub_providers))
        .route("/admin/sub-providers/{id}/enabled", post(handlers::admin_set_sub_provider_enabled))
        .route("/admin/api-logs", get(handlers::admin_api_logs))
        .route("/admin/metrics", get(handlers::admin_metrics))
        .layer(axum::middleware::map_response(snake_case_response))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
