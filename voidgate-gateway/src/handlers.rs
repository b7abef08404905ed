//! # HTTP Handlers
//!
//! One axum handler per route in spec §6's inbound surface. Each handler
//! parses its body into the SDK's normalized request type, picks a
//! `Capability`, and drives [`crate::dispatch::dispatch_unary`] (or
//! `dispatch_streaming` for chat/responses with `stream: true`) with a
//! closure that calls the one adapter method for that endpoint.

use crate::auth::{AuthContext as RawAuthContext, AuthError, AuthService};
use crate::cache::RateLimiter;
use crate::dispatch::{self, AppState, MAX_RETRIES_DEFAULT, MAX_RETRIES_VIDEO};
use crate::error::DispatchError;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{HeaderValue, StatusCode};
use axum::response::sse::Sse;
use axum::response::{IntoResponse, Json, Response};
use futures::future::BoxFuture;
use serde::Deserialize;
use std::sync::Arc;
use voidgate_sdk::models::*;
use voidgate_sdk::{Adapter, Capability, ChatStream, ProviderError};

type AppResult<T> = Result<T, DispatchError>;

/// Auth + rate-limit extractor: resolves `Authorization`, applies the
/// sliding-window limiter keyed on API-key prefix or client IP (spec §6),
/// and hands handlers an owned [`RawAuthContext`].
pub struct Ctx(pub RawAuthContext);

impl AuthError {
    fn into_dispatch(self) -> DispatchError {
        match self {
            AuthError::AccountDisabled | AuthError::IpAccessDenied | AuthError::AdminRequired => {
                DispatchError::PlanAccessDenied { model: self.to_string() }
            }
            other => DispatchError::Auth { message: other.to_string() },
        }
    }
}

impl FromRequestParts<Arc<AppState>> for Ctx {
    type Rejection = DispatchError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let auth_header = parts.headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok());
        let cf_ip = parts.headers.get("cf-connecting-ip").and_then(|v| v.to_str().ok());
        let xff = parts.headers.get("x-forwarded-for").and_then(|v| v.to_str().ok());
        let client_ip = AuthService::resolve_client_ip(cf_ip, xff);

        let ctx = state
            .auth
            .authenticate(auth_header, chrono::Utc::now().timestamp_millis(), client_ip)
            .await
            .map_err(AuthError::into_dispatch)?;

        let identity = auth_header.map(|h| h.trim_start_matches("Bearer ")).map(|k| k.to_string()).unwrap_or_else(|| ctx.user.id.clone());
        if !state.rate_limiter.check(&identity, chrono::Utc::now().timestamp_millis()).await {
            return Err(DispatchError::RateLimit);
        }

        Ok(Ctx(ctx))
    }
}

fn estimate_tokens_for_messages(messages: &[Message]) -> u64 {
    messages
        .iter()
        .map(|m| match &m.content {
            MessageContent::Text(s) => (s.len() / 4) as u64,
            MessageContent::Parts(parts) => parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => (text.len() / 4) as u64,
                    ContentPart::ImageUrl { .. } => 512,
                })
                .sum(),
        })
        .sum::<u64>()
        .max(1)
}

fn request_size_of<T: serde::Serialize>(value: &T) -> u64 {
    serde_json::to_vec(value).map(|b| b.len() as u64).unwrap_or(0)
}

/// Adds the SSE response headers spec §6 calls for beyond what axum's
/// `Sse` already sets (`Content-Type: text/event-stream`): disables
/// upstream buffering so the proxy path doesn't batch chunks.
fn sse_headers(mut response: Response) -> Response {
    response.headers_mut().insert("Cache-Control", HeaderValue::from_static("no-cache"));
    response.headers_mut().insert("X-Accel-Buffering", HeaderValue::from_static("no"));
    response
}

// ---------------------------------------------------------------------
// Chat completions
// ---------------------------------------------------------------------

pub async fn chat_completions(State(state): State<Arc<AppState>>, Ctx(ctx): Ctx, Json(req): Json<ChatRequest>) -> AppResult<Response> {
    let estimated_tokens = estimate_tokens_for_messages(&req.messages);
    let request_size = request_size_of(&req);
    let model = req.model.clone();

    let prompt_text = req.messages.iter().map(|m| m.content.as_text()).collect::<Vec<_>>().join("\n");

    if req.stream.unwrap_or(false) {
        let start: dispatch::StartStream = Box::new(move |adapter: Arc<dyn Adapter>| -> BoxFuture<'static, Result<ChatStream, ProviderError>> {
            let req = req.clone();
            Box::pin(async move { adapter.stream_chat_completion(req).await })
        });
        let stream = dispatch::dispatch_streaming(
            state,
            ctx,
            model,
            "chat/completions".to_string(),
            Capability::Chat,
            estimated_tokens,
            request_size,
            MAX_RETRIES_DEFAULT,
            Some(prompt_text),
            start,
        )
        .await?;
        Ok(sse_headers(Sse::new(stream).into_response()))
    } else {
        let result = dispatch::dispatch_unary(
            &state,
            &ctx,
            &model,
            "chat/completions",
            Capability::Chat,
            estimated_tokens,
            request_size,
            MAX_RETRIES_DEFAULT,
            Some(&prompt_text),
            |adapter| {
                let req = req.clone();
                async move {
                    let resp = adapter.chat_completion(req).await?;
                    let tokens = resp.usage.map(|u| u.total_tokens as u64).unwrap_or(0);
                    Ok((resp, tokens))
                }
            },
        )
        .await?;
        Ok(Json(result.result).into_response())
    }
}

// ---------------------------------------------------------------------
// Responses protocol
// ---------------------------------------------------------------------

pub async fn create_response(State(state): State<Arc<AppState>>, Ctx(ctx): Ctx, Json(req): Json<ResponsesRequest>) -> AppResult<Response> {
    let estimated_tokens = match &req.input {
        ResponsesInput::Text(s) => (s.len() / 4).max(1) as u64,
        ResponsesInput::Messages(msgs) => msgs.len().max(1) as u64 * 64,
    };
    let request_size = request_size_of(&req);
    let model = req.model.clone();
    let prompt_text = match &req.input {
        ResponsesInput::Text(s) => s.clone(),
        ResponsesInput::Messages(msgs) => msgs
            .iter()
            .flat_map(|m| &m.content)
            .filter_map(|p| match p {
                ResponsesContentPart::InputText { text } => Some(text.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    };

    if req.stream.unwrap_or(false) {
        let start: dispatch::StartStream = Box::new(move |adapter: Arc<dyn Adapter>| -> BoxFuture<'static, Result<ChatStream, ProviderError>> {
            let req = req.clone();
            Box::pin(async move { adapter.stream_response(req).await })
        });
        let stream = dispatch::dispatch_streaming(
            state,
            ctx,
            model,
            "responses".to_string(),
            Capability::Responses,
            estimated_tokens,
            request_size,
            MAX_RETRIES_DEFAULT,
            Some(prompt_text),
            start,
        )
        .await?;
        Ok(sse_headers(Sse::new(stream).into_response()))
    } else {
        let result = dispatch::dispatch_unary(
            &state,
            &ctx,
            &model,
            "responses",
            Capability::Responses,
            estimated_tokens,
            request_size,
            MAX_RETRIES_DEFAULT,
            Some(&prompt_text),
            |adapter| {
                let req = req.clone();
                async move {
                    let resp = adapter.create_response(req).await?;
                    let tokens = resp.usage.map(|u| u.total_tokens as u64).unwrap_or(0);
                    Ok((resp, tokens))
                }
            },
        )
        .await?;
        Ok(Json(result.result).into_response())
    }
}

// ---------------------------------------------------------------------
// Embeddings
// ---------------------------------------------------------------------

pub async fn embeddings(State(state): State<Arc<AppState>>, Ctx(ctx): Ctx, Json(req): Json<EmbeddingRequest>) -> AppResult<Json<EmbeddingResponse>> {
    let estimated_tokens = match &req.input {
        EmbeddingInput::String(s) => (s.len() / 4).max(1) as u64,
        EmbeddingInput::StringArray(items) => items.iter().map(|s| (s.len() / 4).max(1) as u64).sum(),
    };
    let request_size = request_size_of(&req);
    let model = req.model.clone();
    let result = dispatch::dispatch_unary(&state, &ctx, &model, "embeddings", Capability::Embeddings, estimated_tokens, request_size, MAX_RETRIES_DEFAULT, None, |adapter| {
        let req = req.clone();
        async move {
            let resp = adapter.create_embeddings(req).await?;
            let tokens = resp.usage.total_tokens as u64;
            Ok((resp, tokens))
        }
    })
    .await?;
    Ok(Json(result.result))
}

// ---------------------------------------------------------------------
// Audio
// ---------------------------------------------------------------------

pub async fn audio_speech(State(state): State<Arc<AppState>>, Ctx(ctx): Ctx, Json(req): Json<SpeechRequest>) -> AppResult<Response> {
    let estimated_tokens = (req.input.len() / 4).max(1) as u64;
    let request_size = request_size_of(&req);
    let model = req.model.clone();
    let prompt_text = req.input.clone();
    let result = dispatch::dispatch_unary(&state, &ctx, &model, "audio/speech", Capability::Audio, estimated_tokens, request_size, MAX_RETRIES_DEFAULT, Some(&prompt_text), |adapter| {
        let req = req.clone();
        async move {
            let resp = adapter.text_to_speech(req).await?;
            Ok((resp, 0))
        }
    })
    .await?;
    let mut response = result.result.audio.into_response();
    response.headers_mut().insert(axum::http::header::CONTENT_TYPE, HeaderValue::from_str(&result.result.content_type).unwrap_or(HeaderValue::from_static("application/octet-stream")));
    Ok(response)
}

pub async fn audio_transcriptions(State(state): State<Arc<AppState>>, Ctx(ctx): Ctx, Json(req): Json<AudioTranscriptionRequest>) -> AppResult<Json<AudioTranscriptionResponse>> {
    transcribe_like(state, ctx, req, "audio/transcriptions").await
}

/// `/v1/audio/translations`: the SDK's adapter contract only names
/// `audio_transcription` (spec §4.5 lists no separate translate
/// operation), so translation rides the same adapter call with the
/// endpoint name threaded through for billing/tracking purposes.
pub async fn audio_translations(State(state): State<Arc<AppState>>, Ctx(ctx): Ctx, Json(req): Json<AudioTranscriptionRequest>) -> AppResult<Json<AudioTranscriptionResponse>> {
    transcribe_like(state, ctx, req, "audio/translations").await
}

async fn transcribe_like(state: Arc<AppState>, ctx: RawAuthContext, req: AudioTranscriptionRequest, endpoint: &'static str) -> AppResult<Json<AudioTranscriptionResponse>> {
    let estimated_tokens = (req.file.len() / 1000).max(1) as u64;
    let request_size = req.file.len() as u64;
    let model = req.model.clone();
    let result = dispatch::dispatch_unary(&state, &ctx, &model, endpoint, Capability::Audio, estimated_tokens, request_size, MAX_RETRIES_DEFAULT, None, |adapter| {
        let req = req.clone();
        async move {
            let resp = adapter.audio_transcription(req).await?;
            Ok((resp, 0))
        }
    })
    .await?;
    Ok(Json(result.result))
}

// ---------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------

pub async fn image_generations(State(state): State<Arc<AppState>>, Ctx(ctx): Ctx, Json(req): Json<ImageRequest>) -> AppResult<Json<ImageResponse>> {
    let estimated_tokens = req.n.unwrap_or(1) as u64 * 256;
    let request_size = request_size_of(&req);
    let model = req.model.clone().unwrap_or_else(|| "default".to_string());
    let prompt_text = req.prompt.clone();
    let result = dispatch::dispatch_unary(&state, &ctx, &model, "images/generations", Capability::Images, estimated_tokens, request_size, MAX_RETRIES_DEFAULT, Some(&prompt_text), |adapter| {
        let req = req.clone();
        async move {
            let resp = adapter.generate_images(req).await?;
            Ok((resp, 0))
        }
    })
    .await?;
    Ok(Json(result.result))
}

pub async fn image_edits(State(state): State<Arc<AppState>>, Ctx(ctx): Ctx, Json(req): Json<ImageEditRequest>) -> AppResult<Json<ImageResponse>> {
    let estimated_tokens = req.n.unwrap_or(1) as u64 * 256;
    let request_size = req.image.len() as u64;
    let model = req.model.clone().unwrap_or_else(|| "default".to_string());
    let prompt_text = req.prompt.clone();
    let result = dispatch::dispatch_unary(&state, &ctx, &model, "images/edits", Capability::Images, estimated_tokens, request_size, MAX_RETRIES_DEFAULT, Some(&prompt_text), |adapter| {
        let req = req.clone();
        async move {
            let resp = adapter.edit_images(req).await?;
            Ok((resp, 0))
        }
    })
    .await?;
    Ok(Json(result.result))
}

// ---------------------------------------------------------------------
// Moderations
// ---------------------------------------------------------------------

pub async fn moderations(State(state): State<Arc<AppState>>, Ctx(ctx): Ctx, Json(req): Json<ModerationRequest>) -> AppResult<Json<ModerationResponse>> {
    let estimated_tokens = (req.input.len() / 4).max(1) as u64;
    let request_size = request_size_of(&req);
    let model = req.model.clone().unwrap_or_else(|| "omni-moderation-latest".to_string());
    let result = dispatch::dispatch_unary(&state, &ctx, &model, "moderations", Capability::Moderation, estimated_tokens, request_size, MAX_RETRIES_DEFAULT, None, |adapter| {
        let req = req.clone();
        async move {
            let resp = adapter.moderate_content(req).await?;
            Ok((resp, 0))
        }
    })
    .await?;
    Ok(Json(result.result))
}

// ---------------------------------------------------------------------
// Videos
// ---------------------------------------------------------------------

pub async fn create_video(State(state): State<Arc<AppState>>, Ctx(ctx): Ctx, Json(req): Json<VideoCreateRequest>) -> AppResult<Json<VideoStatusResponse>> {
    let estimated_tokens = req.seconds.unwrap_or(4) as u64 * 1000;
    let request_size = request_size_of(&req);
    let model = req.model.clone();
    let prompt_text = req.prompt.clone();
    let result = dispatch::dispatch_unary(&state, &ctx, &model, "videos", Capability::Videos, estimated_tokens, request_size, MAX_RETRIES_VIDEO, Some(&prompt_text), |adapter| {
        let req = req.clone();
        async move {
            let resp = adapter.create_video(req).await?;
            Ok((resp, 0))
        }
    })
    .await?;

    state
        .video_jobs
        .insert(crate::domain::VideoJob {
            id: result.result.id.clone(),
            user_id: Some(ctx.user.id.clone()),
            model: model.clone(),
            provider_name: result.provider_id.clone(),
            sub_provider_id: result.sub_provider_id.clone(),
            status: result.result.status.clone(),
            size: req.size.clone(),
            seconds: req.seconds,
        })
        .await
        .map_err(|e| DispatchError::Internal { message: e.to_string() })?;

    Ok(Json(result.result))
}

/// A video job belongs to whoever created it; anyone else (short of a
/// master admin) gets the same "unknown video" error a nonexistent id
/// would, rather than a distinguishable forbidden response that would
/// confirm the id exists.
fn ensure_video_owner(job: &crate::domain::VideoJob, ctx: &RawAuthContext) -> AppResult<()> {
    if ctx.user.is_master_admin() || job.user_id.as_deref() == Some(ctx.user.id.as_str()) {
        Ok(())
    } else {
        Err(DispatchError::Validation { message: format!("unknown video: {}", job.id) })
    }
}

pub async fn get_video(State(state): State<Arc<AppState>>, Ctx(ctx): Ctx, Path(video_id): Path<String>) -> AppResult<Json<VideoStatusResponse>> {
    let job = state.video_jobs.get(&video_id).await.map_err(|_| DispatchError::Validation { message: format!("unknown video: {video_id}") })?;
    ensure_video_owner(&job, &ctx)?;
    let adapter = state.provider_registry.get_adapter(&job.provider_name, "").map_err(DispatchError::Provider)?;
    let resp = adapter.get_video_status(&video_id).await.map_err(DispatchError::Provider)?;
    Ok(Json(resp))
}

pub async fn list_videos(State(state): State<Arc<AppState>>, Ctx(_ctx): Ctx) -> AppResult<Json<Vec<VideoStatusResponse>>> {
    let mut all = Vec::new();
    for provider in state.provider_registry.providers() {
        if !provider.capabilities.contains(&Capability::Videos) {
            continue;
        }
        if let Ok(adapter) = state.provider_registry.get_adapter(&provider.id, "") {
            if let Ok(mut jobs) = adapter.list_videos().await {
                all.append(&mut jobs);
            }
        }
    }
    Ok(Json(all))
}

pub async fn delete_video(State(state): State<Arc<AppState>>, Ctx(ctx): Ctx, Path(video_id): Path<String>) -> AppResult<StatusCode> {
    let job = state.video_jobs.get(&video_id).await.map_err(|_| DispatchError::Validation { message: format!("unknown video: {video_id}") })?;
    ensure_video_owner(&job, &ctx)?;
    let adapter = state.provider_registry.get_adapter(&job.provider_name, "").map_err(DispatchError::Provider)?;
    adapter.delete_video(&video_id).await.map_err(DispatchError::Provider)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn video_content(State(state): State<Arc<AppState>>, Ctx(ctx): Ctx, Path(video_id): Path<String>, Query(q): Query<VideoContentQuery>) -> AppResult<Response> {
    let job = state.video_jobs.get(&video_id).await.map_err(|_| DispatchError::Validation { message: format!("unknown video: {video_id}") })?;
    ensure_video_owner(&job, &ctx)?;
    let adapter = state.provider_registry.get_adapter(&job.provider_name, "").map_err(DispatchError::Provider)?;
    let variant = q.variant.unwrap_or_else(|| "video".to_string());
    let bytes = adapter.download_video(&video_id, &variant).await.map_err(DispatchError::Provider)?;
    Ok(bytes.into_response())
}

#[derive(Debug, Deserialize)]
pub struct VideoContentQuery {
    pub variant: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RemixVideoBody {
    pub prompt: String,
}

pub async fn remix_video(
    State(state): State<Arc<AppState>>,
    Ctx(ctx): Ctx,
    Path(video_id): Path<String>,
    Json(body): Json<RemixVideoBody>,
) -> AppResult<Json<VideoStatusResponse>> {
    let req = VideoRemixRequest { video_id, prompt: body.prompt };
    let job = state.video_jobs.get(&req.video_id).await.map_err(|_| DispatchError::Validation { message: format!("unknown video: {}", req.video_id) })?;
    ensure_video_owner(&job, &ctx)?;
    let model = job.model.clone();
    let estimated_tokens = 4000u64;
    let request_size = request_size_of(&req);
    let prompt_text = req.prompt.clone();
    let result = dispatch::dispatch_unary(&state, &ctx, &model, "videos/remix", Capability::Videos, estimated_tokens, request_size, MAX_RETRIES_VIDEO, Some(&prompt_text), |adapter| {
        let req = req.clone();
        async move {
            let resp = adapter.remix_video(req).await?;
            Ok((resp, 0))
        }
    })
    .await?;
    Ok(Json(result.result))
}

// ---------------------------------------------------------------------
// Models catalog
// ---------------------------------------------------------------------

pub async fn list_models(State(state): State<Arc<AppState>>, Ctx(_ctx): Ctx) -> Json<serde_json::Value> {
    let models: Vec<_> = state
        .model_registry
        .all()
        .map(|m| {
            serde_json::json!({
                "id": m.id,
                "object": "model",
                "owned_by": m.owned_by,
            })
        })
        .collect();
    Json(serde_json::json!({ "object": "list", "data": models }))
}

pub async fn get_model(State(state): State<Arc<AppState>>, Ctx(_ctx): Ctx, Path(model_id): Path<String>) -> AppResult<Json<serde_json::Value>> {
    let entry = state.model_registry.get_by_id(&model_id).ok_or_else(|| DispatchError::Validation { message: format!("unknown model: {model_id}") })?;
    Ok(Json(serde_json::json!({
        "id": entry.id,
        "object": "model",
        "owned_by": entry.owned_by,
        "supports_streaming": entry.supports_streaming,
        "supports_tool_calling": entry.supports_tool_calling,
    })))
}

// ---------------------------------------------------------------------
// Discounts
// ---------------------------------------------------------------------

pub async fn my_discounts(State(state): State<Arc<AppState>>, Ctx(ctx): Ctx) -> AppResult<Json<Vec<crate::domain::UserDiscount>>> {
    let discounts = state.discount_engine.list_for_user(&ctx.user.id).await.map_err(|e| DispatchError::Internal { message: e.to_string() })?;
    Ok(Json(discounts))
}

pub async fn eligible_models(State(state): State<Arc<AppState>>, Ctx(_ctx): Ctx) -> Json<Vec<String>> {
    Json(state.model_registry.discount_eligible_models().into_iter().map(String::from).collect())
}

// ---------------------------------------------------------------------
// Admin surface
// ---------------------------------------------------------------------

fn require_admin(ctx: &RawAuthContext) -> AppResult<()> {
    AuthService::require_admin(ctx).map_err(AuthError::into_dispatch)
}

pub async fn admin_list_users(State(state): State<Arc<AppState>>, Ctx(ctx): Ctx) -> AppResult<Json<Vec<crate::domain::User>>> {
    require_admin(&ctx)?;
    let users = state.users.list_all().await.map_err(|e| DispatchError::Internal { message: e.to_string() })?;
    Ok(Json(users))
}

pub async fn admin_get_user(State(state): State<Arc<AppState>>, Ctx(ctx): Ctx, Path(user_id): Path<String>) -> AppResult<Json<crate::domain::User>> {
    require_admin(&ctx)?;
    let user = state.users.get(&user_id).await.map_err(|_| DispatchError::Validation { message: format!("unknown user: {user_id}") })?;
    Ok(Json(user))
}

pub async fn admin_list_sub_providers(State(state): State<Arc<AppState>>, Ctx(ctx): Ctx, Path(provider_id): Path<String>) -> AppResult<Json<Vec<crate::domain::SubProviderRecord>>> {
    require_admin(&ctx)?;
    let subs = state.sub_providers.list_for_provider(&provider_id).await.map_err(|e| DispatchError::Internal { message: e.to_string() })?;
    Ok(Json(subs))
}

#[derive(Debug, Deserialize)]
pub struct SetEnabledBody {
    pub enabled: bool,
}

pub async fn admin_set_sub_provider_enabled(
    State(state): State<Arc<AppState>>,
    Ctx(ctx): Ctx,
    Path(sub_provider_id): Path<String>,
    Json(body): Json<SetEnabledBody>,
) -> AppResult<StatusCode> {
    require_admin(&ctx)?;
    state.sub_providers.set_enabled(&sub_provider_id, body.enabled).await.map_err(|e| DispatchError::Internal { message: e.to_string() })?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

pub async fn admin_api_logs(State(state): State<Arc<AppState>>, Ctx(ctx): Ctx, Query(q): Query<PageQuery>) -> AppResult<Json<Vec<crate::domain::ApiRequest>>> {
    require_admin(&ctx)?;
    let page = state
        .api_requests
        .list_page(q.offset.unwrap_or(0), q.limit.unwrap_or(50))
        .await
        .map_err(|e| DispatchError::Internal { message: e.to_string() })?;
    Ok(Json(page))
}

pub async fn admin_metrics(State(state): State<Arc<AppState>>, Ctx(ctx): Ctx) -> AppResult<Json<crate::metrics::Snapshot>> {
    require_admin(&ctx)?;
    Ok(Json(state.metrics.snapshot().await))
}

pub async fn health() -> &'static str {
    "ok"
}
