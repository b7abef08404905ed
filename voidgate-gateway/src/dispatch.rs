//! # Dispatch Pipeline
//!
//! The unary and streaming request pipelines from spec §4.8, written once
//! as a capability-agnostic core ([`dispatch_unary`]) that every endpoint
//! handler drives with its own adapter call. Order is fixed: validate ->
//! security -> `tracker.create` -> `tracker.startProcessing` -> attempt
//! loop -> `tracker.complete`/`fail` -> `credit_engine.debit` (spec §5
//! "Ordering guarantees").

use crate::auth::{AuthContext, AuthService};
use crate::cache::RateLimiter;
use crate::classify::{classify, is_critical, ErrorKind};
use crate::config::Config;
use crate::discount_engine::DiscountEngine;
use crate::domain::User;
use crate::error::DispatchError;
use crate::load_balancer::{LoadBalancer, SelectionCriteria};
use crate::model_registry::ModelRegistry;
use crate::registry::ProviderRegistry;
use crate::repo::{ApiRequestRepository, SubProviderRepository, UserRepository, VideoJobRepository};
use crate::request_tracker::RequestTracker;
use crate::security::SecurityService;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use voidgate_sdk::{Adapter, Capability};

pub struct AppState {
    pub model_registry: Arc<ModelRegistry>,
    pub credit_engine: Arc<crate::credit_engine::CreditEngine>,
    pub discount_engine: Arc<DiscountEngine>,
    pub tracker: Arc<RequestTracker>,
    pub load_balancer: Arc<LoadBalancer>,
    pub provider_registry: Arc<ProviderRegistry>,
    pub security: Arc<dyn SecurityService>,
    pub metrics: Arc<crate::metrics::Metrics>,
    pub decryption_key: Vec<u8>,
    pub auth: Arc<AuthService>,
    pub rate_limiter: Arc<RateLimiter>,
    pub users: Arc<dyn UserRepository>,
    pub api_requests: Arc<dyn ApiRequestRepository>,
    pub sub_providers: Arc<dyn SubProviderRepository>,
    pub video_jobs: Arc<dyn VideoJobRepository>,
    pub config: Arc<Config>,
}

/// `MAX_RETRIES` per endpoint family (spec §4.8): 5 for videos, 3 for
/// everything else. A uniform policy within an endpoint, chosen per call
/// site.
pub const MAX_RETRIES_DEFAULT: u32 = 3;
pub const MAX_RETRIES_VIDEO: u32 = 5;

fn now_ms() -> i64 {
    // The caller supplies wall-clock time; pipeline internals only use
    // monotonic `Instant` for latency, so this is the one place real
    // deployments plug in `chrono::Utc::now()`.
    chrono::Utc::now().timestamp_millis()
}

/// Validates `[ModelExists, EndpointSupported, PlanAccess ∨ ActiveDiscount]`
/// (spec §4.8) and returns the base cost and any active discount multiplier
/// to bill with.
pub async fn validate(
    state: &AppState,
    user: &User,
    model: &str,
    endpoint: &str,
) -> Result<(i64, Option<f64>), DispatchError> {
    if !state.model_registry.exists(model) {
        return Err(DispatchError::Validation {
            message: format!("unknown model: {model}"),
        });
    }
    if !state.model_registry.supports_endpoint(model, endpoint) {
        return Err(DispatchError::Validation {
            message: format!("model {model} does not support endpoint {endpoint}"),
        });
    }
    let has_plan_access = state.model_registry.has_access(model, user.plan);
    let discount = state
        .discount_engine
        .get_user_discount(&user.id, model, now_ms())
        .await
        .map_err(|e| DispatchError::Internal { message: e.to_string() })?
        .filter(|m| *m > 1.0);

    if !has_plan_access && discount.is_none() {
        return Err(DispatchError::PlanAccessDenied { model: model.to_string() });
    }

    let base_cost = state
        .model_registry
        .get_base_cost(model)
        .ok_or_else(|| DispatchError::Validation { message: format!("no cost configured for model: {model}") })?;

    if !user.is_master_admin() {
        let effective_cost = match discount {
            Some(multiplier) => DiscountEngine::effective_cost(base_cost, multiplier),
            None => base_cost,
        };
        let authorized = state
            .credit_engine
            .authorize(&user.id, effective_cost)
            .await
            .map_err(|e| DispatchError::Internal { message: e.to_string() })?;
        if !authorized {
            return Err(DispatchError::InsufficientCredits);
        }
    }

    Ok((base_cost, discount))
}

/// Runs the security check (spec §4.9): a blocked prompt fails before any
/// provider is contacted or billed.
pub async fn check_security(state: &AppState, prompt: &str, user_id: &str) -> Result<(), DispatchError> {
    let verdict = state.security.analyze(prompt, user_id).await;
    if verdict.is_blocked {
        return Err(DispatchError::ContentPolicyViolation {
            message: format!("blocked categories: {}", verdict.detected_categories.join(", ")),
        });
    }
    Ok(())
}

pub struct DispatchSuccess<T> {
    pub result: T,
    pub tokens_used: u64,
    pub provider_id: String,
    pub sub_provider_id: Option<String>,
    pub request_id: String,
}

/// The attempt loop plus the surrounding tracker/credit bookkeeping (spec
/// §4.8). `call` is handed the selected adapter and must return the
/// endpoint result plus tokens consumed; errors are classified and the
/// loop excludes that sub-provider and retries up to `max_retries`.
#[allow(clippy::too_many_arguments)]
pub async fn dispatch_unary<T, F, Fut>(
    state: &AppState,
    ctx: &AuthContext,
    model: &str,
    endpoint: &str,
    capability: Capability,
    estimated_tokens: u64,
    request_size: u64,
    max_retries: u32,
    prompt: Option<&str>,
    mut call: F,
) -> Result<DispatchSuccess<T>, DispatchError>
where
    F: FnMut(Arc<dyn Adapter>) -> Fut,
    Fut: Future<Output = Result<(T, u64), voidgate_sdk::ProviderError>>,
{
    let user = &ctx.user;
    let (base_cost, discount_multiplier) = validate(state, user, model, endpoint).await?;
    if let Some(prompt) = prompt {
        check_security(state, prompt, &user.id).await?;
    }

    let request_id = uuid::Uuid::new_v4().to_string();
    let created_at = now_ms();
    state
        .tracker
        .create(
            request_id.clone(),
            Some(user.id.clone()),
            endpoint.to_string(),
            "POST".to_string(),
            model.to_string(),
            request_size,
            created_at,
        )
        .await
        .map_err(|e| DispatchError::Internal { message: e.to_string() })?;
    state
        .tracker
        .start_processing(&request_id, now_ms())
        .await
        .map_err(|e| DispatchError::Internal { message: e.to_string() })?;

    let started_at = Instant::now();
    let mut excluded: HashSet<String> = HashSet::new();
    let mut attempt: u32 = 0;

    let outcome = loop {
        attempt += 1;
        let selection = state
            .load_balancer
            .select(SelectionCriteria {
                model,
                estimated_tokens,
                exclude_ids: &excluded,
                require_healthy: false,
                capability,
            })
            .await;

        let Some(selection) = selection else {
            if attempt >= max_retries {
                break Err(DispatchError::UpstreamServerError {
                    message: "no healthy sub-provider available".to_string(),
                });
            }
            continue;
        };

        let adapter: Arc<dyn Adapter> = match &selection.sub_provider_id {
            Some(sub_id) => match state.provider_registry.create_adapter_with_sub_provider(sub_id, &state.decryption_key) {
                Ok(a) => Arc::from(a),
                Err(e) => {
                    excluded.insert(sub_id.clone());
                    if attempt >= max_retries {
                        break Err(DispatchError::Provider(e));
                    }
                    continue;
                }
            },
            None => match state.provider_registry.get_adapter(&selection.provider_id, "") {
                Ok(a) => a,
                Err(e) => break Err(DispatchError::Provider(e)),
            },
        };

        if let Some(sub_id) = &selection.sub_provider_id {
            if let Some(sub) = state.load_balancer.sub_provider(sub_id) {
                sub.record_request_start(estimated_tokens).await;
            }
        }

        let call_started = Instant::now();
        let result = call(adapter).await;
        let latency_ms = call_started.elapsed().as_millis() as u64;

        match result {
            Ok((value, tokens_used)) => {
                if let Some(sub_id) = &selection.sub_provider_id {
                    if let Some(sub) = state.load_balancer.sub_provider(sub_id) {
                        sub.record_request_complete(true, latency_ms, false, false).await;
                    }
                }
                break Ok(DispatchSuccess {
                    result: value,
                    tokens_used,
                    provider_id: selection.provider_id,
                    sub_provider_id: selection.sub_provider_id,
                    request_id: request_id.clone(),
                });
            }
            Err(provider_error) => {
                let message = provider_error.classifier_text();
                let kind = classify(&message);
                let critical = is_critical(&message);
                if let Some(sub_id) = &selection.sub_provider_id {
                    if let Some(sub) = state.load_balancer.sub_provider(sub_id) {
                        let is_timeout = kind == ErrorKind::Timeout;
                        sub.record_request_complete(false, latency_ms, is_timeout, critical).await;
                    }
                    excluded.insert(sub_id.clone());
                } else {
                    excluded.insert(selection.provider_id.clone());
                }
                if attempt >= max_retries {
                    break Err(map_error_kind(kind, message, provider_error));
                }
            }
        }
    };

    let total_latency_ms = started_at.elapsed().as_millis() as u64;

    match outcome {
        Ok(success) => {
            let effective_cost = match discount_multiplier {
                Some(multiplier) => DiscountEngine::effective_cost(base_cost, multiplier),
                None => base_cost,
            };
            if !user.is_master_admin() {
                state
                    .credit_engine
                    .debit(&user.id, effective_cost, success.tokens_used)
                    .await
                    .map_err(|e| DispatchError::Internal { message: e.to_string() })?;
            }
            let _ = state
                .tracker
                .complete(
                    &request_id,
                    success.tokens_used,
                    effective_cost,
                    total_latency_ms,
                    0,
                    200,
                    Some(success.provider_id.clone()),
                    success.sub_provider_id.clone(),
                    now_ms(),
                )
                .await;
            state.metrics.record_request(true, total_latency_ms, success.tokens_used).await;
            Ok(success)
        }
        Err(error) => {
            let _ = state
                .tracker
                .fail(&request_id, status_for(&error), error.to_string(), total_latency_ms, attempt, now_ms())
                .await;
            state.metrics.record_request(false, total_latency_ms, 0).await;
            Err(error)
        }
    }
}

fn map_error_kind(kind: ErrorKind, message: String, original: voidgate_sdk::ProviderError) -> DispatchError {
    match kind {
        ErrorKind::Timeout => DispatchError::UpstreamTimeout,
        ErrorKind::ServerError => DispatchError::UpstreamServerError { message },
        ErrorKind::Network => DispatchError::Network { message },
        ErrorKind::AuthError | ErrorKind::RateLimit | ErrorKind::Other => DispatchError::Provider(original),
    }
}

fn status_for(error: &DispatchError) -> u16 {
    match error {
        DispatchError::UpstreamTimeout => 504,
        DispatchError::UpstreamServerError { .. } | DispatchError::Network { .. } | DispatchError::Provider(_) => 502,
        _ => 500,
    }
}

pub type StartStream =
    Box<dyn FnMut(Arc<dyn Adapter>) -> futures::future::BoxFuture<'static, Result<voidgate_sdk::ChatStream, voidgate_sdk::ProviderError>> + Send>;

/// Streaming counterpart of [`dispatch_unary`] (spec §4.8 streaming path).
/// Selection/adapter-creation failures and a failed attempt to open the
/// upstream stream itself all retry across sub-providers the same way the
/// unary loop does, up to `max_retries`. Once the upstream has handed back
/// a live SSE stream there is no mid-stream failover — the finalizer
/// (sub-provider outcome, credit debit, tracker close-out) runs exactly
/// once after the loop below ends, whether that is a normal `Done`, an
/// upstream error mid-stream, or the client disconnecting (the
/// forwarder's `send` starts failing once the receiver is dropped).
pub async fn dispatch_streaming(
    state: Arc<AppState>,
    ctx: AuthContext,
    model: String,
    endpoint: String,
    capability: Capability,
    estimated_tokens: u64,
    request_size: u64,
    max_retries: u32,
    prompt: Option<String>,
    start_stream: StartStream,
) -> Result<tokio_stream::wrappers::ReceiverStream<Result<axum::response::sse::Event, std::convert::Infallible>>, DispatchError> {
    use axum::response::sse::Event;

    let user = ctx.user;
    let (base_cost, discount_multiplier) = validate(&state, &user, &model, &endpoint).await?;
    if let Some(prompt) = &prompt {
        check_security(&state, prompt, &user.id).await?;
    }

    let request_id = uuid::Uuid::new_v4().to_string();
    let created_at = now_ms();
    state
        .tracker
        .create(request_id.clone(), Some(user.id.clone()), endpoint.clone(), "POST".to_string(), model.clone(), request_size, created_at)
        .await
        .map_err(|e| DispatchError::Internal { message: e.to_string() })?;
    state
        .tracker
        .start_processing(&request_id, now_ms())
        .await
        .map_err(|e| DispatchError::Internal { message: e.to_string() })?;

    let mut excluded: HashSet<String> = HashSet::new();
    let mut attempt: u32 = 0;
    let mut start_stream = start_stream;

    let (stream, provider_id, sub_provider_id) = loop {
        attempt += 1;
        let selection = state
            .load_balancer
            .select(SelectionCriteria { model: &model, estimated_tokens, exclude_ids: &excluded, require_healthy: false, capability })
            .await;
        let Some(selection) = selection else {
            if attempt >= max_retries {
                let err = DispatchError::UpstreamServerError { message: "no healthy sub-provider available".to_string() };
                let _ = state.tracker.fail(&request_id, 502, err.to_string(), 0, attempt, now_ms()).await;
                return Err(err);
            }
            continue;
        };

        let adapter: Arc<dyn Adapter> = match &selection.sub_provider_id {
            Some(sub_id) => match state.provider_registry.create_adapter_with_sub_provider(sub_id, &state.decryption_key) {
                Ok(a) => Arc::from(a),
                Err(e) => {
                    excluded.insert(sub_id.clone());
                    if attempt >= max_retries {
                        let err = DispatchError::Provider(e);
                        let _ = state.tracker.fail(&request_id, 502, err.to_string(), 0, attempt, now_ms()).await;
                        return Err(err);
                    }
                    continue;
                }
            },
            None => match state.provider_registry.get_adapter(&selection.provider_id, "") {
                Ok(a) => a,
                Err(e) => {
                    let err = DispatchError::Provider(e);
                    let _ = state.tracker.fail(&request_id, 502, err.to_string(), 0, attempt, now_ms()).await;
                    return Err(err);
                }
            },
        };

        if let Some(sub_id) = &selection.sub_provider_id {
            if let Some(sub) = state.load_balancer.sub_provider(sub_id) {
                sub.record_request_start(estimated_tokens).await;
            }
        }

        match start_stream(adapter).await {
            Ok(stream) => break (stream, selection.provider_id, selection.sub_provider_id),
            Err(provider_error) => {
                let message = provider_error.classifier_text();
                let kind = classify(&message);
                let critical = is_critical(&message);
                if let Some(sub_id) = &selection.sub_provider_id {
                    if let Some(sub) = state.load_balancer.sub_provider(sub_id) {
                        sub.record_request_complete(false, 0, kind == ErrorKind::Timeout, critical).await;
                    }
                    excluded.insert(sub_id.clone());
                } else {
                    excluded.insert(selection.provider_id.clone());
                }
                if attempt >= max_retries {
                    let err = map_error_kind(kind, message, provider_error);
                    let _ = state.tracker.fail(&request_id, status_for(&err), err.to_string(), 0, attempt, now_ms()).await;
                    return Err(err);
                }
                continue;
            }
        }
    };

    use futures::StreamExt;
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Event, std::convert::Infallible>>(32);
    let state = state.clone();

    tokio::spawn(async move {
        let started_at = Instant::now();
        let mut stream = stream;
        let mut tokens_used: u64 = 0;
        let mut keep_alive = tokio::time::interval(std::time::Duration::from_secs(20));
        keep_alive.tick().await;
        let mut outcome: Result<(), String> = Ok(());

        loop {
            tokio::select! {
                _ = keep_alive.tick() => {
                    if tx.send(Ok(Event::comment(""))).await.is_err() {
                        break;
                    }
                }
                item = stream.next() => {
                    match item {
                        None => break,
                        Some(Ok(voidgate_sdk::models::StreamEvent::Done)) => {
                            let _ = tx.send(Ok(Event::default().data("[DONE]"))).await;
                            break;
                        }
                        Some(Ok(voidgate_sdk::models::StreamEvent::Delta(chunk))) => {
                            if let Some(usage) = &chunk.usage {
                                tokens_used = usage.total_tokens as u64;
                            }
                            let payload = serde_json::to_string(&chunk).unwrap_or_default();
                            if tx.send(Ok(Event::default().data(payload))).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(provider_error)) => {
                            let message = provider_error.classifier_text();
                            outcome = Err(message.clone());
                            let error_chunk = serde_json::json!({
                                "error": {
                                    "message": message,
                                    "reference_id": &request_id,
                                    "timestamp": chrono::Utc::now().to_rfc3339(),
                                }
                            });
                            let _ = tx.send(Ok(Event::default().data(error_chunk.to_string()))).await;
                            break;
                        }
                    }
                }
            }
        }

        let latency_ms = started_at.elapsed().as_millis() as u64;
        let critical = outcome.as_ref().err().map(|m| is_critical(m)).unwrap_or(false);
        let success = outcome.is_ok();
        if let Some(sub_id) = &sub_provider_id {
            if let Some(sub) = state.load_balancer.sub_provider(sub_id) {
                let is_timeout = outcome.as_ref().err().map(|m| classify(m) == ErrorKind::Timeout).unwrap_or(false);
                sub.record_request_complete(success, latency_ms, is_timeout, critical).await;
            }
        }

        match outcome {
            Ok(()) => {
                let effective_cost = match discount_multiplier {
                    Some(multiplier) => DiscountEngine::effective_cost(base_cost, multiplier),
                    None => base_cost,
                };
                if !user.is_master_admin() {
                    let _ = state.credit_engine.debit(&user.id, effective_cost, tokens_used).await;
                }
                let _ = state
                    .tracker
                    .complete(&request_id, tokens_used, effective_cost, latency_ms, 0, 200, Some(provider_id), sub_provider_id, now_ms())
                    .await;
                state.metrics.record_request(true, latency_ms, tokens_used).await;
            }
            Err(message) => {
                let _ = state.tracker.fail(&request_id, 502, message, latency_ms, attempt, now_ms()).await;
                state.metrics.record_request(false, latency_ms, 0).await;
            }
        }
    });

    Ok(tokio_stream::wrappers::ReceiverStream::new(rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ErrorKind;

    #[test]
    fn timeout_errors_map_to_upstream_timeout() {
        let mapped = map_error_kind(ErrorKind::Timeout, "timed out".to_string(), voidgate_sdk::ProviderError::Timeout);
        assert!(matches!(mapped, DispatchError::UpstreamTimeout));
    }

    #[test]
    fn auth_errors_are_not_treated_as_retryable_upstream_errors() {
        let mapped = map_error_kind(ErrorKind::AuthError, "invalid api key".to_string(), voidgate_sdk::ProviderError::InvalidApiKey);
        assert!(matches!(mapped, DispatchError::Provider(_)));
    }
}
