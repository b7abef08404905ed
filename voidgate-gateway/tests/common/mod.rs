//! Shared integration-test harness.
//!
//! Builds a full `AppState`/router against an in-memory repository set and
//! a `wiremock`-mocked upstream, the same dependency graph `main.rs` wires
//! at process startup, scaled down to one user and one provider. Every
//! test file under `tests/` pulls this in via `mod common;`.

use axum_test::TestServer;
use std::collections::HashSet;
use std::sync::Arc;
use voidgate_gateway::auth::{search_hash, AuthService};
use voidgate_gateway::cache::{InMemoryCache, RateLimiter};
use voidgate_gateway::config::Config;
use voidgate_gateway::credit_engine::CreditEngine;
use voidgate_gateway::discount_engine::DiscountEngine;
use voidgate_gateway::dispatch::AppState;
use voidgate_gateway::domain::{ApiKey, HealthStatus, Plan, Provider, User};
use voidgate_gateway::load_balancer::LoadBalancer;
use voidgate_gateway::metrics::Metrics;
use voidgate_gateway::model_registry::{CostType, ModelEntry, ModelRegistry};
use voidgate_gateway::registry::ProviderRegistry;
use voidgate_gateway::repo::{InMemoryRepos, UserDiscountRepository};
use voidgate_gateway::request_tracker::RequestTracker;
use voidgate_gateway::secrets::PlaintextKeyCipher;
use voidgate_gateway::security::KeywordSecurityService;
use voidgate_gateway::server::build_router;
use voidgate_sdk::Capability;
use wiremock::MockServer;

pub const TEST_API_KEY: &str = "sk-voidai-test-key-001";
pub const TEST_MODEL: &str = "gpt-4o-mini";
pub const MASTER_ADMIN_KEY: &str = "master-test-key";

fn sample_user(credits: i64, plan: Plan) -> User {
    User {
        id: "user-1".to_string(),
        name: "test user".to_string(),
        plan,
        enabled: true,
        credits,
        credits_last_reset: 0,
        ip_whitelist: HashSet::new(),
        max_concurrent_requests: 10,
        plan_expires_at: None,
        total_requests: 0,
        total_tokens_used: 0,
        total_credits_used: 0,
        rp_verified: false,
        rp_bonus_tokens_expires: None,
        rp_discount_used: false,
        version: 0,
    }
}

fn chat_model_entry(discount_eligible: bool) -> ModelEntry {
    ModelEntry {
        id: TEST_MODEL.to_string(),
        owned_by: "openai".to_string(),
        endpoints: ["chat/completions".to_string()].into_iter().collect(),
        plan_requirements: [Plan::Basic].into_iter().collect(),
        cost_type: CostType::PerToken,
        base_cost: 100,
        multiplier: 1.0,
        supports_streaming: true,
        supports_tool_calling: true,
        capability: Capability::Chat,
        discount_eligible,
    }
}

/// One user with `TEST_API_KEY`, `credits` available, and `plan`, talking
/// to a single `openai`-named provider pointed at `mock`'s URI.
pub async fn spawn_test_gateway_with_user(mock: &MockServer, credits: i64, plan: Plan) -> TestServer {
    spawn_test_gateway_inner(mock, credits, plan, None).await
}

/// Like [`spawn_test_gateway_with_user`], but `TEST_MODEL` is marked
/// discount-eligible and `user-1` already holds an active discount at
/// `multiplier`.
pub async fn spawn_test_gateway_with_discount(mock: &MockServer, credits: i64, multiplier: f64) -> TestServer {
    spawn_test_gateway_inner(mock, credits, Plan::Basic, Some(multiplier)).await
}

async fn spawn_test_gateway_inner(mock: &MockServer, credits: i64, plan: Plan, discount_multiplier: Option<f64>) -> TestServer {
    let repos = Arc::new(InMemoryRepos::new());

    let user = sample_user(credits, plan);
    repos.users.insert_user(user.clone()).await;

    if let Some(multiplier) = discount_multiplier {
        repos
            .user_discounts
            .upsert(voidgate_gateway::domain::UserDiscount {
                id: "discount-1".to_string(),
                user_id: user.id.clone(),
                model_id: TEST_MODEL.to_string(),
                discount_multiplier: multiplier,
                expires_at: i64::MAX,
                created_at: 0,
            })
            .await
            .expect("seed discount");
    }

    let cipher = PlaintextKeyCipher;
    let (encrypted, salt) = cipher.encrypt(TEST_API_KEY);
    repos.api_keys.insert(ApiKey {
        id: "key-1".to_string(),
        user_id: user.id.clone(),
        name: "default".to_string(),
        search_hash: search_hash(TEST_API_KEY),
        encrypted,
        salt,
        algorithm: "plaintext".to_string(),
        created_at: 0,
        last_used_at: None,
        is_active: true,
    });

    let model_registry = Arc::new(ModelRegistry::new(vec![chat_model_entry(discount_multiplier.is_some())]));

    let provider = Provider {
        id: "openai".to_string(),
        name: "OpenAI".to_string(),
        base_url: mock.uri(),
        timeout_secs: 10,
        priority: 1,
        is_active: true,
        needs_sub_providers: false,
        supported_models: [TEST_MODEL.to_string()].into_iter().collect(),
        capabilities: [Capability::Chat].into_iter().collect(),
        health_status: HealthStatus::Healthy,
        last_used_at: None,
        last_error_at: None,
    };

    let load_balancer = Arc::new(LoadBalancer::new(vec![provider.clone()], vec![]));
    let provider_registry = Arc::new(ProviderRegistry::new(vec![provider], vec![]));

    let auth = Arc::new(AuthService::new(
        repos.users.clone(),
        repos.api_keys.clone(),
        repos.oauth_tokens.clone(),
        Arc::new(PlaintextKeyCipher),
        Some(MASTER_ADMIN_KEY.to_string()),
    ));
    let cache = Arc::new(InMemoryCache::default());
    let rate_limiter = Arc::new(RateLimiter::new(cache));

    let state = Arc::new(AppState {
        model_registry: model_registry.clone(),
        credit_engine: Arc::new(CreditEngine::new(repos.users.clone())),
        discount_engine: Arc::new(DiscountEngine::new(repos.user_discounts.clone(), model_registry)),
        tracker: Arc::new(RequestTracker::new(repos.api_requests.clone())),
        load_balancer,
        provider_registry,
        security: Arc::new(KeywordSecurityService),
        metrics: Arc::new(Metrics::new()),
        decryption_key: Vec::new(),
        auth,
        rate_limiter,
        users: repos.users.clone(),
        api_requests: repos.api_requests.clone(),
        sub_providers: repos.sub_providers.clone(),
        video_jobs: repos.video_jobs.clone(),
        config: Arc::new(Config::default()),
    });

    let router = build_router(state, std::time::Duration::from_secs(30));
    TestServer::new(router).expect("build axum-test server")
}

pub async fn spawn_test_gateway_with_credits(mock: &MockServer, credits: i64) -> TestServer {
    spawn_test_gateway_with_user(mock, credits, Plan::Basic).await
}

pub async fn spawn_test_gateway(mock: &MockServer) -> TestServer {
    spawn_test_gateway_with_credits(mock, 1_000_000).await
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

pub fn test_chat_request(model: &str, content: &str) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "messages": [{"role": "user", "content": content}],
    })
}
