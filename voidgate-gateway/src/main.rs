//! # Bootstrap
//!
//! Wires every engine from this crate into one [`dispatch::AppState`],
//! seeds the in-memory repositories and model catalog, spawns the cron
//! tasks (credit reset, discount rotation), and serves the router built
//! by [`server::build_router`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Timelike;

use voidgate_gateway::auth::AuthService;
use voidgate_gateway::cache::{InMemoryCache, RateLimiter};
use voidgate_gateway::config::Config;
use voidgate_gateway::credit_engine::CreditEngine;
use voidgate_gateway::discount_engine::DiscountEngine;
use voidgate_gateway::dispatch::AppState;
use voidgate_gateway::domain::{HealthStatus, Plan, Provider, SubProviderLimits, SubProviderRecord};
use voidgate_gateway::load_balancer::{LoadBalancer, SubProviderState};
use voidgate_gateway::metrics::Metrics;
use voidgate_gateway::model_registry::{CostType, ModelEntry, ModelRegistry};
use voidgate_gateway::registry::ProviderRegistry;
use voidgate_gateway::repo::{InMemoryRepos, UserRepository};
use voidgate_gateway::request_tracker::RequestTracker;
use voidgate_gateway::secrets::PlaintextKeyCipher;
use voidgate_gateway::security::KeywordSecurityService;
use voidgate_gateway::server;

use voidgate_sdk::Capability;

const CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::load(CONFIG_PATH)?;
    tracing::info!(host = %config.server.host, port = config.server.port, "starting voidgate gateway");

    let repos = Arc::new(InMemoryRepos::new());
    let model_registry = Arc::new(seed_model_registry());
    let (providers, sub_provider_records) = seed_providers(&config);
    for sub in &sub_provider_records {
        repos.sub_providers.insert(sub.clone());
    }

    let sub_provider_states: Vec<Arc<SubProviderState>> =
        sub_provider_records.iter().map(|r| Arc::new(SubProviderState::new(r))).collect();
    let load_balancer = Arc::new(LoadBalancer::new(providers.clone(), sub_provider_states));

    let provider_registry = Arc::new(ProviderRegistry::new(providers, sub_provider_records));

    let auth = Arc::new(AuthService::new(
        repos.users.clone(),
        repos.api_keys.clone(),
        repos.oauth_tokens.clone(),
        Arc::new(PlaintextKeyCipher),
        config.auth.master_admin_key.clone(),
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
        config: Arc::new(config.clone()),
    });

    spawn_cron_tasks(state.clone(), repos.clone(), &config);

    let router = server::build_router(state, config.server.request_timeout);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, router).await?;
    Ok(())
}

/// Daily credit reset (polled every `cron.daily_reset_interval_minutes`)
/// and discount rotation (once per day, at `cron.discount_rotation_hour_cet`)
/// — spec §5 "dedicated single-threaded scheduler", modeled here as two
/// independent background tasks rather than a single scheduler loop since
/// neither shares mutable state with the other.
fn spawn_cron_tasks(state: Arc<AppState>, repos: Arc<InMemoryRepos>, config: &Config) {
    let reset_interval = Duration::from_secs(config.cron.daily_reset_interval_minutes as u64 * 60);
    let reset_state = state.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(reset_interval);
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now().timestamp_millis();
            let summary = reset_state.credit_engine.run_daily_reset(now).await;
            tracing::info!(succeeded = summary.succeeded, failed = summary.failed, "daily credit reset tick");
        }
    });

    let rotation_hour = config.cron.discount_rotation_hour_cet;
    tokio::spawn(async move {
        let mut last_run_date = None;
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now();
            if now.hour() != rotation_hour {
                continue;
            }
            let today = now.date_naive();
            if last_run_date == Some(today) {
                continue;
            }
            last_run_date = Some(today);
            let user_ids = match repos.users.list_due_for_reset(i64::MAX).await {
                Ok(ids) => ids,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to list users for discount rotation");
                    continue;
                }
            };
            let summary = state
                .discount_engine
                .run_daily_rotation(&user_ids, now.timestamp_millis())
                .await;
            tracing::info!(rotated = summary.rotated, failed = summary.failed, "daily discount rotation");
        }
    });
}

/// Seed catalog covering the models spec §8's scenarios name directly
/// (`gpt-4o-mini`, `claude-opus-4-1-20250805`) plus the provider-specific
/// families spec §4.1's per-provider adapter rules describe (OpenAI's
/// codex/o-series/gpt-5 variants, X-AI's grok line, a representative
/// DeepInfra-hosted open model, and a Tools302 image model) — spec.md
/// itself does not enumerate a full catalog, so this is a representative
/// set grounded in the adapters the dispatch pipeline actually branches on.
fn seed_model_registry() -> ModelRegistry {
    use Plan::*;
    let all_plans: HashSet<Plan> = [Free, Economy, Basic, Premium, Contributor, Pro, Ultra, Enterprise].into_iter().collect();
    let paid_plans: HashSet<Plan> = [Basic, Premium, Contributor, Pro, Ultra, Enterprise].into_iter().collect();

    let chat_endpoints: HashSet<String> = ["chat/completions".to_string()].into_iter().collect();
    let responses_endpoints: HashSet<String> = ["chat/completions".to_string(), "responses".to_string()].into_iter().collect();

    let mut entries = vec![
        ModelEntry {
            id: "gpt-4o-mini".to_string(),
            owned_by: "openai".to_string(),
            endpoints: chat_endpoints.clone(),
            plan_requirements: all_plans.clone(),
            cost_type: CostType::PerToken,
            base_cost: 100,
            multiplier: 1.0,
            supports_streaming: true,
            supports_tool_calling: true,
            capability: Capability::Chat,
            discount_eligible: true,
        },
        ModelEntry {
            id: "gpt-5".to_string(),
            owned_by: "openai".to_string(),
            endpoints: chat_endpoints.clone(),
            plan_requirements: paid_plans.clone(),
            cost_type: CostType::PerToken,
            base_cost: 500,
            multiplier: 1.0,
            supports_streaming: true,
            supports_tool_calling: true,
            capability: Capability::Chat,
            discount_eligible: true,
        },
        ModelEntry {
            id: "gpt-5-codex".to_string(),
            owned_by: "openai".to_string(),
            endpoints: responses_endpoints.clone(),
            plan_requirements: paid_plans.clone(),
            cost_type: CostType::PerToken,
            base_cost: 600,
            multiplier: 1.0,
            supports_streaming: true,
            supports_tool_calling: true,
            capability: Capability::Chat,
            discount_eligible: false,
        },
        ModelEntry {
            id: "claude-opus-4-1-20250805".to_string(),
            owned_by: "anthropic".to_string(),
            endpoints: chat_endpoints.clone(),
            plan_requirements: [Premium, Contributor, Pro, Ultra, Enterprise].into_iter().collect(),
            cost_type: CostType::PerToken,
            base_cost: 1500,
            multiplier: 1.0,
            supports_streaming: true,
            supports_tool_calling: true,
            capability: Capability::Chat,
            discount_eligible: true,
        },
        ModelEntry {
            id: "grok-4".to_string(),
            owned_by: "x-ai".to_string(),
            endpoints: chat_endpoints.clone(),
            plan_requirements: paid_plans.clone(),
            cost_type: CostType::PerToken,
            base_cost: 400,
            multiplier: 1.0,
            supports_streaming: true,
            supports_tool_calling: true,
            capability: Capability::Chat,
            discount_eligible: true,
        },
        ModelEntry {
            id: "deepseek-ai/DeepSeek-V3".to_string(),
            owned_by: "deepinfra".to_string(),
            endpoints: chat_endpoints.clone(),
            plan_requirements: all_plans.clone(),
            cost_type: CostType::PerToken,
            base_cost: 150,
            multiplier: 1.0,
            supports_streaming: true,
            supports_tool_calling: false,
            capability: Capability::Chat,
            discount_eligible: true,
        },
        ModelEntry {
            id: "text-embedding-3-small".to_string(),
            owned_by: "openai".to_string(),
            endpoints: ["embeddings".to_string()].into_iter().collect(),
            plan_requirements: all_plans.clone(),
            cost_type: CostType::PerToken,
            base_cost: 20,
            multiplier: 1.0,
            supports_streaming: false,
            supports_tool_calling: false,
            capability: Capability::Embeddings,
            discount_eligible: false,
        },
        ModelEntry {
            id: "tts-1".to_string(),
            owned_by: "openai".to_string(),
            endpoints: ["audio/speech".to_string()].into_iter().collect(),
            plan_requirements: paid_plans.clone(),
            cost_type: CostType::Fixed,
            base_cost: 300,
            multiplier: 1.0,
            supports_streaming: false,
            supports_tool_calling: false,
            capability: Capability::Audio,
            discount_eligible: false,
        },
        ModelEntry {
            id: "whisper-1".to_string(),
            owned_by: "openai".to_string(),
            endpoints: ["audio/transcriptions".to_string(), "audio/translations".to_string()].into_iter().collect(),
            plan_requirements: all_plans.clone(),
            cost_type: CostType::Fixed,
            base_cost: 200,
            multiplier: 1.0,
            supports_streaming: false,
            supports_tool_calling: false,
            capability: Capability::Audio,
            discount_eligible: false,
        },
        ModelEntry {
            id: "dall-e-3".to_string(),
            owned_by: "openai".to_string(),
            endpoints: ["images/generations".to_string(), "images/edits".to_string()].into_iter().collect(),
            plan_requirements: paid_plans.clone(),
            cost_type: CostType::Fixed,
            base_cost: 1000,
            multiplier: 1.0,
            supports_streaming: false,
            supports_tool_calling: false,
            capability: Capability::Images,
            discount_eligible: false,
        },
        ModelEntry {
            id: "tools302-image".to_string(),
            owned_by: "tools302".to_string(),
            endpoints: ["images/generations".to_string()].into_iter().collect(),
            plan_requirements: paid_plans.clone(),
            cost_type: CostType::Fixed,
            base_cost: 800,
            multiplier: 1.0,
            supports_streaming: false,
            supports_tool_calling: false,
            capability: Capability::Images,
            discount_eligible: false,
        },
        ModelEntry {
            id: "omni-moderation-latest".to_string(),
            owned_by: "openai".to_string(),
            endpoints: ["moderations".to_string()].into_iter().collect(),
            plan_requirements: all_plans.clone(),
            cost_type: CostType::Fixed,
            base_cost: 5,
            multiplier: 1.0,
            supports_streaming: false,
            supports_tool_calling: false,
            capability: Capability::Moderation,
            discount_eligible: false,
        },
        ModelEntry {
            id: "sora-2".to_string(),
            owned_by: "openai".to_string(),
            endpoints: ["videos".to_string()].into_iter().collect(),
            plan_requirements: [Pro, Ultra, Enterprise].into_iter().collect(),
            cost_type: CostType::Fixed,
            base_cost: 5000,
            multiplier: 1.0,
            supports_streaming: false,
            supports_tool_calling: false,
            capability: Capability::Videos,
            discount_eligible: false,
        },
    ];
    entries.sort_by(|a, b| a.id.cmp(&b.id));
    ModelRegistry::new(entries)
}

/// Seeds `Provider`/`SubProviderRecord` rows from `config.providers`
/// (spec §4.5): providers flagged `needs_sub_providers` get one enabled
/// sub-provider record apiece so the load balancer has a candidate to
/// select without requiring an operator to configure sub-providers before
/// the gateway can serve its first request.
fn seed_providers(config: &Config) -> (Vec<Provider>, Vec<SubProviderRecord>) {
    let mut providers = Vec::new();
    let mut sub_providers = Vec::new();

    let catalog: &[(&str, &str, &[&str], &[Capability])] = &[
        ("openai", "https://api.openai.com/v1", &["gpt-4o-mini", "gpt-5", "gpt-5-codex", "text-embedding-3-small", "tts-1", "whisper-1", "dall-e-3", "omni-moderation-latest", "sora-2"], &[Capability::Chat, Capability::Responses, Capability::Embeddings, Capability::Audio, Capability::Images, Capability::Moderation, Capability::Videos]),
        ("anthropic", "https://api.anthropic.com/v1", &["claude-opus-4-1-20250805"], &[Capability::Chat]),
        ("deepinfra", "https://api.deepinfra.com/v1/openai", &["deepseek-ai/DeepSeek-V3"], &[Capability::Chat]),
        ("x-ai", "https://api.x.ai/v1", &["grok-4"], &[Capability::Chat]),
        ("tools302", "https://api.302.ai/v1", &["tools302-image"], &[Capability::Images]),
    ];

    for (idx, (id, default_base_url, models, capabilities)) in catalog.iter().enumerate() {
        let entry = config.providers.get(*id);
        let enabled = entry.map(|e| e.enabled).unwrap_or(true);
        if !enabled {
            continue;
        }
        let base_url = entry.map(|e| e.base_url.clone()).unwrap_or_else(|| default_base_url.to_string());
        let timeout_secs = entry.map(|e| e.timeout.as_secs()).unwrap_or(60);
        let needs_sub_providers = entry.map(|e| e.needs_sub_providers).unwrap_or(true);
        let priority = entry.map(|e| e.priority).unwrap_or(idx as u32 + 1);

        providers.push(Provider {
            id: id.to_string(),
            name: id.to_string(),
            base_url,
            timeout_secs,
            priority,
            is_active: true,
            needs_sub_providers,
            supported_models: models.iter().map(|m| m.to_string()).collect(),
            capabilities: capabilities.iter().copied().collect(),
            health_status: HealthStatus::Healthy,
            last_used_at: None,
            last_error_at: None,
        });

        if needs_sub_providers {
            sub_providers.push(SubProviderRecord {
                id: format!("{id}-default"),
                provider_id: id.to_string(),
                name: format!("{id} default"),
                encrypted_api_key: std::env::var(format!("{}_API_KEY", id.to_uppercase().replace('-', "_")))
                    .unwrap_or_default()
                    .into_bytes(),
                salt: Vec::new(),
                algorithm: "plaintext".to_string(),
                priority: 1,
                weight: 1,
                is_enabled: true,
                limits: SubProviderLimits::default(),
                model_mapping: HashMap::new(),
            });
        }
    }

    (providers, sub_providers)
}
