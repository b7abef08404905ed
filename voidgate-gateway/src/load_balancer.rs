//! # Sub-Provider State & Load Balancer
//!
//! Rate/circuit state per sub-provider (spec §4.6) and the `select`
//! algorithm that picks a `(provider, subProvider?)` pair for a dispatch
//! attempt (spec §4.7). Each [`SubProviderState`] owns its own
//! [`CircuitBreaker`] and sliding windows — no process-wide lock, matching
//! spec §5's "owned state on the object that produces it".

use crate::domain::{HealthStatus, Provider, SubProviderLimits, SubProviderRecord};
use rand::Rng;
use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use voidgate_sdk::{Capability, CircuitBreaker, CircuitBreakerConfig, CircuitState, SharedCircuitBreaker};

const WINDOW: Duration = Duration::from_secs(60);
const HOUR_WINDOW: Duration = Duration::from_secs(60 * 60);
const MAX_LATENCY_SAMPLES: usize = 1000;
const LATENCY_SAMPLE_MAX_AGE: Duration = Duration::from_secs(600);
const PERCENTILE_RECOMPUTE_INTERVAL: Duration = Duration::from_secs(5);

struct SlidingWindow {
    entries: VecDeque<(Instant, u64)>,
    window: Duration,
}

impl SlidingWindow {
    fn new(window: Duration) -> Self {
        Self { entries: VecDeque::new(), window }
    }

    fn evict_stale(&mut self, now: Instant) {
        while let Some((ts, _)) = self.entries.front() {
            if now.duration_since(*ts) > self.window {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    fn count(&mut self, now: Instant) -> u64 {
        self.evict_stale(now);
        self.entries.len() as u64
    }

    fn sum(&mut self, now: Instant) -> u64 {
        self.evict_stale(now);
        self.entries.iter().map(|(_, v)| v).sum()
    }

    fn push(&mut self, now: Instant, value: u64) {
        self.entries.push_back((now, value));
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Percentiles {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

struct HealthInner {
    request_window: SlidingWindow,
    hour_window: SlidingWindow,
    token_window: SlidingWindow,
    current_concurrent: u32,
    current_token_count: u64,
    latency_samples: VecDeque<(Instant, u64)>,
    percentiles: Percentiles,
    percentiles_computed_at: Option<Instant>,
    success_count: u64,
    failure_count: u64,
    timeout_count: u64,
    health_score: f64,
}

impl Default for HealthInner {
    fn default() -> Self {
        Self {
            request_window: SlidingWindow::new(WINDOW),
            hour_window: SlidingWindow::new(HOUR_WINDOW),
            token_window: SlidingWindow::new(WINDOW),
            current_concurrent: 0,
            current_token_count: 0,
            latency_samples: VecDeque::new(),
            percentiles: Percentiles::default(),
            percentiles_computed_at: None,
            success_count: 0,
            failure_count: 0,
            timeout_count: 0,
            health_score: 100.0,
        }
    }
}

/// Per-sub-provider rate limits, concurrency counter, circuit breaker and
/// health score (spec §4.6).
pub struct SubProviderState {
    pub id: String,
    pub provider_id: String,
    pub priority: u32,
    pub weight: u32,
    pub limits: SubProviderLimits,
    pub circuit: SharedCircuitBreaker,
    health: RwLock<HealthInner>,
}

impl SubProviderState {
    pub fn new(record: &SubProviderRecord) -> Self {
        Self {
            id: record.id.clone(),
            provider_id: record.provider_id.clone(),
            priority: record.priority,
            weight: record.weight.max(1),
            limits: record.limits.clone(),
            circuit: std::sync::Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
            health: RwLock::new(HealthInner::default()),
        }
    }

    /// Pre-dispatch admission check: sliding windows under limit and
    /// concurrency headroom for `estimated_tokens` (spec §4.7 step 2).
    pub async fn admits(&self, estimated_tokens: u64) -> bool {
        let now = Instant::now();
        let mut health = self.health.write().await;
        if health.current_concurrent >= self.limits.max_concurrent {
            return false;
        }
        if health.request_window.count(now) >= self.limits.rpm as u64 {
            return false;
        }
        if health.hour_window.count(now) >= self.limits.rph as u64 {
            return false;
        }
        if health.token_window.sum(now) + estimated_tokens > self.limits.tpm as u64 {
            return false;
        }
        true
    }

    pub async fn record_request_start(&self, tokens: u64) {
        let now = Instant::now();
        let mut health = self.health.write().await;
        health.request_window.push(now, 1);
        health.hour_window.push(now, 1);
        health.token_window.push(now, tokens);
        health.current_concurrent += 1;
        health.current_token_count += tokens;
    }

    pub async fn record_request_complete(&self, success: bool, latency_ms: u64, is_timeout: bool, is_critical_error: bool) {
        let now = Instant::now();
        let mut health = self.health.write().await;
        health.current_concurrent = health.current_concurrent.saturating_sub(1);

        health.latency_samples.push_back((now, latency_ms));
        while health.latency_samples.len() > MAX_LATENCY_SAMPLES {
            health.latency_samples.pop_front();
        }
        while let Some((ts, _)) = health.latency_samples.front() {
            if now.duration_since(*ts) > LATENCY_SAMPLE_MAX_AGE {
                health.latency_samples.pop_front();
            } else {
                break;
            }
        }

        if success {
            health.success_count += 1;
        } else if is_timeout {
            health.timeout_count += 1;
        } else {
            health.failure_count += 1;
        }

        let should_recompute = health
            .percentiles_computed_at
            .map(|t| now.duration_since(t) >= PERCENTILE_RECOMPUTE_INTERVAL)
            .unwrap_or(true);
        if should_recompute {
            health.percentiles = compute_percentiles(&health.latency_samples);
            health.percentiles_computed_at = Some(now);
        }
        health.health_score = compute_health_score(&health);
        drop(health);

        if success {
            self.circuit.record_success().await;
        } else {
            self.circuit.record_failure(is_critical_error).await;
        }
    }

    pub async fn health_score(&self) -> f64 {
        self.health.read().await.health_score
    }

    pub async fn avg_latency_ms(&self) -> f64 {
        self.health.read().await.percentiles.p50
    }

    pub async fn percentiles(&self) -> Percentiles {
        self.health.read().await.percentiles
    }
}

fn compute_percentiles(samples: &VecDeque<(Instant, u64)>) -> Percentiles {
    if samples.is_empty() {
        return Percentiles::default();
    }
    let mut values: Vec<u64> = samples.iter().map(|(_, v)| *v).collect();
    values.sort_unstable();
    let pick = |p: f64| -> f64 {
        let idx = ((values.len() as f64 - 1.0) * p).round() as usize;
        values[idx.min(values.len() - 1)] as f64
    };
    Percentiles {
        p50: pick(0.50),
        p95: pick(0.95),
        p99: pick(0.99),
    }
}

/// Rolling 0-100 figure from (success rate, avg latency, timeout rate,
/// consecutive errors) — spec §4.6. Latency is folded in as a soft penalty
/// capped at 30 points so a single slow-but-reliable sub-provider never
/// drops below a merely-unreliable one with the same error rate.
fn compute_health_score(health: &HealthInner) -> f64 {
    let total = health.success_count + health.failure_count + health.timeout_count;
    if total == 0 {
        return 100.0;
    }
    let success_rate = health.success_count as f64 / total as f64;
    let timeout_rate = health.timeout_count as f64 / total as f64;
    let latency_penalty = (health.percentiles.p95 / 100.0).min(30.0);
    let score = success_rate * 100.0 - timeout_rate * 20.0 - latency_penalty;
    score.clamp(0.0, 100.0)
}

pub struct SelectionCriteria<'a> {
    pub model: &'a str,
    pub estimated_tokens: u64,
    pub exclude_ids: &'a HashSet<String>,
    pub require_healthy: bool,
    pub capability: Capability,
}

pub struct Selection {
    pub provider_id: String,
    pub sub_provider_id: Option<String>,
}

pub struct LoadBalancer {
    providers: Vec<Provider>,
    sub_providers: Vec<std::sync::Arc<SubProviderState>>,
}

impl LoadBalancer {
    pub fn new(providers: Vec<Provider>, sub_providers: Vec<std::sync::Arc<SubProviderState>>) -> Self {
        Self { providers, sub_providers }
    }

    pub fn sub_provider(&self, id: &str) -> Option<&std::sync::Arc<SubProviderState>> {
        self.sub_providers.iter().find(|s| s.id == id)
    }

    /// Spec §4.7 `select`. Returns `None` when nothing satisfies the
    /// constraints (the dispatcher treats this as "no candidate", retrying
    /// or failing depending on attempt count).
    ///
    /// A half-open sub-provider only ever admits one probe at a time
    /// (spec §4.6): once scoring picks a half-open candidate, the single
    /// probe slot is claimed with `reserve_probe` before it's returned. If
    /// another concurrent call already claimed it, that candidate is
    /// excluded and scoring retries among the rest.
    pub async fn select(&self, criteria: SelectionCriteria<'_>) -> Option<Selection> {
        let candidate_providers: Vec<&Provider> = self
            .providers
            .iter()
            .filter(|p| p.is_active && p.supported_models.contains(criteria.model) && p.capabilities.contains(&criteria.capability))
            .collect();

        let mut probe_excluded: HashSet<String> = HashSet::new();

        loop {
            let mut scored: Vec<(f64, f64, u32, u32, &Provider, Option<&std::sync::Arc<SubProviderState>>, HealthStatus)> = Vec::new();

            for provider in &candidate_providers {
                if !provider.needs_sub_providers {
                    scored.push((100.0, 0.0, provider.priority, 1, provider, None, provider.health_status));
                    continue;
                }
                for sub in &self.sub_providers {
                    if sub.provider_id != provider.id || !sub.limits_enabled_check() {
                        continue;
                    }
                    if criteria.exclude_ids.contains(&sub.id) || probe_excluded.contains(&sub.id) {
                        continue;
                    }
                    if !sub.circuit.is_selectable().await {
                        continue;
                    }
                    if !sub.admits(criteria.estimated_tokens).await {
                        continue;
                    }
                    let score = sub.health_score().await;
                    let avg_latency = sub.avg_latency_ms().await;
                    let status = health_status_for_score(score);
                    scored.push((score, -avg_latency, sub.priority, sub.weight, provider, Some(sub), status));
                }
            }

            if scored.is_empty() {
                return None;
            }

            let pool = pick_pool(&scored, criteria.require_healthy);
            if pool.is_empty() {
                return None;
            }

            let top_score = pool.iter().map(|c| c.0).fold(f64::MIN, f64::max);
            let top_band: Vec<_> = pool.iter().filter(|c| (c.0 - top_score).abs() < f64::EPSILON).collect();

            let chosen = weighted_pick(&top_band);
            if let Some(sub) = chosen.5 {
                if sub.circuit.state().await == CircuitState::HalfOpen && !sub.circuit.reserve_probe().await {
                    probe_excluded.insert(sub.id.clone());
                    continue;
                }
            }

            return Some(Selection {
                provider_id: chosen.4.id.clone(),
                sub_provider_id: chosen.5.map(|s| s.id.clone()),
            });
        }
    }
}

type ScoredCandidate<'a> = (f64, f64, u32, u32, &'a Provider, Option<&'a std::sync::Arc<SubProviderState>>, HealthStatus);

fn health_status_for_score(score: f64) -> HealthStatus {
    if score >= 70.0 {
        HealthStatus::Healthy
    } else if score >= 30.0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Unhealthy
    }
}

/// Spec §4.7 step 4: healthy first, degraded fallback, unhealthy last;
/// `require_healthy` stops at the first non-empty pool instead of falling
/// further.
fn pick_pool<'a>(scored: &'a [ScoredCandidate<'a>], require_healthy: bool) -> Vec<&'a ScoredCandidate<'a>> {
    let healthy: Vec<_> = scored.iter().filter(|c| c.6 == HealthStatus::Healthy).collect();
    if !healthy.is_empty() {
        return healthy;
    }
    if require_healthy {
        return Vec::new();
    }
    let degraded: Vec<_> = scored.iter().filter(|c| c.6 == HealthStatus::Degraded).collect();
    if !degraded.is_empty() {
        return degraded;
    }
    scored.iter().collect()
}

fn weighted_pick<'a>(band: &[&'a ScoredCandidate<'a>]) -> &'a ScoredCandidate<'a> {
    if band.len() == 1 {
        return band[0];
    }
    let total_weight: u32 = band.iter().map(|c| c.3).sum();
    if total_weight == 0 {
        return band[0];
    }
    let mut roll = rand::thread_rng().gen_range(0..total_weight);
    for candidate in band {
        if roll < candidate.3 {
            return candidate;
        }
        roll -= candidate.3;
    }
    band[band.len() - 1]
}

impl SubProviderState {
    /// `is_enabled` lives on the repository record, not refreshed state;
    /// callers construct `SubProviderState` only for enabled records, so
    /// this is always true today. Kept as a named hook so a future
    /// admin-toggle path has somewhere to plug in without touching `select`.
    fn limits_enabled_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn sub_record(id: &str, provider_id: &str) -> SubProviderRecord {
        SubProviderRecord {
            id: id.to_string(),
            provider_id: provider_id.to_string(),
            name: id.to_string(),
            encrypted_api_key: vec![],
            salt: vec![],
            algorithm: "aes-256-gcm".to_string(),
            priority: 1,
            weight: 1,
            is_enabled: true,
            limits: SubProviderLimits::default(),
            model_mapping: Default::default(),
        }
    }

    fn provider(id: &str, model: &str) -> Provider {
        Provider {
            id: id.to_string(),
            name: id.to_string(),
            base_url: "https://example.invalid".to_string(),
            timeout_secs: 30,
            priority: 1,
            is_active: true,
            needs_sub_providers: true,
            supported_models: [model.to_string()].into_iter().collect(),
            capabilities: [Capability::Chat].into_iter().collect(),
            health_status: HealthStatus::Healthy,
            last_used_at: None,
            last_error_at: None,
        }
    }

    #[tokio::test]
    async fn selects_the_only_candidate_when_healthy() {
        let sub = std::sync::Arc::new(SubProviderState::new(&sub_record("s1", "p1")));
        let lb = LoadBalancer::new(vec![provider("p1", "gpt-4o-mini")], vec![sub]);
        let selection = lb
            .select(SelectionCriteria {
                model: "gpt-4o-mini",
                estimated_tokens: 100,
                exclude_ids: &HashSet::new(),
                require_healthy: true,
                capability: Capability::Chat,
            })
            .await
            .unwrap();
        assert_eq!(selection.provider_id, "p1");
        assert_eq!(selection.sub_provider_id, Some("s1".to_string()));
    }

    #[tokio::test]
    async fn excluded_sub_provider_is_skipped() {
        let sub = std::sync::Arc::new(SubProviderState::new(&sub_record("s1", "p1")));
        let lb = LoadBalancer::new(vec![provider("p1", "gpt-4o-mini")], vec![sub]);
        let mut excluded = HashSet::new();
        excluded.insert("s1".to_string());
        let selection = lb
            .select(SelectionCriteria {
                model: "gpt-4o-mini",
                estimated_tokens: 100,
                exclude_ids: &excluded,
                require_healthy: true,
                capability: Capability::Chat,
            })
            .await;
        assert!(selection.is_none());
    }

    #[tokio::test]
    async fn open_circuit_removes_sub_provider_from_candidates() {
        let state = SubProviderState::new(&sub_record("s1", "p1"));
        for _ in 0..5 {
            state.circuit.record_failure(true).await;
        }
        let sub = std::sync::Arc::new(state);
        let lb = LoadBalancer::new(vec![provider("p1", "gpt-4o-mini")], vec![sub]);
        let selection = lb
            .select(SelectionCriteria {
                model: "gpt-4o-mini",
                estimated_tokens: 100,
                exclude_ids: &HashSet::new(),
                require_healthy: true,
                capability: Capability::Chat,
            })
            .await;
        assert!(selection.is_none());
    }

    #[tokio::test]
    async fn admission_respects_concurrency_limit() {
        let mut record = sub_record("s1", "p1");
        record.limits.max_concurrent = 1;
        let state = SubProviderState::new(&record);
        state.record_request_start(10).await;
        assert!(!state.admits(10).await);
    }
}
