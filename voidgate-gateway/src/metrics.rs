//! # Metrics Aggregation
//!
//! Process-wide request metrics for the `GET /admin/metrics` handler
//! (SPEC_FULL §C): a bounded latency reservoir per the same
//! ≤1000-samples/≤10-minutes discipline as [`crate::load_balancer`]'s
//! per-sub-provider histograms, plus simple throughput counters. One
//! instance lives for the process lifetime behind an `Arc`.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

const MAX_SAMPLES: usize = 1000;
const MAX_SAMPLE_AGE: Duration = Duration::from_secs(600);
const RECOMPUTE_INTERVAL: Duration = Duration::from_secs(5);

struct Inner {
    samples: VecDeque<(Instant, u64)>,
    percentiles: Percentiles,
    percentiles_computed_at: Option<Instant>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Percentiles {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

pub struct Metrics {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    total_tokens: AtomicU64,
    latency: RwLock<Inner>,
    started_at: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            total_tokens: AtomicU64::new(0),
            latency: RwLock::new(Inner {
                samples: VecDeque::new(),
                percentiles: Percentiles::default(),
                percentiles_computed_at: None,
            }),
            started_at: Instant::now(),
        }
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_request(&self, success: bool, latency_ms: u64, tokens: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
        self.total_tokens.fetch_add(tokens, Ordering::Relaxed);

        let now = Instant::now();
        let mut inner = self.latency.write().await;
        inner.samples.push_back((now, latency_ms));
        while inner.samples.len() > MAX_SAMPLES {
            inner.samples.pop_front();
        }
        while let Some((ts, _)) = inner.samples.front() {
            if now.duration_since(*ts) > MAX_SAMPLE_AGE {
                inner.samples.pop_front();
            } else {
                break;
            }
        }
        let should_recompute = inner
            .percentiles_computed_at
            .map(|t| now.duration_since(t) >= RECOMPUTE_INTERVAL)
            .unwrap_or(true);
        if should_recompute {
            inner.percentiles = compute_percentiles(&inner.samples);
            inner.percentiles_computed_at = Some(now);
        }
    }

    pub async fn snapshot(&self) -> Snapshot {
        let inner = self.latency.read().await;
        let total = self.total_requests.load(Ordering::Relaxed);
        let successful = self.successful_requests.load(Ordering::Relaxed);
        let failed = self.failed_requests.load(Ordering::Relaxed);
        let uptime_secs = self.started_at.elapsed().as_secs_f64();
        Snapshot {
            total_requests: total,
            successful_requests: successful,
            failed_requests: failed,
            success_rate: if total > 0 { successful as f64 / total as f64 } else { 0.0 },
            total_tokens: self.total_tokens.load(Ordering::Relaxed),
            requests_per_second: if uptime_secs > 0.0 { total as f64 / uptime_secs } else { 0.0 },
            latency_percentiles_ms: inner.percentiles,
            uptime_secs,
        }
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

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    pub total_tokens: u64,
    pub requests_per_second: f64,
    pub latency_percentiles_ms: Percentiles,
    pub uptime_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn snapshot_reflects_recorded_requests() {
        let metrics = Metrics::new();
        metrics.record_request(true, 100, 50).await;
        metrics.record_request(false, 200, 10).await;
        let snapshot = metrics.snapshot().await;
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.successful_requests, 1);
        assert_eq!(snapshot.failed_requests, 1);
        assert_eq!(snapshot.success_rate, 0.5);
        assert_eq!(snapshot.total_tokens, 60);
    }

    #[tokio::test]
    async fn latency_reservoir_is_bounded() {
        let metrics = Metrics::new();
        for i in 0..1500 {
            metrics.record_request(true, i, 1).await;
        }
        let inner = metrics.latency.read().await;
        assert!(inner.samples.len() <= MAX_SAMPLES);
    }
}
