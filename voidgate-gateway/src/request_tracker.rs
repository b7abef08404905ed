//! # Request Tracker
//!
//! Owns the `ApiRequest` lifecycle (spec §4.4): `create` → `startProcessing`
//! → `complete`/`fail`/`timeout`. Every transition past `pending` is
//! monotonic and rejected once the record is already terminal — the
//! repository enforces that via `update_if_not_terminal`, this module just
//! shapes the mutation.

use crate::domain::{ApiRequest, RequestStatus, Timestamp};
use crate::repo::{ApiRequestRepository, RepoError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("request already in a terminal or advanced state")]
    InvalidTransition,
    #[error(transparent)]
    Repo(#[from] RepoError),
}

pub struct RequestTracker {
    repo: Arc<dyn ApiRequestRepository>,
}

impl RequestTracker {
    pub fn new(repo: Arc<dyn ApiRequestRepository>) -> Self {
        Self { repo }
    }

    /// Creates a new record in `pending` sized by the serialized request body.
    pub async fn create(
        &self,
        id: String,
        user_id: Option<String>,
        endpoint: String,
        method: String,
        model: String,
        request_size: u64,
        now: Timestamp,
    ) -> Result<(), RepoError> {
        self.repo
            .insert(ApiRequest {
                id,
                user_id,
                endpoint,
                method,
                model,
                provider_id: None,
                sub_provider_id: None,
                status: RequestStatus::Pending,
                status_code: None,
                tokens_used: None,
                credits_used: None,
                latency_ms: None,
                request_size,
                response_size: None,
                retry_count: 0,
                error_message: None,
                created_at: now,
                updated_at: now,
                completed_at: None,
            })
            .await
    }

    /// `pending → processing`. Calling this twice returns `InvalidTransition`
    /// rather than panicking — dispatch treats it as a recoverable error.
    pub async fn start_processing(&self, id: &str, now: Timestamp) -> Result<(), TrackerError> {
        let transitioned = self
            .repo
            .update_if_not_terminal(
                id,
                Box::new(move |r| {
                    r.status = RequestStatus::Processing;
                    r.updated_at = now;
                }),
            )
            .await;
        match transitioned {
            Ok(()) => Ok(()),
            Err(RepoError::Conflict(_)) => Err(TrackerError::InvalidTransition),
            Err(e) => Err(TrackerError::Repo(e)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn complete(
        &self,
        id: &str,
        tokens: u64,
        credits: i64,
        latency_ms: u64,
        response_size: u64,
        status_code: u16,
        provider_id: Option<String>,
        sub_provider_id: Option<String>,
        now: Timestamp,
    ) -> Result<(), TrackerError> {
        self.terminal_transition(id, now, move |r| {
            r.status = RequestStatus::Completed;
            r.tokens_used = Some(tokens);
            r.credits_used = Some(credits);
            r.latency_ms = Some(latency_ms);
            r.response_size = Some(response_size);
            r.status_code = Some(status_code);
            r.provider_id = provider_id;
            r.sub_provider_id = sub_provider_id;
            r.completed_at = Some(now);
        })
        .await
    }

    pub async fn fail(
        &self,
        id: &str,
        status_code: u16,
        message: String,
        latency_ms: u64,
        retry_count: u32,
        now: Timestamp,
    ) -> Result<(), TrackerError> {
        self.terminal_transition(id, now, move |r| {
            r.status = RequestStatus::Failed;
            r.status_code = Some(status_code);
            r.error_message = Some(message);
            r.latency_ms = Some(latency_ms);
            r.retry_count = retry_count;
            r.completed_at = Some(now);
        })
        .await
    }

    pub async fn timeout(&self, id: &str, latency_ms: u64, now: Timestamp) -> Result<(), TrackerError> {
        self.terminal_transition(id, now, move |r| {
            r.status = RequestStatus::Timeout;
            r.latency_ms = Some(latency_ms);
            r.completed_at = Some(now);
        })
        .await
    }

    async fn terminal_transition<F>(&self, id: &str, now: Timestamp, mutate: F) -> Result<(), TrackerError>
    where
        F: FnOnce(&mut ApiRequest) + Send + 'static,
    {
        let result = self
            .repo
            .update_if_not_terminal(
                id,
                Box::new(move |r| {
                    mutate(r);
                    r.updated_at = now;
                }),
            )
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(RepoError::Conflict(_)) => Err(TrackerError::InvalidTransition),
            Err(e) => Err(TrackerError::Repo(e)),
        }
    }

    pub async fn get(&self, id: &str) -> Result<ApiRequest, RepoError> {
        self.repo.get(id).await
    }

    /// Statistics over a page of requests (spec §4.4). Real deployments
    /// would push this filtering into the store; the in-memory repository
    /// only supports paging, so callers needing user/model/date filters
    /// apply them over the page in memory.
    pub async fn statistics(&self, offset: usize, limit: usize) -> Result<RequestStatistics, RepoError> {
        let requests = self.repo.list_page(offset, limit).await?;
        let mut stats = RequestStatistics {
            total: requests.len() as u64,
            ..Default::default()
        };
        let mut latency_sum = 0u64;
        let mut latency_count = 0u64;
        for r in &requests {
            match r.status {
                RequestStatus::Completed => stats.completed += 1,
                RequestStatus::Failed => stats.failed += 1,
                RequestStatus::Timeout => stats.timed_out += 1,
                RequestStatus::Pending | RequestStatus::Processing => stats.pending += 1,
            }
            if let Some(latency) = r.latency_ms {
                latency_sum += latency;
                latency_count += 1;
            }
        }
        stats.average_latency_ms = if latency_count > 0 { latency_sum as f64 / latency_count as f64 } else { 0.0 };
        stats.success_rate = if stats.total > 0 { stats.completed as f64 / stats.total as f64 } else { 0.0 };
        Ok(stats)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RequestStatistics {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub pending: u64,
    pub average_latency_ms: f64,
    pub success_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::InMemoryApiRequestRepository;

    fn tracker() -> RequestTracker {
        RequestTracker::new(Arc::new(InMemoryApiRequestRepository::default()))
    }

    #[tokio::test]
    async fn starting_processing_twice_is_rejected() {
        let tracker = tracker();
        tracker
            .create("r1".to_string(), None, "chat/completions".to_string(), "POST".to_string(), "gpt-4o-mini".to_string(), 100, 0)
            .await
            .unwrap();
        tracker.start_processing("r1", 1).await.unwrap();
        let result = tracker.start_processing("r1", 2).await;
        assert!(matches!(result, Err(TrackerError::InvalidTransition)));
    }

    #[tokio::test]
    async fn completing_an_already_failed_request_is_rejected() {
        let tracker = tracker();
        tracker
            .create("r2".to_string(), None, "chat/completions".to_string(), "POST".to_string(), "gpt-4o-mini".to_string(), 100, 0)
            .await
            .unwrap();
        tracker.fail("r2", 502, "boom".to_string(), 10, 0, 5).await.unwrap();
        let result = tracker.complete("r2", 10, 5, 10, 20, 200, None, None, 6).await;
        assert!(matches!(result, Err(TrackerError::InvalidTransition)));
    }

    #[tokio::test]
    async fn statistics_reflect_terminal_outcomes() {
        let tracker = tracker();
        tracker
            .create("r3".to_string(), None, "chat/completions".to_string(), "POST".to_string(), "gpt-4o-mini".to_string(), 100, 0)
            .await
            .unwrap();
        tracker.complete("r3", 10, 5, 100, 20, 200, None, None, 1).await.unwrap();
        let stats = tracker.statistics(0, 10).await.unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.success_rate, 1.0);
    }
}
