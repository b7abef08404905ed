//! # Repository Traits
//!
//! Storage is an external collaborator (spec §1 Non-goals): these traits
//! are the contract a real relational store would implement behind. The
//! only implementation shipped here, [`InMemoryRepos`], is the in-process
//! stand-in used by `main.rs`'s default wiring and by every test in this
//! crate — mirroring how the teacher treats its cache backend
//! (`gateway_caching.rs`) as swappable behind a trait.

use crate::domain::{ApiKey, ApiRequest, OAuthToken, SubProviderRecord, User, UserDiscount, VideoJob};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error, Clone)]
pub enum RepoError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get(&self, id: &str) -> Result<User, RepoError>;
    /// Compare-and-swap on `User.version` (spec §5 optimistic concurrency).
    /// Returns `Ok(false)` on a version mismatch rather than erroring, so
    /// callers can retry.
    async fn compare_and_swap(&self, id: &str, expected_version: u64, updated: User) -> Result<bool, RepoError>;
    async fn list_due_for_reset(&self, threshold: i64) -> Result<Vec<String>, RepoError>;
    async fn list_all(&self) -> Result<Vec<User>, RepoError>;
}

#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    async fn find_by_search_hash(&self, search_hash: &str) -> Result<ApiKey, RepoError>;
    async fn touch_last_used(&self, id: &str, now: i64) -> Result<(), RepoError>;
}

#[async_trait]
pub trait OAuthTokenRepository: Send + Sync {
    async fn find_by_token(&self, token: &str) -> Result<OAuthToken, RepoError>;
}

#[async_trait]
pub trait ProviderRepository: Send + Sync {
    async fn list_active(&self) -> Result<Vec<crate::domain::Provider>, RepoError>;
    async fn get(&self, id: &str) -> Result<crate::domain::Provider, RepoError>;
}

#[async_trait]
pub trait SubProviderRepository: Send + Sync {
    async fn list_for_provider(&self, provider_id: &str) -> Result<Vec<SubProviderRecord>, RepoError>;
    async fn get(&self, id: &str) -> Result<SubProviderRecord, RepoError>;
    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), RepoError>;
}

#[async_trait]
pub trait ApiRequestRepository: Send + Sync {
    async fn insert(&self, request: ApiRequest) -> Result<(), RepoError>;
    async fn get(&self, id: &str) -> Result<ApiRequest, RepoError>;
    /// Applies `mutate` only if the stored record is not already terminal
    /// (spec §4.4: "any transition out of a terminal state is rejected").
    async fn update_if_not_terminal(
        &self,
        id: &str,
        mutate: Box<dyn FnOnce(&mut ApiRequest) + Send>,
    ) -> Result<(), RepoError>;
    async fn list_page(&self, offset: usize, limit: usize) -> Result<Vec<ApiRequest>, RepoError>;
}

#[async_trait]
pub trait VideoJobRepository: Send + Sync {
    async fn insert(&self, job: VideoJob) -> Result<(), RepoError>;
    async fn get(&self, id: &str) -> Result<VideoJob, RepoError>;
}

#[async_trait]
pub trait UserDiscountRepository: Send + Sync {
    async fn get_for_user_model(&self, user_id: &str, model_id: &str) -> Result<Option<UserDiscount>, RepoError>;
    async fn upsert(&self, discount: UserDiscount) -> Result<(), RepoError>;
    async fn delete_expired(&self, now: i64) -> Result<u32, RepoError>;
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<UserDiscount>, RepoError>;
}

// ---------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryUserRepository {
    users: DashMap<String, User>,
}

impl InMemoryUserRepository {
    pub async fn insert_user(&self, user: User) {
        self.users.insert(user.id.clone(), user);
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn get(&self, id: &str) -> Result<User, RepoError> {
        self.users
            .get(id)
            .map(|u| u.clone())
            .ok_or_else(|| RepoError::NotFound(id.to_string()))
    }

    async fn compare_and_swap(&self, id: &str, expected_version: u64, updated: User) -> Result<bool, RepoError> {
        let mut entry = self
            .users
            .get_mut(id)
            .ok_or_else(|| RepoError::NotFound(id.to_string()))?;
        if entry.version != expected_version {
            return Ok(false);
        }
        *entry = updated;
        Ok(true)
    }

    async fn list_due_for_reset(&self, threshold: i64) -> Result<Vec<String>, RepoError> {
        Ok(self
            .users
            .iter()
            .filter(|e| e.credits_last_reset <= threshold)
            .map(|e| e.id.clone())
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<User>, RepoError> {
        Ok(self.users.iter().map(|e| e.value().clone()).collect())
    }
}

#[derive(Default)]
pub struct InMemoryApiKeyRepository {
    keys: DashMap<String, ApiKey>,
}

impl InMemoryApiKeyRepository {
    pub fn insert(&self, key: ApiKey) {
        self.keys.insert(key.search_hash.clone(), key);
    }
}

#[async_trait]
impl ApiKeyRepository for InMemoryApiKeyRepository {
    async fn find_by_search_hash(&self, search_hash: &str) -> Result<ApiKey, RepoError> {
        self.keys
            .get(search_hash)
            .map(|k| k.clone())
            .ok_or_else(|| RepoError::NotFound("api key".to_string()))
    }

    async fn touch_last_used(&self, id: &str, now: i64) -> Result<(), RepoError> {
        for mut entry in self.keys.iter_mut() {
            if entry.id == id {
                entry.last_used_at = Some(now);
                return Ok(());
            }
        }
        Err(RepoError::NotFound(id.to_string()))
    }
}

#[derive(Default)]
pub struct InMemoryOAuthTokenRepository {
    tokens: DashMap<String, OAuthToken>,
}

impl InMemoryOAuthTokenRepository {
    pub fn insert(&self, token: OAuthToken) {
        self.tokens.insert(token.token.clone(), token);
    }
}

#[async_trait]
impl OAuthTokenRepository for InMemoryOAuthTokenRepository {
    async fn find_by_token(&self, token: &str) -> Result<OAuthToken, RepoError> {
        self.tokens
            .get(token)
            .map(|t| t.clone())
            .ok_or_else(|| RepoError::NotFound("oauth token".to_string()))
    }
}

#[derive(Default)]
pub struct InMemoryProviderRepository {
    providers: DashMap<String, crate::domain::Provider>,
}

impl InMemoryProviderRepository {
    pub fn insert(&self, provider: crate::domain::Provider) {
        self.providers.insert(provider.id.clone(), provider);
    }
}

#[async_trait]
impl ProviderRepository for InMemoryProviderRepository {
    async fn list_active(&self) -> Result<Vec<crate::domain::Provider>, RepoError> {
        Ok(self.providers.iter().filter(|p| p.is_active).map(|p| p.clone()).collect())
    }

    async fn get(&self, id: &str) -> Result<crate::domain::Provider, RepoError> {
        self.providers
            .get(id)
            .map(|p| p.clone())
            .ok_or_else(|| RepoError::NotFound(id.to_string()))
    }
}

#[derive(Default)]
pub struct InMemorySubProviderRepository {
    sub_providers: DashMap<String, SubProviderRecord>,
}

impl InMemorySubProviderRepository {
    pub fn insert(&self, sub: SubProviderRecord) {
        self.sub_providers.insert(sub.id.clone(), sub);
    }
}

#[async_trait]
impl SubProviderRepository for InMemorySubProviderRepository {
    async fn list_for_provider(&self, provider_id: &str) -> Result<Vec<SubProviderRecord>, RepoError> {
        Ok(self
            .sub_providers
            .iter()
            .filter(|s| s.provider_id == provider_id)
            .map(|s| s.clone())
            .collect())
    }

    async fn get(&self, id: &str) -> Result<SubProviderRecord, RepoError> {
        self.sub_providers
            .get(id)
            .map(|s| s.clone())
            .ok_or_else(|| RepoError::NotFound(id.to_string()))
    }

    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), RepoError> {
        let mut entry = self
            .sub_providers
            .get_mut(id)
            .ok_or_else(|| RepoError::NotFound(id.to_string()))?;
        entry.is_enabled = enabled;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryApiRequestRepository {
    requests: RwLock<Vec<ApiRequest>>,
}

#[async_trait]
impl ApiRequestRepository for InMemoryApiRequestRepository {
    async fn insert(&self, request: ApiRequest) -> Result<(), RepoError> {
        self.requests.write().await.push(request);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<ApiRequest, RepoError> {
        self.requests
            .read()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| RepoError::NotFound(id.to_string()))
    }

    async fn update_if_not_terminal(
        &self,
        id: &str,
        mutate: Box<dyn FnOnce(&mut ApiRequest) + Send>,
    ) -> Result<(), RepoError> {
        let mut requests = self.requests.write().await;
        let request = requests
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| RepoError::NotFound(id.to_string()))?;
        if request.is_terminal() {
            return Err(RepoError::Conflict(format!("request {id} already terminal")));
        }
        mutate(request);
        Ok(())
    }

    async fn list_page(&self, offset: usize, limit: usize) -> Result<Vec<ApiRequest>, RepoError> {
        let requests = self.requests.read().await;
        Ok(requests.iter().skip(offset).take(limit).cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryVideoJobRepository {
    jobs: DashMap<String, VideoJob>,
}

#[async_trait]
impl VideoJobRepository for InMemoryVideoJobRepository {
    async fn insert(&self, job: VideoJob) -> Result<(), RepoError> {
        self.jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<VideoJob, RepoError> {
        self.jobs.get(id).map(|j| j.clone()).ok_or_else(|| RepoError::NotFound(id.to_string()))
    }
}

#[derive(Default)]
pub struct InMemoryUserDiscountRepository {
    discounts: DashMap<(String, String), UserDiscount>,
}

#[async_trait]
impl UserDiscountRepository for InMemoryUserDiscountRepository {
    async fn get_for_user_model(&self, user_id: &str, model_id: &str) -> Result<Option<UserDiscount>, RepoError> {
        Ok(self.discounts.get(&(user_id.to_string(), model_id.to_string())).map(|d| d.clone()))
    }

    async fn upsert(&self, discount: UserDiscount) -> Result<(), RepoError> {
        self.discounts
            .insert((discount.user_id.clone(), discount.model_id.clone()), discount);
        Ok(())
    }

    async fn delete_expired(&self, now: i64) -> Result<u32, RepoError> {
        let expired: Vec<_> = self
            .discounts
            .iter()
            .filter(|d| !d.is_active(now))
            .map(|d| d.key().clone())
            .collect();
        for key in &expired {
            self.discounts.remove(key);
        }
        Ok(expired.len() as u32)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<UserDiscount>, RepoError> {
        Ok(self
            .discounts
            .iter()
            .filter(|d| d.user_id == user_id)
            .map(|d| d.clone())
            .collect())
    }
}

/// Bundles every in-memory repository behind the trait objects the engines
/// depend on. `main.rs` wires this up by default; a real deployment would
/// swap in SQL-backed implementations of the same traits.
pub struct InMemoryRepos {
    pub users: Arc<InMemoryUserRepository>,
    pub api_keys: Arc<InMemoryApiKeyRepository>,
    pub oauth_tokens: Arc<InMemoryOAuthTokenRepository>,
    pub providers: Arc<InMemoryProviderRepository>,
    pub sub_providers: Arc<InMemorySubProviderRepository>,
    pub api_requests: Arc<InMemoryApiRequestRepository>,
    pub video_jobs: Arc<InMemoryVideoJobRepository>,
    pub user_discounts: Arc<InMemoryUserDiscountRepository>,
}

impl InMemoryRepos {
    pub fn new() -> Self {
        Self {
            users: Arc::new(InMemoryUserRepository::default()),
            api_keys: Arc::new(InMemoryApiKeyRepository::default()),
            oauth_tokens: Arc::new(InMemoryOAuthTokenRepository::default()),
            providers: Arc::new(InMemoryProviderRepository::default()),
            sub_providers: Arc::new(InMemorySubProviderRepository::default()),
            api_requests: Arc::new(InMemoryApiRequestRepository::default()),
            video_jobs: Arc::new(InMemoryVideoJobRepository::default()),
            user_discounts: Arc::new(InMemoryUserDiscountRepository::default()),
        }
    }
}

impl Default for InMemoryRepos {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserRepository for InMemoryRepos {
    async fn get(&self, id: &str) -> Result<User, RepoError> {
        self.users.get(id).await
    }

    async fn compare_and_swap(&self, id: &str, expected_version: u64, updated: User) -> Result<bool, RepoError> {
        self.users.compare_and_swap(id, expected_version, updated).await
    }

    async fn list_due_for_reset(&self, threshold: i64) -> Result<Vec<String>, RepoError> {
        self.users.list_due_for_reset(threshold).await
    }

    async fn list_all(&self) -> Result<Vec<User>, RepoError> {
        self.users.list_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Plan;
    use std::collections::HashSet;

    fn sample_user(id: &str) -> User {
        User {
            id: id.to_string(),
            name: "test".to_string(),
            plan: Plan::Free,
            enabled: true,
            credits: 1000,
            credits_last_reset: 0,
            ip_whitelist: HashSet::new(),
            max_concurrent_requests: 5,
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

    #[tokio::test]
    async fn compare_and_swap_rejects_stale_version() {
        let repo = InMemoryUserRepository::default();
        repo.insert_user(sample_user("u1")).await;
        let mut updated = repo.get("u1").await.unwrap();
        updated.credits = 500;
        updated.version = 1;
        assert!(!repo.compare_and_swap("u1", 99, updated.clone()).await.unwrap());
        assert!(repo.compare_and_swap("u1", 0, updated).await.unwrap());
        assert_eq!(repo.get("u1").await.unwrap().credits, 500);
    }

    #[tokio::test]
    async fn api_request_rejects_mutation_past_terminal_state() {
        use crate::domain::{ApiRequest, RequestStatus};
        let repo = InMemoryApiRequestRepository::default();
        let req = ApiRequest {
            id: "r1".to_string(),
            user_id: None,
            endpoint: "chat/completions".to_string(),
            method: "POST".to_string(),
            model: "gpt-4o-mini".to_string(),
            provider_id: None,
            sub_provider_id: None,
            status: RequestStatus::Completed,
            status_code: Some(200),
            tokens_used: Some(10),
            credits_used: Some(100),
            latency_ms: Some(50),
            request_size: 100,
            response_size: Some(200),
            retry_count: 0,
            error_message: None,
            created_at: 0,
            updated_at: 0,
            completed_at: Some(1),
        };
        repo.insert(req).await.unwrap();
        let result = repo
            .update_if_not_terminal("r1", Box::new(|r| r.status = RequestStatus::Failed))
            .await;
        assert!(result.is_err());
    }
}
