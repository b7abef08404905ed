//! # Credit Engine
//!
//! Atomic authorize/debit against `User.credits`, daily reset cron, and
//! `addCredits` (spec §4.2). `debit` is the one place `User.credits` is
//! mutated outside a reset; it uses the repository's compare-and-swap to
//! implement the "optimistic concurrency check against a stored version"
//! discipline from spec §5, retrying on conflicting concurrent writers.

use crate::domain::User;
use crate::repo::{RepoError, UserRepository};
use std::sync::Arc;
use thiserror::Error;

const RP_BONUS_TOKENS: i64 = 50_000;
const MAX_CAS_RETRIES: u32 = 8;

#[derive(Debug, Error)]
pub enum CreditError {
    #[error("insufficient credits")]
    InsufficientCredits,
    #[error("user disabled")]
    UserDisabled,
    #[error("too many concurrent writers to user credits, give up")]
    TooMuchContention,
    #[error(transparent)]
    Repo(#[from] RepoError),
}

pub struct CreditEngine {
    repo: Arc<dyn UserRepository>,
}

impl CreditEngine {
    pub fn new(repo: Arc<dyn UserRepository>) -> Self {
        Self { repo }
    }

    /// `user.enabled ∧ user.credits ≥ amount` (spec §4.2).
    pub async fn authorize(&self, user_id: &str, amount: i64) -> Result<bool, RepoError> {
        let user = self.repo.get(user_id).await?;
        Ok(user.enabled && user.credits >= amount)
    }

    /// Re-read/check/write loop guarded by [`UserRepository::compare_and_swap`].
    async fn apply<F>(&self, user_id: &str, mut mutate: F) -> Result<User, CreditError>
    where
        F: FnMut(&mut User) -> Result<(), CreditError>,
    {
        for _ in 0..MAX_CAS_RETRIES {
            let mut user = self.repo.get(user_id).await?;
            let expected_version = user.version;
            mutate(&mut user)?;
            user.version = expected_version + 1;
            if self.repo.compare_and_swap(user_id, expected_version, user.clone()).await? {
                return Ok(user);
            }
        }
        Err(CreditError::TooMuchContention)
    }

    /// Decrements `credits` by `amount` and bumps the running totals.
    /// Fails with `InsufficientCredits` if the balance observed at the
    /// moment of the compare-and-swap is insufficient (spec §4.2, §5).
    pub async fn debit(&self, user_id: &str, amount: i64, tokens: u64) -> Result<(), CreditError> {
        self.apply(user_id, |user| {
            if !user.enabled {
                return Err(CreditError::UserDisabled);
            }
            if user.credits < amount {
                return Err(CreditError::InsufficientCredits);
            }
            user.credits -= amount;
            user.total_requests += 1;
            user.total_tokens_used += tokens as i64;
            user.total_credits_used += amount;
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Positive-only credit grant; no implicit reset (spec §4.2).
    pub async fn add_credits(&self, user_id: &str, amount: i64) -> Result<(), CreditError> {
        if amount <= 0 {
            return Err(CreditError::Repo(RepoError::InvalidArgument(
                "addCredits amount must be positive".to_string(),
            )));
        }
        self.apply(user_id, |user| {
            user.credits += amount;
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// `credits := PLAN_CONFIGS[plan].credits + bonus` where `bonus =
    /// 50_000` iff `rpVerified ∧ rpBonusTokensExpires > now` (spec §4.2).
    pub async fn reset_user_credits(&self, user_id: &str, now: i64) -> Result<(), CreditError> {
        self.apply(user_id, |user| {
            let bonus = if user.rp_verified && user.rp_bonus_tokens_expires.map(|e| e > now).unwrap_or(false) {
                RP_BONUS_TOKENS
            } else {
                0
            };
            user.credits = user.plan.baseline_credits() + bonus;
            user.credits_last_reset = now;
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Daily reset cron body: resets every user whose last reset was
    /// ≥ 24h ago. Per-user failures are isolated; the batch continues
    /// (spec §4.2, §7).
    pub async fn run_daily_reset(&self, now: i64) -> DailyResetSummary {
        const DAY_MS: i64 = 24 * 60 * 60 * 1000;
        let mut summary = DailyResetSummary::default();
        let due = match self.repo.list_due_for_reset(now - DAY_MS).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(error = %e, "failed to list users due for credit reset");
                return summary;
            }
        };
        for user_id in due {
            match self.reset_user_credits(&user_id, now).await {
                Ok(()) => summary.succeeded += 1,
                Err(e) => {
                    tracing::warn!(user_id, error = %e, "credit reset failed for user");
                    summary.failed += 1;
                }
            }
        }
        summary
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DailyResetSummary {
    pub succeeded: u32,
    pub failed: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Plan;
    use crate::repo::InMemoryRepos;
    use std::collections::HashSet;

    fn sample_user(id: &str, credits: i64, enabled: bool) -> User {
        User {
            id: id.to_string(),
            name: "test".to_string(),
            plan: Plan::Basic,
            enabled,
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

    #[tokio::test]
    async fn authorize_requires_enabled_and_sufficient_credits() {
        let repos = Arc::new(InMemoryRepos::new());
        repos.users.insert_user(sample_user("u1", 1_000_000, true)).await;
        let engine = CreditEngine::new(repos.clone());
        assert!(engine.authorize("u1", 100).await.unwrap());
        assert!(!engine.authorize("u1", 2_000_000).await.unwrap());
    }

    #[tokio::test]
    async fn disabled_user_never_authorizes() {
        let repos = Arc::new(InMemoryRepos::new());
        repos.users.insert_user(sample_user("u2", 1_000_000, false)).await;
        let engine = CreditEngine::new(repos.clone());
        assert!(!engine.authorize("u2", 1).await.unwrap());
    }

    #[tokio::test]
    async fn debit_never_goes_negative() {
        let repos = Arc::new(InMemoryRepos::new());
        repos.users.insert_user(sample_user("u3", 100, true)).await;
        let engine = CreditEngine::new(repos.clone());
        assert!(engine.debit("u3", 1000, 1).await.is_err());
        let user = repos.users.get("u3").await.unwrap();
        assert_eq!(user.credits, 100);
    }

    #[tokio::test]
    async fn successful_debit_decrements_exactly_the_amount() {
        let repos = Arc::new(InMemoryRepos::new());
        repos.users.insert_user(sample_user("u4", 1_000_000, true)).await;
        let engine = CreditEngine::new(repos.clone());
        engine.debit("u4", 100, 50).await.unwrap();
        let user = repos.users.get("u4").await.unwrap();
        assert_eq!(user.credits, 999_900);
        assert_eq!(user.total_credits_used, 100);
        assert_eq!(user.total_tokens_used, 50);
    }

    #[tokio::test]
    async fn concurrent_debits_never_drive_credits_negative() {
        let repos = Arc::new(InMemoryRepos::new());
        repos.users.insert_user(sample_user("u5", 1_000, true)).await;
        let engine = Arc::new(CreditEngine::new(repos.clone()));
        let mut handles = Vec::new();
        for _ in 0..20 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move { engine.debit("u5", 100, 1).await }));
        }
        for h in handles {
            let _ = h.await.unwrap();
        }
        let user = repos.users.get("u5").await.unwrap();
        assert!(user.credits >= 0);
        assert_eq!(user.credits % 100, 0);
    }
}
