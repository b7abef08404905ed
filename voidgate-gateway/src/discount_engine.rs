//! # Discount Engine
//!
//! Rotating per-user discount on exactly one eligible model (spec §4.3).
//! The daily rotation job deletes expired discounts and picks a fresh
//! target + multiplier for every user; `apply_discount_to_user` is the
//! on-demand variant a handler or admin route can call directly.

use crate::domain::UserDiscount;
use crate::model_registry::ModelRegistry;
use crate::repo::{RepoError, UserDiscountRepository};
use rand::Rng;
use std::sync::Arc;

const MIN_MULTIPLIER: f64 = 1.5;
const MAX_MULTIPLIER: f64 = 3.0;
const TTL_MS: i64 = 24 * 60 * 60 * 1000;

pub struct DiscountEngine {
    repo: Arc<dyn UserDiscountRepository>,
    models: Arc<ModelRegistry>,
}

impl DiscountEngine {
    pub fn new(repo: Arc<dyn UserDiscountRepository>, models: Arc<ModelRegistry>) -> Self {
        Self { repo, models }
    }

    /// `getUserDiscount(userId, modelId)`: the active multiplier for this
    /// user+model, if any (spec §4.3).
    pub async fn get_user_discount(&self, user_id: &str, model_id: &str, now: i64) -> Result<Option<f64>, RepoError> {
        let discount = self.repo.get_for_user_model(user_id, model_id).await?;
        Ok(discount.filter(|d| d.is_active(now)).map(|d| d.discount_multiplier))
    }

    /// Every discount currently on record for a user, expired or not —
    /// callers filter by `is_active` for display purposes.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<UserDiscount>, RepoError> {
        self.repo.list_for_user(user_id).await
    }

    /// Effective cost after discount: `baseCost / discountMultiplier`. The
    /// multiplier is always >= 1, so this only ever lowers the billed
    /// amount relative to `base_cost`.
    pub fn effective_cost(base_cost: i64, multiplier: f64) -> i64 {
        ((base_cost as f64) / multiplier).round() as i64
    }

    /// Manual rotation for a single user (spec §4.3 `applyDiscountToUser`).
    pub async fn apply_discount_to_user(&self, user_id: &str, now: i64) -> Result<Option<UserDiscount>, RepoError> {
        let eligible = self.models.discount_eligible_models();
        if eligible.is_empty() {
            return Ok(None);
        }
        let model_id = eligible[rand::thread_rng().gen_range(0..eligible.len())].to_string();
        let multiplier = rand::thread_rng().gen_range(MIN_MULTIPLIER..=MAX_MULTIPLIER);
        let discount = UserDiscount {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            model_id,
            discount_multiplier: multiplier,
            expires_at: now + TTL_MS,
            created_at: now,
        };
        self.repo.upsert(discount.clone()).await?;
        Ok(Some(discount))
    }

    /// Daily 18:00 CET rotation job body: purge expired discounts, then
    /// rotate every user that currently holds one (spec §4.3). The set of
    /// users to rotate is supplied by the caller — this engine only owns
    /// the discount table, not the user roster.
    pub async fn run_daily_rotation(&self, user_ids: &[String], now: i64) -> RotationSummary {
        let mut summary = RotationSummary::default();
        match self.repo.delete_expired(now).await {
            Ok(n) => summary.expired_removed = n,
            Err(e) => tracing::warn!(error = %e, "failed to purge expired discounts"),
        }
        for user_id in user_ids {
            match self.apply_discount_to_user(user_id, now).await {
                Ok(Some(_)) => summary.rotated += 1,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(user_id, error = %e, "discount rotation failed for user");
                    summary.failed += 1;
                }
            }
        }
        summary
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RotationSummary {
    pub expired_removed: u32,
    pub rotated: u32,
    pub failed: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_registry::{CostType, ModelEntry};
    use crate::repo::InMemoryUserDiscountRepository;
    use std::collections::HashSet;
    use voidgate_sdk::Capability;

    fn registry_with_one_eligible_model() -> Arc<ModelRegistry> {
        Arc::new(ModelRegistry::new(vec![ModelEntry {
            id: "gpt-4o-mini".to_string(),
            owned_by: "openai".to_string(),
            endpoints: HashSet::new(),
            plan_requirements: HashSet::new(),
            cost_type: CostType::PerToken,
            base_cost: 100,
            multiplier: 1.0,
            supports_streaming: true,
            supports_tool_calling: true,
            capability: Capability::Chat,
            discount_eligible: true,
        }]))
    }

    #[tokio::test]
    async fn applied_discount_multiplier_is_within_spec_range() {
        let repo = Arc::new(InMemoryUserDiscountRepository::default());
        let engine = DiscountEngine::new(repo, registry_with_one_eligible_model());
        let discount = engine.apply_discount_to_user("u1", 0).await.unwrap().unwrap();
        assert!(discount.discount_multiplier >= MIN_MULTIPLIER);
        assert!(discount.discount_multiplier <= MAX_MULTIPLIER);
        assert_eq!(discount.expires_at, TTL_MS);
    }

    #[tokio::test]
    async fn expired_discount_is_not_returned_as_active() {
        let repo = Arc::new(InMemoryUserDiscountRepository::default());
        let engine = DiscountEngine::new(repo.clone(), registry_with_one_eligible_model());
        engine.apply_discount_to_user("u1", 0).await.unwrap();
        let still_active = engine.get_user_discount("u1", "gpt-4o-mini", TTL_MS + 1).await.unwrap();
        assert!(still_active.is_none());
        let active = engine.get_user_discount("u1", "gpt-4o-mini", TTL_MS - 1).await.unwrap();
        assert!(active.is_some());
    }

    #[test]
    fn effective_cost_divides_base_cost_by_multiplier() {
        assert_eq!(DiscountEngine::effective_cost(100, 2.0), 50);
    }
}
