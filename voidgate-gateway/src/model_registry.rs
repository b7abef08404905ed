//! # Model Registry
//!
//! Static, process-lifetime catalog mapping a model id to the plans that
//! can access it, its cost, and the capabilities/endpoints it supports
//! (spec §4.1). Built once at startup from `Config` and never mutated.

use crate::domain::Plan;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use voidgate_sdk::Capability;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostType {
    PerToken,
    Fixed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub id: String,
    pub owned_by: String,
    pub endpoints: HashSet<String>,
    pub plan_requirements: HashSet<Plan>,
    pub cost_type: CostType,
    pub base_cost: i64,
    pub multiplier: f64,
    pub supports_streaming: bool,
    pub supports_tool_calling: bool,
    pub capability: Capability,
    /// Whether the discount engine may pick this model as a rotation
    /// target (spec §4.3 "configured subset").
    pub discount_eligible: bool,
}

#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: HashMap<String, ModelEntry>,
}

impl ModelRegistry {
    pub fn new(entries: Vec<ModelEntry>) -> Self {
        let models = entries.into_iter().map(|m| (m.id.clone(), m)).collect();
        Self { models }
    }

    pub fn exists(&self, model: &str) -> bool {
        self.models.contains_key(model)
    }

    pub fn get_by_id(&self, model: &str) -> Option<&ModelEntry> {
        self.models.get(model)
    }

    pub fn get_base_cost(&self, model: &str) -> Option<i64> {
        self.models.get(model).map(|m| m.base_cost)
    }

    pub fn supports_endpoint(&self, model: &str, endpoint: &str) -> bool {
        self.models
            .get(model)
            .map(|m| m.endpoints.contains(endpoint))
            .unwrap_or(false)
    }

    pub fn has_access(&self, model: &str, plan: Plan) -> bool {
        self.models
            .get(model)
            .map(|m| plan == Plan::Admin || m.plan_requirements.contains(&plan))
            .unwrap_or(false)
    }

    pub fn all(&self) -> impl Iterator<Item = &ModelEntry> {
        self.models.values()
    }

    pub fn discount_eligible_models(&self) -> Vec<&str> {
        self.models
            .values()
            .filter(|m| m.discount_eligible)
            .map(|m| m.id.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry() -> ModelEntry {
        ModelEntry {
            id: "gpt-4o-mini".to_string(),
            owned_by: "openai".to_string(),
            endpoints: ["chat/completions".to_string()].into_iter().collect(),
            plan_requirements: [Plan::Free, Plan::Basic].into_iter().collect(),
            cost_type: CostType::PerToken,
            base_cost: 100,
            multiplier: 1.0,
            supports_streaming: true,
            supports_tool_calling: true,
            capability: Capability::Chat,
            discount_eligible: true,
        }
    }

    #[test]
    fn base_cost_lookup_is_pure() {
        let registry = ModelRegistry::new(vec![sample_entry()]);
        assert_eq!(registry.get_base_cost("gpt-4o-mini"), Some(100));
        assert_eq!(registry.get_base_cost("gpt-4o-mini"), Some(100));
        assert_eq!(registry.get_base_cost("unknown"), None);
    }

    #[test]
    fn plan_access_respects_requirements() {
        let registry = ModelRegistry::new(vec![sample_entry()]);
        assert!(registry.has_access("gpt-4o-mini", Plan::Free));
        assert!(!registry.has_access("gpt-4o-mini", Plan::Premium));
        assert!(registry.has_access("gpt-4o-mini", Plan::Admin));
    }

    #[test]
    fn endpoint_support_lookup() {
        let registry = ModelRegistry::new(vec![sample_entry()]);
        assert!(registry.supports_endpoint("gpt-4o-mini", "chat/completions"));
        assert!(!registry.supports_endpoint("gpt-4o-mini", "videos"));
    }
}
