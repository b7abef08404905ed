//! # Provider Registry
//!
//! Gateway-side half of spec §4.5: builds and caches adapters from
//! `Provider`/`SubProviderRecord` repository rows, decrypting a
//! sub-provider's API key on demand. `voidgate_sdk::build_adapter` is the
//! factory; this module is the name → adapter cache plus the
//! sub-provider-keyed ephemeral path the load balancer's selection needs.

use crate::domain::{Provider, SubProviderRecord};
use crate::secrets::decrypt_api_key;
use dashmap::DashMap;
use std::sync::Arc;
use voidgate_sdk::{build_adapter, Adapter, Capability, ProviderConfig, ProviderError};

pub struct ProviderRegistry {
    providers: Vec<Provider>,
    sub_providers: Vec<SubProviderRecord>,
    default_adapters: DashMap<String, Arc<dyn Adapter>>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<Provider>, sub_providers: Vec<SubProviderRecord>) -> Self {
        Self {
            providers,
            sub_providers,
            default_adapters: DashMap::new(),
        }
    }

    pub fn providers(&self) -> &[Provider] {
        &self.providers
    }

    /// `getAdapter(name)`: a shared, default-keyed adapter, built once and
    /// reused for providers that hold a single account-level key rather
    /// than per-sub-provider keys.
    pub fn get_adapter(&self, provider_id: &str, default_api_key: &str) -> Result<Arc<dyn Adapter>, ProviderError> {
        if let Some(existing) = self.default_adapters.get(provider_id) {
            return Ok(existing.clone());
        }
        let provider = self
            .providers
            .iter()
            .find(|p| p.id == provider_id)
            .ok_or_else(|| ProviderError::Configuration { message: format!("unknown provider {provider_id}") })?;
        let adapter: Arc<dyn Adapter> = Arc::from(build_adapter(provider_config(provider, default_api_key))?);
        self.default_adapters.insert(provider_id.to_string(), adapter.clone());
        Ok(adapter)
    }

    /// `createAdapterWithApiKey(name, key, subProvider)`: an ephemeral
    /// adapter scoped to one sub-provider's own key and model mapping, not
    /// cached — sub-provider keys rotate independently of the provider's
    /// default key.
    pub fn create_adapter_with_sub_provider(
        &self,
        sub_provider_id: &str,
        decryption_key: &[u8],
    ) -> Result<Box<dyn Adapter>, ProviderError> {
        let sub = self
            .sub_providers
            .iter()
            .find(|s| s.id == sub_provider_id)
            .ok_or_else(|| ProviderError::Configuration { message: format!("unknown sub-provider {sub_provider_id}") })?;
        let provider = self
            .providers
            .iter()
            .find(|p| p.id == sub.provider_id)
            .ok_or_else(|| ProviderError::Configuration { message: format!("unknown provider {}", sub.provider_id) })?;
        let api_key = decrypt_api_key(&sub.encrypted_api_key, &sub.salt, decryption_key)
            .map_err(|e| ProviderError::Configuration { message: format!("failed to decrypt sub-provider key: {e}") })?;
        let mut config = provider_config(provider, &api_key);
        config.model_mapping = sub.model_mapping.clone();
        build_adapter(config)
    }

    /// `getAdaptersForModel(model)`: every provider whose capability set
    /// covers `model`, as `(provider_id, capability)` pairs — the load
    /// balancer resolves the actual adapter instance per attempt.
    pub fn providers_for_model(&self, model: &str, capability: Capability) -> Vec<&Provider> {
        self.providers
            .iter()
            .filter(|p| p.is_active && p.supported_models.contains(model) && p.capabilities.contains(&capability))
            .collect()
    }

    pub fn sub_providers_for(&self, provider_id: &str) -> Vec<&SubProviderRecord> {
        self.sub_providers.iter().filter(|s| s.provider_id == provider_id && s.is_enabled).collect()
    }
}

fn provider_config(provider: &Provider, api_key: &str) -> ProviderConfig {
    let mut config = ProviderConfig::new(provider.id.clone(), api_key.to_string(), provider.base_url.clone());
    config.timeout = std::time::Duration::from_secs(provider.timeout_secs);
    config.supported_models = provider.supported_models.clone();
    config.capabilities = provider.capabilities.clone();
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{HealthStatus, SubProviderLimits};
    use std::collections::HashSet;

    fn sample_provider() -> Provider {
        Provider {
            id: "openai".to_string(),
            name: "OpenAI".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout_secs: 30,
            priority: 1,
            is_active: true,
            needs_sub_providers: false,
            supported_models: ["gpt-4o-mini".to_string()].into_iter().collect(),
            capabilities: [Capability::Chat].into_iter().collect(),
            health_status: HealthStatus::Healthy,
            last_used_at: None,
            last_error_at: None,
        }
    }

    #[test]
    fn providers_for_model_filters_by_capability_and_model() {
        let registry = ProviderRegistry::new(vec![sample_provider()], vec![]);
        let found = registry.providers_for_model("gpt-4o-mini", Capability::Chat);
        assert_eq!(found.len(), 1);
        assert!(registry.providers_for_model("gpt-4o-mini", Capability::Images).is_empty());
    }

    #[test]
    fn default_adapter_is_cached_across_calls() {
        let registry = ProviderRegistry::new(vec![sample_provider()], vec![]);
        let a = registry.get_adapter("openai", "sk-test").unwrap();
        let b = registry.get_adapter("openai", "sk-test").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[allow(dead_code)]
    fn _unused_limits() -> SubProviderLimits {
        SubProviderLimits::default()
    }

    #[allow(dead_code)]
    fn _unused_set() -> HashSet<String> {
        HashSet::new()
    }
}
