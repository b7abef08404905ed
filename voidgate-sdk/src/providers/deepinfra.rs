//! # DeepInfra Adapter
//!
//! DeepInfra hosts open-weight models behind a plain OpenAI-compatible
//! endpoint; the only provider-specific behavior is model-name mapping
//! (spec §4.5 — DeepInfra's model ids are longer, slash-qualified HF repo
//! names, e.g. `meta-llama/Meta-Llama-3.1-70B-Instruct`), which
//! `ProviderConfig::mapped_model` already handles. Everything else
//! delegates to the shared OpenAI-wire helpers.

use super::generic::{chat_completion_openai_wire, stream_chat_completion_openai_wire};
use super::{Adapter, ChatStream, ProviderConfig};
use crate::error::ProviderError;
use crate::http::HttpProviderClient;
use crate::models::*;
use async_trait::async_trait;

pub struct DeepInfraAdapter {
    config: ProviderConfig,
    http: HttpProviderClient,
}

impl DeepInfraAdapter {
    pub fn new(config: ProviderConfig) -> Self {
        let http = HttpProviderClient::bearer(config.timeout, &config.base_url, &config.api_key)
            .expect("valid adapter http client configuration");
        Self { config, http }
    }
}

#[async_trait]
impl Adapter for DeepInfraAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn chat_completion(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        chat_completion_openai_wire(&self.http, &self.config, req).await
    }

    async fn stream_chat_completion(&self, req: ChatRequest) -> Result<ChatStream, ProviderError> {
        stream_chat_completion_openai_wire(&self.http, &self.config, req).await
    }

    async fn create_embeddings(&self, mut req: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        req.model = self.config.mapped_model(&req.model).to_string();
        self.http.post_json("/embeddings", &req).await
    }
}
