//! # X-AI (Grok) Adapter
//!
//! Speaks the OpenAI wire format but rejects `presence_penalty` and
//! `frequency_penalty` outright (spec §4.5) — stripped here rather than
//! left for upstream to 400 on.

use super::generic::{chat_completion_openai_wire, stream_chat_completion_openai_wire};
use super::{Adapter, ChatStream, ProviderConfig};
use crate::error::ProviderError;
use crate::http::HttpProviderClient;
use crate::models::*;
use async_trait::async_trait;

pub struct XAiAdapter {
    config: ProviderConfig,
    http: HttpProviderClient,
}

impl XAiAdapter {
    pub fn new(config: ProviderConfig) -> Self {
        let http = HttpProviderClient::bearer(config.timeout, &config.base_url, &config.api_key)
            .expect("valid adapter http client configuration");
        Self { config, http }
    }
}

fn strip_penalty_fields(mut req: ChatRequest) -> ChatRequest {
    req.presence_penalty = None;
    req.frequency_penalty = None;
    req
}

#[async_trait]
impl Adapter for XAiAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn chat_completion(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        chat_completion_openai_wire(&self.http, &self.config, strip_penalty_fields(req)).await
    }

    async fn stream_chat_completion(&self, req: ChatRequest) -> Result<ChatStream, ProviderError> {
        stream_chat_completion_openai_wire(&self.http, &self.config, strip_penalty_fields(req)).await
    }

    async fn create_embeddings(&self, mut req: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        req.model = self.config.mapped_model(&req.model).to_string();
        self.http.post_json("/embeddings", &req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn penalty_fields_stripped() {
        let req = ChatRequest {
            model: "grok-2".to_string(),
            presence_penalty: Some(0.5),
            frequency_penalty: Some(0.5),
            ..Default::default()
        };
        let req = strip_penalty_fields(req);
        assert_eq!(req.presence_penalty, None);
        assert_eq!(req.frequency_penalty, None);
    }
}
