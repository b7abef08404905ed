//! # Provider Adapter System
//!
//! Capability-typed adapter model (spec §4.5). Every upstream is an
//! `Adapter` built from a [`ProviderConfig`] (name, api key, base url,
//! model mapping); each adapter operation is optional and defaults to
//! `ProviderError::UnsupportedOperation`, which the dispatcher treats as
//! non-retryable on that adapter but retryable on a different one (spec
//! §4.5, §7).
//!
//! Concrete adapters live in sibling modules: [`openai`], [`anthropic`],
//! [`deepinfra`], [`xai`], [`tools302`], and [`generic`] (a plain
//! OpenAI-wire-compatible fallback used for custom/self-hosted endpoints).

pub mod anthropic;
pub mod deepinfra;
pub mod generic;
pub mod openai;
pub mod tools302;
pub mod xai;

use crate::error::ProviderError;
use crate::models::*;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// One of the capabilities a model or adapter may support (spec GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Chat,
    Responses,
    Embeddings,
    Audio,
    Images,
    Videos,
    Moderation,
}

/// Static configuration for one adapter instance: one (provider name, API
/// key) pair, optionally scoped to a specific sub-provider (spec §4.5).
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    pub supported_models: HashSet<String>,
    pub model_mapping: HashMap<String, String>,
    pub capabilities: HashSet<Capability>,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            timeout: Duration::from_secs(300),
            supported_models: HashSet::new(),
            model_mapping: HashMap::new(),
            capabilities: HashSet::new(),
        }
    }

    /// `modelMapping[model] ?? model` (spec §4.5).
    pub fn mapped_model<'a>(&'a self, model: &'a str) -> &'a str {
        self.model_mapping
            .get(model)
            .map(|s| s.as_str())
            .unwrap_or(model)
    }
}

pub type ChatStream = BoxStream<'static, Result<StreamEvent, ProviderError>>;

/// The capability-typed adapter contract. Every method has a default that
/// returns [`ProviderError::UnsupportedOperation`]; adapters override only
/// the operations they actually speak.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;
    fn config(&self) -> &ProviderConfig;

    async fn chat_completion(&self, _req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        Err(ProviderError::UnsupportedOperation {
            operation: "chat_completion",
        })
    }

    async fn stream_chat_completion(&self, _req: ChatRequest) -> Result<ChatStream, ProviderError> {
        Err(ProviderError::UnsupportedOperation {
            operation: "stream_chat_completion",
        })
    }

    async fn create_response(&self, _req: ResponsesRequest) -> Result<ResponsesResponse, ProviderError> {
        Err(ProviderError::UnsupportedOperation {
            operation: "create_response",
        })
    }

    async fn stream_response(&self, _req: ResponsesRequest) -> Result<ChatStream, ProviderError> {
        Err(ProviderError::UnsupportedOperation {
            operation: "stream_response",
        })
    }

    async fn create_embeddings(&self, _req: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        Err(ProviderError::UnsupportedOperation {
            operation: "create_embeddings",
        })
    }

    async fn text_to_speech(&self, _req: SpeechRequest) -> Result<SpeechResponse, ProviderError> {
        Err(ProviderError::UnsupportedOperation {
            operation: "text_to_speech",
        })
    }

    async fn audio_transcription(
        &self,
        _req: AudioTranscriptionRequest,
    ) -> Result<AudioTranscriptionResponse, ProviderError> {
        Err(ProviderError::UnsupportedOperation {
            operation: "audio_transcription",
        })
    }

    async fn generate_images(&self, _req: ImageRequest) -> Result<ImageResponse, ProviderError> {
        Err(ProviderError::UnsupportedOperation {
            operation: "generate_images",
        })
    }

    async fn edit_images(&self, _req: ImageEditRequest) -> Result<ImageResponse, ProviderError> {
        Err(ProviderError::UnsupportedOperation {
            operation: "edit_images",
        })
    }

    async fn moderate_content(&self, _req: ModerationRequest) -> Result<ModerationResponse, ProviderError> {
        Err(ProviderError::UnsupportedOperation {
            operation: "moderate_content",
        })
    }

    async fn create_video(&self, _req: VideoCreateRequest) -> Result<VideoStatusResponse, ProviderError> {
        Err(ProviderError::UnsupportedOperation {
            operation: "create_video",
        })
    }

    async fn get_video_status(&self, _video_id: &str) -> Result<VideoStatusResponse, ProviderError> {
        Err(ProviderError::UnsupportedOperation {
            operation: "get_video_status",
        })
    }

    async fn download_video(&self, _video_id: &str, _variant: &str) -> Result<Vec<u8>, ProviderError> {
        Err(ProviderError::UnsupportedOperation {
            operation: "download_video",
        })
    }

    async fn list_videos(&self) -> Result<Vec<VideoStatusResponse>, ProviderError> {
        Err(ProviderError::UnsupportedOperation {
            operation: "list_videos",
        })
    }

    async fn delete_video(&self, _video_id: &str) -> Result<(), ProviderError> {
        Err(ProviderError::UnsupportedOperation {
            operation: "delete_video",
        })
    }

    async fn remix_video(&self, _req: VideoRemixRequest) -> Result<VideoStatusResponse, ProviderError> {
        Err(ProviderError::UnsupportedOperation {
            operation: "remix_video",
        })
    }
}

/// Build an adapter instance for a named provider family. This is the
/// factory half of the Provider Registry (spec §4.5); the registry itself
/// (which also tracks a default-keyed shared adapter per provider name)
/// lives in `voidgate_gateway::registry` since it needs the gateway's
/// sub-provider/key-decryption context.
pub fn build_adapter(config: ProviderConfig) -> Result<Box<dyn Adapter>, ProviderError> {
    match config.name.as_str() {
        "openai" => Ok(Box::new(openai::OpenAiAdapter::new(config))),
        "anthropic" => Ok(Box::new(anthropic::AnthropicAdapter::new(config))),
        "deepinfra" => Ok(Box::new(deepinfra::DeepInfraAdapter::new(config))),
        "x-ai" | "xai" => Ok(Box::new(xai::XAiAdapter::new(config))),
        "tools302" => Ok(Box::new(tools302::Tools302Adapter::new(config))),
        _ => Ok(Box::new(generic::GenericOpenAiAdapter::new(config))),
    }
}
