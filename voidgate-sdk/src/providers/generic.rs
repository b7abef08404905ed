//! # Generic OpenAI-Compatible Adapter
//!
//! Fallback adapter for any upstream that speaks the OpenAI chat/embeddings/
//! images/audio wire format verbatim (self-hosted endpoints, `Tools302`'s
//! plain text endpoints, unlisted providers). [`openai`], [`deepinfra`], and
//! [`xai`] all delegate their shared logic to the free functions here and
//! only override the request transform that differs (spec §4.5).

use super::{Adapter, ChatStream, ProviderConfig};
use crate::error::ProviderError;
use crate::http::HttpProviderClient;
use crate::models::*;
use crate::sse::{is_done_sentinel, SseParser};
use async_trait::async_trait;
use futures::StreamExt;

pub struct GenericOpenAiAdapter {
    config: ProviderConfig,
    http: HttpProviderClient,
}

impl GenericOpenAiAdapter {
    pub fn new(config: ProviderConfig) -> Self {
        let http = HttpProviderClient::bearer(config.timeout, &config.base_url, &config.api_key)
            .expect("valid adapter http client configuration");
        Self { config, http }
    }
}

#[async_trait]
impl Adapter for GenericOpenAiAdapter {
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

    async fn create_embeddings(&self, req: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        let mut req = req;
        req.model = self.config.mapped_model(&req.model).to_string();
        self.http.post_json("/embeddings", &req).await
    }

    async fn generate_images(&self, req: ImageRequest) -> Result<ImageResponse, ProviderError> {
        self.http.post_json("/images/generations", &req).await
    }

    async fn edit_images(&self, req: ImageEditRequest) -> Result<ImageResponse, ProviderError> {
        let mut form = reqwest::multipart::Form::new()
            .text("prompt", req.prompt.clone())
            .part("image", reqwest::multipart::Part::bytes(req.image.clone()));
        if let Some(mask) = req.mask.clone() {
            form = form.part("mask", reqwest::multipart::Part::bytes(mask));
        }
        if let Some(model) = req.model.clone() {
            form = form.text("model", model);
        }
        let resp = self.http.post_multipart("/images/edits", form).await?;
        Ok(resp.json::<ImageResponse>().await?)
    }

    async fn audio_transcription(
        &self,
        req: AudioTranscriptionRequest,
    ) -> Result<AudioTranscriptionResponse, ProviderError> {
        let form = reqwest::multipart::Form::new()
            .text("model", req.model.clone())
            .part(
                "file",
                reqwest::multipart::Part::bytes(req.file.clone()).file_name(req.file_name.clone()),
            );
        let resp = self.http.post_multipart("/audio/transcriptions", form).await?;
        Ok(resp.json::<AudioTranscriptionResponse>().await?)
    }

    async fn text_to_speech(&self, req: SpeechRequest) -> Result<SpeechResponse, ProviderError> {
        let resp = self.http.post_json_raw("/audio/speech", &req).await?;
        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("audio/mpeg")
            .to_string();
        let audio = resp.bytes().await?.to_vec();
        Ok(SpeechResponse { audio, content_type })
    }

    async fn moderate_content(&self, req: ModerationRequest) -> Result<ModerationResponse, ProviderError> {
        self.http.post_json("/moderations", &req).await
    }
}

/// Shared "plain OpenAI wire" chat completion, parameterized on the
/// provider config so per-model field substitutions (gpt-5/o-series,
/// X-AI penalty stripping, …) can be applied by the caller before this
/// runs.
pub async fn chat_completion_openai_wire(
    http: &HttpProviderClient,
    config: &ProviderConfig,
    mut req: ChatRequest,
) -> Result<ChatResponse, ProviderError> {
    req.model = config.mapped_model(&req.model).to_string();
    req.stream = Some(false);
    http.post_json("/chat/completions", &req).await
}

pub async fn stream_chat_completion_openai_wire(
    http: &HttpProviderClient,
    config: &ProviderConfig,
    mut req: ChatRequest,
) -> Result<ChatStream, ProviderError> {
    req.model = config.mapped_model(&req.model).to_string();
    req.stream = Some(true);
    let resp = http.post_json_raw("/chat/completions", &req).await?;
    let mut byte_stream = resp.bytes_stream();

    let stream = async_stream::try_stream! {
        let mut parser = SseParser::new();
        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.map_err(ProviderError::Http)?;
            for event in parser.push_bytes(&chunk) {
                if is_done_sentinel(&event.data) {
                    yield StreamEvent::Done;
                    return;
                }
                match serde_json::from_str::<StreamChunk>(&event.data) {
                    Ok(parsed) => yield StreamEvent::Delta(parsed),
                    Err(e) => tracing::warn!(error = %e, "skipping malformed stream chunk"),
                }
            }
        }
        for event in parser.finish() {
            if !is_done_sentinel(&event.data) {
                if let Ok(parsed) = serde_json::from_str::<StreamChunk>(&event.data) {
                    yield StreamEvent::Delta(parsed);
                }
            }
        }
        yield StreamEvent::Done;
    };

    Ok(Box::pin(stream))
}

/// Adapt a `/v1/responses` SSE stream (`response.output_text.delta`
/// events) into the same [`StreamEvent`] shape the chat streaming path
/// produces, so the dispatcher's push-to-client loop (spec §4.8) doesn't
/// need to know which protocol it originated from.
pub fn stream_openai_responses_sse(resp: reqwest::Response) -> Result<ChatStream, ProviderError> {
    let mut byte_stream = resp.bytes_stream();
    let stream = async_stream::try_stream! {
        let mut parser = SseParser::new();
        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.map_err(ProviderError::Http)?;
            for event in parser.push_bytes(&chunk) {
                if is_done_sentinel(&event.data) {
                    yield StreamEvent::Done;
                    return;
                }
                let Ok(value) = serde_json::from_str::<serde_json::Value>(&event.data) else {
                    tracing::warn!("skipping malformed responses stream event");
                    continue;
                };
                let delta_text = value.get("delta").and_then(|d| d.as_str());
                if let Some(text) = delta_text {
                    yield StreamEvent::Delta(StreamChunk {
                        id: String::new(),
                        object: "response.chunk".to_string(),
                        created: 0,
                        model: String::new(),
                        choices: vec![StreamChoice {
                            index: 0,
                            delta: Delta {
                                role: None,
                                content: Some(text.to_string()),
                                reasoning_content: None,
                                tool_calls: None,
                            },
                            finish_reason: None,
                        }],
                        usage: None,
                    });
                }
            }
        }
        yield StreamEvent::Done;
    };
    Ok(Box::pin(stream))
}
