//! # OpenAI Adapter
//!
//! Speaks the OpenAI wire format directly, with two model-family
//! substitutions spec §4.5 calls out:
//!
//! - `gpt-5*` and `o1*`/`o3*`/`o4*` ("o-series") models reject
//!   `max_tokens` and require `max_completion_tokens` instead.
//! - codex models (`gpt-5-codex`, `gpt-5.1-codex`, anything containing
//!   "codex") only expose the `/v1/responses` surface upstream, so a
//!   `chat_completion` call against one is rewritten into a responses call
//!   and the result reshaped back into a `ChatResponse`.

use super::generic::{chat_completion_openai_wire, stream_chat_completion_openai_wire};
use super::{Adapter, ChatStream, ProviderConfig};
use crate::error::ProviderError;
use crate::http::HttpProviderClient;
use crate::models::*;

pub struct OpenAiAdapter {
    config: ProviderConfig,
    http: HttpProviderClient,
}

impl OpenAiAdapter {
    pub fn new(config: ProviderConfig) -> Self {
        let http = HttpProviderClient::bearer(config.timeout, &config.base_url, &config.api_key)
            .expect("valid adapter http client configuration");
        Self { config, http }
    }
}

/// `gpt-5*`, `o1*`, `o3*`, `o4*` — these reject `max_tokens`.
fn is_max_completion_tokens_model(model: &str) -> bool {
    model.starts_with("gpt-5") || model.starts_with("o1") || model.starts_with("o3") || model.starts_with("o4")
}

fn is_codex_model(model: &str) -> bool {
    model.contains("codex")
}

/// Move `max_tokens` into `max_completion_tokens` for models that require
/// it, leaving everything else untouched.
fn substitute_max_completion_tokens(mut req: ChatRequest) -> ChatRequest {
    if is_max_completion_tokens_model(&req.model) {
        if let Some(max_tokens) = req.max_tokens.take() {
            req.max_completion_tokens.get_or_insert(max_tokens);
        }
    }
    req
}

/// Rewrite a chat request targeting a codex model into a responses request
/// (spec §4.5): the system message(s) become `instructions`, everything
/// else becomes `input`, and `max_tokens`/`max_completion_tokens` become
/// `max_output_tokens` clamped to a minimum of 16 (upstream rejects lower).
fn chat_to_responses(req: &ChatRequest) -> ResponsesRequest {
    let mut instructions = Vec::new();
    let mut turns = Vec::new();
    for message in &req.messages {
        if message.role == Role::System {
            instructions.push(message.content_as_text());
        } else {
            turns.push(ResponsesMessage {
                role: message.role,
                content: vec![ResponsesContentPart::InputText {
                    text: message.content_as_text(),
                }],
            });
        }
    }

    let requested = req.max_completion_tokens.or(req.max_tokens).unwrap_or(16);
    ResponsesRequest {
        model: req.model.clone(),
        input: ResponsesInput::Messages(turns),
        instructions: (!instructions.is_empty()).then(|| instructions.join("\n")),
        max_output_tokens: Some(requested.max(16)),
        reasoning: req.reasoning_effort.map(|effort| ReasoningConfig { effort }),
        stream: req.stream,
        tools: req.tools.clone(),
        temperature: req.temperature,
    }
}

fn responses_to_chat_response(model: &str, resp: ResponsesResponse) -> ChatResponse {
    ChatResponse {
        id: resp.id,
        object: "chat.completion".to_string(),
        created: resp.created,
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: ResponseMessage {
                role: Role::Assistant,
                content: resp.output_text,
                tool_calls: None,
                reasoning_content: resp.reasoning,
            },
            finish_reason: Some("stop".to_string()),
        }],
        usage: resp.usage,
        system_fingerprint: None,
    }
}

#[async_trait::async_trait]
impl Adapter for OpenAiAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn chat_completion(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mapped_model = self.config.mapped_model(&req.model).to_string();
        if is_codex_model(&mapped_model) {
            let mut responses_req = chat_to_responses(&req);
            responses_req.model = mapped_model.clone();
            responses_req.stream = Some(false);
            let resp = self.http.post_json("/responses", &responses_req).await?;
            return Ok(responses_to_chat_response(&mapped_model, resp));
        }

        let req = substitute_max_completion_tokens(req);
        chat_completion_openai_wire(&self.http, &self.config, req).await
    }

    async fn stream_chat_completion(&self, req: ChatRequest) -> Result<ChatStream, ProviderError> {
        let mapped_model = self.config.mapped_model(&req.model).to_string();
        if is_codex_model(&mapped_model) {
            return self.stream_response(chat_to_responses(&req)).await;
        }
        let req = substitute_max_completion_tokens(req);
        stream_chat_completion_openai_wire(&self.http, &self.config, req).await
    }

    async fn create_response(&self, mut req: ResponsesRequest) -> Result<ResponsesResponse, ProviderError> {
        req.model = self.config.mapped_model(&req.model).to_string();
        req.stream = Some(false);
        self.http.post_json("/responses", &req).await
    }

    async fn stream_response(&self, mut req: ResponsesRequest) -> Result<ChatStream, ProviderError> {
        req.model = self.config.mapped_model(&req.model).to_string();
        req.stream = Some(true);
        let resp = self.http.post_json_raw("/responses", &req).await?;
        super::generic::stream_openai_responses_sse(resp)
    }

    async fn create_embeddings(&self, mut req: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        req.model = self.config.mapped_model(&req.model).to_string();
        self.http.post_json("/embeddings", &req).await
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
        let resp = self.http.post_multipart("/images/edits", form).await?;
        Ok(resp.json::<ImageResponse>().await?)
    }

    async fn moderate_content(&self, req: ModerationRequest) -> Result<ModerationResponse, ProviderError> {
        self.http.post_json("/moderations", &req).await
    }

    async fn create_video(&self, req: VideoCreateRequest) -> Result<VideoStatusResponse, ProviderError> {
        self.http.post_json("/videos", &req).await
    }

    async fn get_video_status(&self, video_id: &str) -> Result<VideoStatusResponse, ProviderError> {
        self.http.get_json(&format!("/videos/{video_id}")).await
    }

    async fn delete_video(&self, video_id: &str) -> Result<(), ProviderError> {
        self.http.delete(&format!("/videos/{video_id}")).await
    }

    async fn remix_video(&self, req: VideoRemixRequest) -> Result<VideoStatusResponse, ProviderError> {
        self.http
            .post_json(&format!("/videos/{}/remix", req.video_id), &req)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_completion_tokens_substituted_for_gpt5() {
        let req = ChatRequest {
            model: "gpt-5-mini".to_string(),
            max_tokens: Some(500),
            ..Default::default()
        };
        let req = substitute_max_completion_tokens(req);
        assert_eq!(req.max_tokens, None);
        assert_eq!(req.max_completion_tokens, Some(500));
    }

    #[test]
    fn non_o_series_models_keep_max_tokens() {
        let req = ChatRequest {
            model: "gpt-4o".to_string(),
            max_tokens: Some(500),
            ..Default::default()
        };
        let req = substitute_max_completion_tokens(req);
        assert_eq!(req.max_tokens, Some(500));
        assert_eq!(req.max_completion_tokens, None);
    }

    #[test]
    fn codex_chat_rewrite_extracts_instructions_and_clamps_output_tokens() {
        let req = ChatRequest {
            model: "codex-1".to_string(),
            messages: vec![Message::system("be terse"), Message::user("hi")],
            max_tokens: Some(4),
            ..Default::default()
        };
        let responses_req = chat_to_responses(&req);
        assert_eq!(responses_req.instructions.as_deref(), Some("be terse"));
        assert_eq!(responses_req.max_output_tokens, Some(16));
        match responses_req.input {
            ResponsesInput::Messages(turns) => assert_eq!(turns.len(), 1),
            _ => panic!("expected message-shaped input"),
        }
    }
}
