//! # Tools302 Adapter
//!
//! Tools302 speaks the OpenAI chat wire format, but its image generation
//! endpoint is a side channel (spec §4.5): `POST /mj/submit/imagine` returns
//! a base64 payload rather than a URL, so this adapter uploads it to
//! Tools302's own CDN endpoint and returns the resulting URL in the
//! normalized `ImageResponse` shape the dispatcher expects from every
//! adapter.

use super::generic::{chat_completion_openai_wire, stream_chat_completion_openai_wire};
use super::{Adapter, ChatStream, ProviderConfig};
use crate::error::ProviderError;
use crate::http::HttpProviderClient;
use crate::models::*;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub struct Tools302Adapter {
    config: ProviderConfig,
    http: HttpProviderClient,
}

impl Tools302Adapter {
    pub fn new(config: ProviderConfig) -> Self {
        let http = HttpProviderClient::bearer(config.timeout, &config.base_url, &config.api_key)
            .expect("valid adapter http client configuration");
        Self { config, http }
    }
}

#[derive(Debug, Serialize)]
struct ImagineRequest {
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    n: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ImagineResponse {
    images_b64: Vec<String>,
}

#[derive(Debug, Serialize)]
struct CdnUploadRequest {
    data_base64: String,
}

#[derive(Debug, Deserialize)]
struct CdnUploadResponse {
    url: String,
}

#[async_trait]
impl Adapter for Tools302Adapter {
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

    async fn generate_images(&self, req: ImageRequest) -> Result<ImageResponse, ProviderError> {
        let imagine_req = ImagineRequest {
            prompt: req.prompt.clone(),
            model: req.model.clone(),
            n: req.n,
        };
        let imagine_resp: ImagineResponse = self.http.post_json("/mj/submit/imagine", &imagine_req).await?;

        let mut data = Vec::with_capacity(imagine_resp.images_b64.len());
        for b64 in imagine_resp.images_b64 {
            if matches!(req.response_format.as_deref(), Some("b64_json")) {
                data.push(ImageData {
                    url: None,
                    b64_json: Some(b64),
                    revised_prompt: None,
                });
                continue;
            }
            let upload: CdnUploadResponse = self
                .http
                .post_json("/cdn/upload", &CdnUploadRequest { data_base64: b64 })
                .await?;
            data.push(ImageData {
                url: Some(upload.url),
                b64_json: None,
                revised_prompt: None,
            });
        }

        Ok(ImageResponse {
            created: chrono::Utc::now().timestamp() as u64,
            data,
        })
    }
}
