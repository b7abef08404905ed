//! # Shared HTTP Client Helper
//!
//! Thin `reqwest` wrapper shared by every adapter so error mapping and
//! header construction stay consistent. Each adapter owns one of these per
//! `ProviderConfig` (per-sub-provider API key, spec §4.5).

use crate::error::ProviderError;
use reqwest::{header::HeaderMap, Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

#[derive(Clone)]
pub struct HttpProviderClient {
    http: Client,
    base_url: String,
    default_headers: HeaderMap,
}

impl HttpProviderClient {
    pub fn bearer(timeout: Duration, base_url: &str, api_key: &str) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Authorization",
            format!("Bearer {api_key}").parse().map_err(|_| {
                ProviderError::Configuration {
                    message: "invalid api key header value".to_string(),
                }
            })?,
        );
        Self::with_headers(timeout, base_url, headers)
    }

    pub fn with_headers(
        timeout: Duration,
        base_url: &str,
        default_headers: HeaderMap,
    ) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Configuration {
                message: format!("failed to build http client: {e}"),
            })?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            default_headers,
        })
    }

    fn build_url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    pub async fn post_json<TReq: Serialize, TResp: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TResp, ProviderError> {
        let resp = self
            .http
            .request(Method::POST, self.build_url(path))
            .headers(self.default_headers.clone())
            .json(body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(map_error_response(resp).await);
        }
        Ok(resp.json::<TResp>().await?)
    }

    pub async fn post_json_raw<TReq: Serialize>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<Response, ProviderError> {
        let resp = self
            .http
            .request(Method::POST, self.build_url(path))
            .headers(self.default_headers.clone())
            .json(body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(map_error_response(resp).await);
        }
        Ok(resp)
    }

    pub async fn post_multipart(
        &self,
        path: &str,
        form: reqwest::multipart::Form,
    ) -> Result<Response, ProviderError> {
        let resp = self
            .http
            .request(Method::POST, self.build_url(path))
            .headers(self.default_headers.clone())
            .multipart(form)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(map_error_response(resp).await);
        }
        Ok(resp)
    }

    pub async fn get_json<TResp: DeserializeOwned>(&self, path: &str) -> Result<TResp, ProviderError> {
        let resp = self
            .http
            .request(Method::GET, self.build_url(path))
            .headers(self.default_headers.clone())
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(map_error_response(resp).await);
        }
        Ok(resp.json::<TResp>().await?)
    }

    pub async fn delete(&self, path: &str) -> Result<(), ProviderError> {
        let resp = self
            .http
            .request(Method::DELETE, self.build_url(path))
            .headers(self.default_headers.clone())
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(map_error_response(resp).await);
        }
        Ok(())
    }
}

/// Map a non-2xx upstream response to a [`ProviderError`], pulling a
/// message out of the common `{"error": {"message": ...}}` shape when
/// present so the Error Classifier (spec §4.11) has real text to match.
pub async fn map_error_response(resp: Response) -> ProviderError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").cloned())
        .and_then(|e| {
            e.get("message")
                .and_then(|m| m.as_str().map(|s| s.to_string()))
                .or_else(|| e.as_str().map(|s| s.to_string()))
        })
        .unwrap_or_else(|| if body.is_empty() { status.to_string() } else { body });

    match status.as_u16() {
        401 | 403 => ProviderError::InvalidApiKey,
        429 => ProviderError::RateLimit,
        code => ProviderError::Api { code, message },
    }
}
