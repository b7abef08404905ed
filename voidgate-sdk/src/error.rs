//! # Error Handling Module
//!
//! Typed error taxonomy for the provider SDK. `ProviderError` is what
//! individual adapters return; `ClientError` is the SDK-facing error that
//! wraps it plus transport/config-level failures. The gateway crate layers
//! its own `DispatchError` on top of these (see `voidgate_gateway::error`)
//! and is responsible for mapping everything to the HTTP envelope in the
//! spec's error table.

use thiserror::Error;

/// SDK-level client errors: everything that can go wrong before or around
/// a provider call (as opposed to the call itself, see [`ProviderError`]).
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {message}")]
    Serialization { message: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },
}

/// Errors returned by a single upstream provider adapter call.
///
/// This is the error type the Error Classifier (spec §4.11) operates on:
/// `ProviderError::Api { message, .. }` carries the free-form upstream text
/// that gets pattern-matched into an `ErrorKind`.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Upstream returned a non-2xx response with a body we could parse.
    #[error("api error: {code} - {message}")]
    Api { code: u16, message: String },

    #[error("invalid api key")]
    InvalidApiKey,

    #[error("model not found: {model}")]
    ModelNotFound { model: String },

    #[error("rate limited")]
    RateLimit,

    #[error("quota exceeded")]
    QuotaExceeded,

    #[error("service unavailable")]
    ServiceUnavailable,

    #[error("timeout")]
    Timeout,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid response format: {message}")]
    InvalidResponse { message: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// The adapter exists but does not implement this capability — the
    /// dispatcher (spec §4.5) treats this as non-retryable on this adapter
    /// but retryable on a different one.
    #[error("operation not supported by this adapter: {operation}")]
    UnsupportedOperation { operation: &'static str },

    #[error("network error: {message}")]
    Network { message: String },
}

impl ProviderError {
    /// The free-form text the Error Classifier should pattern-match on.
    ///
    /// For `Api`/`InvalidResponse`/`Configuration`/`Network` this is the
    /// carried message; for the structured variants it's a stable
    /// description that still matches the classifier's substring tables
    /// (e.g. `RateLimit` -> "rate limit exceeded").
    pub fn classifier_text(&self) -> String {
        match self {
            ProviderError::Api { message, .. } => message.clone(),
            ProviderError::InvalidApiKey => "invalid api key provided".to_string(),
            ProviderError::ModelNotFound { model } => format!("model not found: {model}"),
            ProviderError::RateLimit => "rate limit exceeded".to_string(),
            ProviderError::QuotaExceeded => "insufficient quota".to_string(),
            ProviderError::ServiceUnavailable => "service unavailable".to_string(),
            ProviderError::Timeout => "request timed out".to_string(),
            ProviderError::InvalidResponse { message } => message.clone(),
            ProviderError::Configuration { message } => message.clone(),
            ProviderError::UnsupportedOperation { operation } => {
                format!("unsupported operation: {operation}")
            }
            ProviderError::Network { message } => message.clone(),
            ProviderError::Http(e) => e.to_string(),
            ProviderError::Serialization(e) => e.to_string(),
        }
    }
}
