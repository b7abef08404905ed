//! # voidgate-sdk
//!
//! Provider adapters and normalized request/response models shared by the
//! `voidgate-gateway` binary. Mirrors the split between a protocol-adapter
//! SDK crate and a stateful gateway crate: this crate knows how to talk to
//! upstream LLM providers, not how to route, bill, or rate-limit requests
//! to them.

pub mod circuit_breaker;
pub mod error;
pub mod http;
pub mod models;
pub mod providers;
pub mod sse;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, SharedCircuitBreaker};
pub use error::{ClientError, ProviderError};
pub use providers::{build_adapter, Adapter, Capability, ChatStream, ProviderConfig};
