//! # Domain Entities
//!
//! The persisted entity shapes from the data model: `User`, `ApiKey`,
//! `OAuthToken`, `Provider`, `SubProvider`, `ApiRequest`, `UserDiscount`,
//! `VideoJob`. These are plain data — the invariants around them (credits
//! never negative, `ApiRequest` lifecycle, discount uniqueness) live in the
//! engines that own the transitions (`credit_engine`, `request_tracker`,
//! `discount_engine`), not here.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub type Timestamp = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Free,
    Economy,
    Basic,
    Premium,
    Contributor,
    Pro,
    Ultra,
    Enterprise,
    Admin,
}

impl Plan {
    /// Baseline daily credit allotment (spec §4.2 `PLAN_CONFIGS`).
    pub fn baseline_credits(self) -> i64 {
        match self {
            Plan::Free => 125_000,
            Plan::Economy => 650_000,
            Plan::Basic => 1_000_000,
            Plan::Premium => 4_250_000,
            Plan::Contributor => 5_000_000,
            Plan::Pro => 8_500_000,
            Plan::Ultra => 12_500_000,
            Plan::Enterprise => 80_000_000,
            Plan::Admin => 1_000_000_000_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub plan: Plan,
    pub enabled: bool,
    pub credits: i64,
    pub credits_last_reset: Timestamp,
    pub ip_whitelist: HashSet<String>,
    pub max_concurrent_requests: u32,
    pub plan_expires_at: Option<Timestamp>,
    pub total_requests: i64,
    pub total_tokens_used: i64,
    pub total_credits_used: i64,
    pub rp_verified: bool,
    pub rp_bonus_tokens_expires: Option<Timestamp>,
    pub rp_discount_used: bool,
    /// Optimistic-concurrency version for the credit-debit compare-and-swap
    /// (spec §5: "an optimistic concurrency check against a stored
    /// version"), bumped on every repository write.
    pub version: u64,
}

impl User {
    /// `ipWhitelist` empty accepts all IPs; otherwise whitelist-only (spec §3).
    pub fn ip_allowed(&self, ip: &str) -> bool {
        self.ip_whitelist.is_empty() || self.ip_whitelist.contains(ip)
    }

    pub fn is_master_admin(&self) -> bool {
        self.plan == Plan::Admin
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub search_hash: String,
    pub encrypted: Vec<u8>,
    pub salt: Vec<u8>,
    pub algorithm: String,
    pub created_at: Timestamp,
    pub last_used_at: Option<Timestamp>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthToken {
    pub id: String,
    pub user_id: String,
    pub token: String,
    pub expires_at: Timestamp,
}

impl OAuthToken {
    pub fn is_valid(&self, now: Timestamp) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub priority: u32,
    pub is_active: bool,
    pub needs_sub_providers: bool,
    pub supported_models: HashSet<String>,
    pub capabilities: HashSet<voidgate_sdk::Capability>,
    pub health_status: HealthStatus,
    pub last_used_at: Option<Timestamp>,
    pub last_error_at: Option<Timestamp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubProviderLimits {
    pub rpm: u32,
    pub rph: u32,
    pub tpm: u32,
    pub max_concurrent: u32,
}

impl Default for SubProviderLimits {
    fn default() -> Self {
        Self {
            rpm: 500,
            rph: 10_000,
            tpm: 1_000_000,
            max_concurrent: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubProviderRecord {
    pub id: String,
    pub provider_id: String,
    pub name: String,
    pub encrypted_api_key: Vec<u8>,
    pub salt: Vec<u8>,
    pub algorithm: String,
    pub priority: u32,
    pub weight: u32,
    pub is_enabled: bool,
    pub limits: SubProviderLimits,
    pub model_mapping: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRequest {
    pub id: String,
    pub user_id: Option<String>,
    pub endpoint: String,
    pub method: String,
    pub model: String,
    pub provider_id: Option<String>,
    pub sub_provider_id: Option<String>,
    pub status: RequestStatus,
    pub status_code: Option<u16>,
    pub tokens_used: Option<u64>,
    pub credits_used: Option<i64>,
    pub latency_ms: Option<u64>,
    pub request_size: u64,
    pub response_size: Option<u64>,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

impl ApiRequest {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            RequestStatus::Completed | RequestStatus::Failed | RequestStatus::Timeout
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDiscount {
    pub id: String,
    pub user_id: String,
    pub model_id: String,
    pub discount_multiplier: f64,
    pub expires_at: Timestamp,
    pub created_at: Timestamp,
}

impl UserDiscount {
    pub fn is_active(&self, now: Timestamp) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoJob {
    pub id: String,
    pub user_id: Option<String>,
    pub model: String,
    pub provider_name: String,
    pub sub_provider_id: Option<String>,
    pub status: String,
    pub size: Option<String>,
    pub seconds: Option<u32>,
}
