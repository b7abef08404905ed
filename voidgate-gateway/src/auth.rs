//! # Auth Service
//!
//! Two authentication paths over one `Authorization: Bearer <token>`
//! header (spec §4.10): API keys (`sk-voidai-` prefix) and opaque OAuth
//! bearer tokens, plus a process-wide `MASTER_ADMIN_KEY` synthetic admin
//! identity. Each failure mode maps to a distinct [`AuthError`] variant so
//! `voidgate_gateway::error::DispatchError` can pick the right status.

use crate::domain::{Plan, User};
use crate::repo::{ApiKeyRepository, OAuthTokenRepository, RepoError, UserRepository};
use crate::secrets::KeyCipher;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

pub const API_KEY_PREFIX: &str = "sk-voidai-";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    MissingHeader,
    #[error("invalid authorization header format")]
    InvalidFormat,
    #[error("invalid api key")]
    InvalidKey,
    #[error("invalid or expired oauth token")]
    InvalidOAuthToken,
    #[error("account disabled")]
    AccountDisabled,
    #[error("ip address not permitted for this account")]
    IpAccessDenied,
    #[error("admin privileges required")]
    AdminRequired,
    #[error(transparent)]
    Internal(#[from] RepoError),
}

impl AuthError {
    pub fn http_status(&self) -> u16 {
        match self {
            AuthError::MissingHeader | AuthError::InvalidFormat | AuthError::InvalidKey | AuthError::InvalidOAuthToken => 401,
            AuthError::AccountDisabled | AuthError::IpAccessDenied | AuthError::AdminRequired => 403,
            AuthError::Internal(_) => 500,
        }
    }
}

/// Deterministic, non-secret lookup hash for an API key — distinct from
/// the AES-GCM encryption of the key itself (spec §3 `ApiKey.searchHash`).
/// SHA-256 is adequate here because a key's own high entropy, not this
/// hash, is what resists brute force.
pub fn search_hash(raw_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_key.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct AuthService {
    users: Arc<dyn UserRepository>,
    api_keys: Arc<dyn ApiKeyRepository>,
    oauth_tokens: Arc<dyn OAuthTokenRepository>,
    cipher: Arc<dyn KeyCipher>,
    master_admin_key: Option<String>,
}

pub struct AuthContext {
    pub user: User,
    pub client_ip: Option<String>,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        api_keys: Arc<dyn ApiKeyRepository>,
        oauth_tokens: Arc<dyn OAuthTokenRepository>,
        cipher: Arc<dyn KeyCipher>,
        master_admin_key: Option<String>,
    ) -> Self {
        Self {
            users,
            api_keys,
            oauth_tokens,
            cipher,
            master_admin_key,
        }
    }

    /// `cf-connecting-ip || x-forwarded-for` resolution (spec §4.10).
    pub fn resolve_client_ip(cf_connecting_ip: Option<&str>, x_forwarded_for: Option<&str>) -> Option<String> {
        cf_connecting_ip
            .map(|s| s.to_string())
            .or_else(|| x_forwarded_for.and_then(|s| s.split(',').next().map(|s| s.trim().to_string())))
    }

    pub async fn authenticate(
        &self,
        authorization_header: Option<&str>,
        now: i64,
        client_ip: Option<String>,
    ) -> Result<AuthContext, AuthError> {
        let header = authorization_header.ok_or(AuthError::MissingHeader)?;
        let token = header.strip_prefix("Bearer ").ok_or(AuthError::InvalidFormat)?;

        if let Some(master_key) = &self.master_admin_key {
            if token == master_key {
                return Ok(AuthContext {
                    user: synthetic_master_admin(),
                    client_ip,
                });
            }
        }

        let user = if token.starts_with(API_KEY_PREFIX) {
            self.authenticate_api_key(token).await?
        } else {
            self.authenticate_oauth(token, now).await?
        };

        if !user.enabled {
            return Err(AuthError::AccountDisabled);
        }
        if let Some(ip) = &client_ip {
            if !user.ip_allowed(ip) {
                return Err(AuthError::IpAccessDenied);
            }
        } else if !user.ip_whitelist.is_empty() {
            return Err(AuthError::IpAccessDenied);
        }

        Ok(AuthContext { user, client_ip })
    }

    async fn authenticate_api_key(&self, token: &str) -> Result<User, AuthError> {
        let hash = search_hash(token);
        let api_key = self
            .api_keys
            .find_by_search_hash(&hash)
            .await
            .map_err(|_| AuthError::InvalidKey)?;
        if !api_key.is_active {
            return Err(AuthError::InvalidKey);
        }
        let decrypted = self
            .cipher
            .decrypt(&api_key.encrypted, &api_key.salt)
            .map_err(|_| AuthError::InvalidKey)?;
        if decrypted != token {
            return Err(AuthError::InvalidKey);
        }
        self.users.get(&api_key.user_id).await.map_err(|_| AuthError::InvalidKey)
    }

    async fn authenticate_oauth(&self, token: &str, now: i64) -> Result<User, AuthError> {
        let oauth = self
            .oauth_tokens
            .find_by_token(token)
            .await
            .map_err(|_| AuthError::InvalidOAuthToken)?;
        if !oauth.is_valid(now) {
            return Err(AuthError::InvalidOAuthToken);
        }
        self.users.get(&oauth.user_id).await.map_err(|_| AuthError::InvalidOAuthToken)
    }

    /// `/admin/*` gate (spec §4.10).
    pub fn require_admin(ctx: &AuthContext) -> Result<(), AuthError> {
        if ctx.user.is_master_admin() {
            Ok(())
        } else {
            Err(AuthError::AdminRequired)
        }
    }
}

fn synthetic_master_admin() -> User {
    User {
        id: "master-admin".to_string(),
        name: "master admin".to_string(),
        plan: Plan::Admin,
        enabled: true,
        credits: Plan::Admin.baseline_credits(),
        credits_last_reset: 0,
        ip_whitelist: HashSet::new(),
        max_concurrent_requests: u32::MAX,
        plan_expires_at: None,
        total_requests: 0,
        total_tokens_used: 0,
        total_credits_used: 0,
        rp_verified: false,
        rp_bonus_tokens_expires: None,
        rp_discount_used: false,
        version: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ApiKey;
    use crate::repo::InMemoryRepos;
    use crate::secrets::PlaintextKeyCipher;

    fn sample_user(id: &str, enabled: bool) -> User {
        User {
            id: id.to_string(),
            name: "test".to_string(),
            plan: Plan::Basic,
            enabled,
            credits: 1_000_000,
            credits_last_reset: 0,
            ip_whitelist: HashSet::new(),
            max_concurrent_requests: 10,
            plan_expires_at: None,
            total_requests: 0,
            total_tokens_used: 0,
            total_credits_used: 0,
            rp_verified: false,
            rp_bonus_tokens_expires: None,
            rp_discount_used: false,
            version: 0,
        }
    }

    async fn service_with_api_key(raw_key: &str, user: User) -> (AuthService, Arc<InMemoryRepos>) {
        let repos = Arc::new(InMemoryRepos::new());
        repos.users.insert_user(user.clone()).await;
        let cipher = PlaintextKeyCipher;
        let (encrypted, salt) = cipher.encrypt(raw_key);
        repos.api_keys.insert(ApiKey {
            id: "key1".to_string(),
            user_id: user.id.clone(),
            name: "default".to_string(),
            search_hash: search_hash(raw_key),
            encrypted,
            salt,
            algorithm: "plaintext".to_string(),
            created_at: 0,
            last_used_at: None,
            is_active: true,
        });
        let service = AuthService::new(
            repos.clone(),
            repos.api_keys.clone(),
            repos.oauth_tokens.clone(),
            Arc::new(PlaintextKeyCipher),
            Some("master-secret".to_string()),
        );
        (service, repos)
    }

    #[tokio::test]
    async fn valid_api_key_resolves_to_owning_user() {
        let (service, _repos) = service_with_api_key("sk-voidai-abc123", sample_user("u1", true)).await;
        let ctx = service
            .authenticate(Some("Bearer sk-voidai-abc123"), 0, None)
            .await
            .unwrap();
        assert_eq!(ctx.user.id, "u1");
    }

    #[tokio::test]
    async fn disabled_account_is_rejected_even_with_valid_key() {
        let (service, _repos) = service_with_api_key("sk-voidai-abc123", sample_user("u1", false)).await;
        let result = service.authenticate(Some("Bearer sk-voidai-abc123"), 0, None).await;
        assert!(matches!(result, Err(AuthError::AccountDisabled)));
    }

    #[tokio::test]
    async fn missing_header_is_distinguished_from_bad_format() {
        let (service, _repos) = service_with_api_key("sk-voidai-abc123", sample_user("u1", true)).await;
        assert!(matches!(service.authenticate(None, 0, None).await, Err(AuthError::MissingHeader)));
        assert!(matches!(
            service.authenticate(Some("sk-voidai-abc123"), 0, None).await,
            Err(AuthError::InvalidFormat)
        ));
    }

    #[tokio::test]
    async fn master_admin_key_yields_synthetic_admin_identity() {
        let (service, _repos) = service_with_api_key("sk-voidai-abc123", sample_user("u1", true)).await;
        let ctx = service.authenticate(Some("Bearer master-secret"), 0, None).await.unwrap();
        assert!(ctx.user.is_master_admin());
    }

    #[test]
    fn client_ip_prefers_cf_connecting_ip() {
        assert_eq!(
            AuthService::resolve_client_ip(Some("1.1.1.1"), Some("2.2.2.2")),
            Some("1.1.1.1".to_string())
        );
        assert_eq!(AuthService::resolve_client_ip(None, Some("2.2.2.2, 3.3.3.3")), Some("2.2.2.2".to_string()));
    }
}
