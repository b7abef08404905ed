//! # Configuration
//!
//! TOML file + environment variable overrides, in the same two-step shape
//! as the teacher's `config.rs`: `Config::load` parses the file, then
//! applies env overrides, then validates. Sections: `server`, `providers`,
//! `auth`, `cache`, `metrics`, `cron` (SPEC_FULL §B); environment variables
//! are the fixed set from spec §6.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub providers: HashMap<String, ProviderEntryConfig>,
    pub auth: AuthConfig,
    pub cache: CacheConfig,
    pub metrics: MetricsConfig,
    pub cron: CronConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    pub logs_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntryConfig {
    pub enabled: bool,
    pub base_url: String,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    pub needs_sub_providers: bool,
    pub priority: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub master_admin_key: Option<String>,
    pub database_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub redis_host: Option<String>,
    pub redis_port: Option<u16>,
    pub redis_db: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronConfig {
    pub daily_reset_interval_minutes: u32,
    pub discount_rotation_hour_cet: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                request_timeout: Duration::from_secs(300),
                logs_dir: "./logs".to_string(),
            },
            providers: HashMap::new(),
            auth: AuthConfig {
                master_admin_key: None,
                database_url: None,
            },
            cache: CacheConfig {
                redis_host: None,
                redis_port: None,
                redis_db: None,
            },
            metrics: MetricsConfig { enabled: true },
            cron: CronConfig {
                daily_reset_interval_minutes: 5,
                discount_rotation_hour_cet: 18,
            },
        }
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let mut config = if std::path::Path::new(path).exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            tracing::warn!(path, "config file not found, starting from defaults");
            Config::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Overrides in the exact order spec §6 lists the environment: `PORT`,
    /// `HOST`, `LOG_LEVEL` (read by the tracing subscriber, not here),
    /// `DATABASE_URL`, `REDIS_HOST`/`PORT`/`DB`, `MASTER_ADMIN_KEY`,
    /// `LOGS_DIR`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = env::var("PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(host) = env::var("HOST") {
            if !host.is_empty() {
                self.server.host = host;
            }
        }
        if let Ok(database_url) = env::var("DATABASE_URL") {
            self.auth.database_url = Some(database_url);
        }
        if let Ok(redis_host) = env::var("REDIS_HOST") {
            self.cache.redis_host = Some(redis_host);
        }
        if let Ok(redis_port) = env::var("REDIS_PORT") {
            if let Ok(redis_port) = redis_port.parse() {
                self.cache.redis_port = Some(redis_port);
            }
        }
        if let Ok(redis_db) = env::var("REDIS_DB") {
            if let Ok(redis_db) = redis_db.parse() {
                self.cache.redis_db = Some(redis_db);
            }
        }
        if let Ok(master_key) = env::var("MASTER_ADMIN_KEY") {
            if !master_key.is_empty() {
                self.auth.master_admin_key = Some(master_key);
            }
        }
        if let Ok(logs_dir) = env::var("LOGS_DIR") {
            if !logs_dir.is_empty() {
                self.server.logs_dir = logs_dir;
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.host.is_empty() {
            anyhow::bail!("server host cannot be empty");
        }
        if self.server.port == 0 {
            anyhow::bail!("server port must be nonzero");
        }
        for (name, provider) in &self.providers {
            if provider.enabled && provider.base_url.is_empty() {
                anyhow::bail!("provider {name} is enabled but has no base_url");
            }
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn env_overrides_take_precedence_over_file_values() {
        std::env::set_var("PORT", "9999");
        std::env::set_var("MASTER_ADMIN_KEY", "test-master-key");
        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.auth.master_admin_key, Some("test-master-key".to_string()));
        std::env::remove_var("PORT");
        std::env::remove_var("MASTER_ADMIN_KEY");
    }

    #[test]
    fn enabled_provider_without_base_url_fails_validation() {
        let mut config = Config::default();
        config.providers.insert(
            "custom".to_string(),
            ProviderEntryConfig {
                enabled: true,
                base_url: String::new(),
                timeout: Duration::from_secs(30),
                needs_sub_providers: false,
                priority: 1,
            },
        );
        assert!(config.validate().is_err());
    }
}
