//! Runtime configuration loaded from the environment (and `.env`).

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::storage::SupabaseConfig;

const DEFAULT_ORIGINS: &str = "http://localhost:3000,http://localhost:5173,http://127.0.0.1:8080";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} must be set")]
    Missing(&'static str),
    #[error("environment variable {var} has invalid value '{value}'")]
    Invalid { var: &'static str, value: String },
}

/// Where generated artifacts are written.
#[derive(Debug, Clone)]
pub enum StorageBackend {
    Local { root: PathBuf },
    Supabase(SupabaseConfig),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub public_base_url: String,
    pub storage: StorageBackend,
    pub chromium_path: PathBuf,
    pub export_timeout: Duration,
    pub max_concurrent_exports: usize,
    pub queue_workers: usize,
    pub queue_capacity: usize,
    pub max_attempts: u32,
    pub html_batch_size: usize,
    pub pdf_heartbeat: Duration,
    pub allowed_origins: Vec<String>,
    /// HMAC secret for bearer tokens. Required; there is no built-in default.
    pub jwt_secret: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 8080,
            database_url: None,
            public_base_url: "http://127.0.0.1:8080".to_string(),
            storage: StorageBackend::Local {
                root: PathBuf::from("./storage"),
            },
            chromium_path: PathBuf::from("chromium"),
            export_timeout: Duration::from_secs(300),
            max_concurrent_exports: 2,
            queue_workers: 2,
            queue_capacity: 64,
            max_attempts: 2,
            html_batch_size: 50,
            pdf_heartbeat: Duration::from_millis(2000),
            allowed_origins: split_origins(DEFAULT_ORIGINS),
            jwt_secret: String::new(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();
        let jwt_secret = required_var("JWT_SECRET")?;

        let storage = match env::var("CARNET_STORAGE").as_deref() {
            Ok("supabase") => StorageBackend::Supabase(SupabaseConfig::from_env()?),
            Ok("local") | Err(_) => StorageBackend::Local {
                root: env::var("CARNET_STORAGE_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("./storage")),
            },
            Ok(other) => {
                return Err(ConfigError::Invalid {
                    var: "CARNET_STORAGE",
                    value: other.to_string(),
                })
            }
        };

        let config = Self {
            bind_addr: env::var("CARNET_BIND_ADDR").unwrap_or(defaults.bind_addr),
            port: parse_var("PORT", defaults.port)?,
            database_url: env::var("DATABASE_URL").ok(),
            public_base_url: env::var("CARNET_PUBLIC_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.public_base_url),
            storage,
            chromium_path: env::var("CHROMIUM_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.chromium_path),
            export_timeout: Duration::from_secs(parse_var(
                "CARNET_EXPORT_TIMEOUT_SECS",
                defaults.export_timeout.as_secs(),
            )?),
            max_concurrent_exports: parse_positive(
                "CARNET_MAX_CONCURRENT_EXPORTS",
                defaults.max_concurrent_exports,
            )?,
            queue_workers: parse_positive("CARNET_QUEUE_WORKERS", defaults.queue_workers)?,
            queue_capacity: parse_positive("CARNET_QUEUE_CAPACITY", defaults.queue_capacity)?,
            max_attempts: parse_var("CARNET_MAX_ATTEMPTS", defaults.max_attempts)?.max(1),
            html_batch_size: parse_positive("CARNET_HTML_BATCH_SIZE", defaults.html_batch_size)?,
            pdf_heartbeat: Duration::from_millis(parse_var(
                "CARNET_PDF_HEARTBEAT_MS",
                defaults.pdf_heartbeat.as_millis() as u64,
            )?),
            allowed_origins: env::var("CARNET_ALLOWED_ORIGINS")
                .map(|raw| split_origins(&raw))
                .unwrap_or(defaults.allowed_origins),
            jwt_secret,
        };

        if config.export_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                var: "CARNET_EXPORT_TIMEOUT_SECS",
                value: "0".to_string(),
            });
        }

        Ok(config)
    }
}

fn required_var(var: &'static str) -> Result<String, ConfigError> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(var)),
    }
}

fn parse_var<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
        Err(_) => Ok(default),
    }
}

fn parse_positive(var: &'static str, default: usize) -> Result<usize, ConfigError> {
    let value = parse_var(var, default)?;
    if value == 0 {
        return Err(ConfigError::Invalid {
            var,
            value: "0".to_string(),
        });
    }
    Ok(value)
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_worker_budget() {
        let config = AppConfig::default();
        assert_eq!(config.export_timeout, Duration::from_secs(300));
        assert_eq!(config.max_attempts, 2);
        assert!(config.max_concurrent_exports > 0);
    }

    #[test]
    fn test_default_config_has_no_jwt_secret() {
        assert!(AppConfig::default().jwt_secret.is_empty());
    }

    #[test]
    fn test_missing_jwt_secret_is_a_config_error() {
        std::env::remove_var("JWT_SECRET");
        assert!(matches!(
            AppConfig::from_env(),
            Err(ConfigError::Missing("JWT_SECRET"))
        ));
    }

    #[test]
    fn test_blank_required_var_counts_as_missing() {
        std::env::set_var("CARNET_TEST_BLANK_SECRET", "   ");
        assert!(matches!(
            required_var("CARNET_TEST_BLANK_SECRET"),
            Err(ConfigError::Missing("CARNET_TEST_BLANK_SECRET"))
        ));
    }

    #[test]
    fn test_split_origins_trims_entries() {
        let origins = split_origins(" http://a.test/ ,, http://b.test");
        assert_eq!(origins, vec!["http://a.test", "http://b.test"]);
    }
}
