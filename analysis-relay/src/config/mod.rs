use reqwest::Url;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 60;
const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:3000";
const DEFAULT_UPLOAD_MAX_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub upstream: UpstreamConfig,
    pub cors: CorsConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the analysis server, without the `/analyze` path.
    /// `None` keeps the service up but every analyze call fails.
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    pub max_bytes: usize,
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: DEFAULT_UPSTREAM_TIMEOUT_SECS,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![DEFAULT_ALLOWED_ORIGIN.to_string()],
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_UPLOAD_MAX_BYTES,
        }
    }
}

impl RelayConfig {
    pub fn load() -> Result<Self, AppError> {
        // Load common config (handles .env and APP__ prefix)
        let common_config = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        let base_url = match env::var("UPSTREAM_BASE_URL").or_else(|_| env::var("COLAB_URL")) {
            Ok(raw) if !raw.trim().is_empty() => Some(normalize_base_url(&raw)?),
            _ if is_prod => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "UPSTREAM_BASE_URL is required in production but not set"
                )))
            }
            _ => None,
        };

        Ok(RelayConfig {
            common: common_config,
            upstream: UpstreamConfig {
                base_url,
                timeout_secs: validate_timeout(parse_env(
                    "UPSTREAM_TIMEOUT_SECS",
                    DEFAULT_UPSTREAM_TIMEOUT_SECS,
                )?)?,
            },
            cors: CorsConfig {
                allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                    .map(|raw| parse_origins(&raw))
                    .unwrap_or_else(|_| vec![DEFAULT_ALLOWED_ORIGIN.to_string()]),
            },
            upload: UploadConfig {
                max_bytes: parse_env("UPLOAD_MAX_BYTES", DEFAULT_UPLOAD_MAX_BYTES)?,
            },
        })
    }
}

/// Validates an upstream base URL and strips trailing slashes so that
/// `{base}/analyze` never contains `//`.
pub fn normalize_base_url(raw: &str) -> Result<String, AppError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let url = Url::parse(trimmed).map_err(|e| {
        AppError::ConfigError(anyhow::anyhow!("Invalid upstream URL '{}': {}", raw, e))
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::ConfigError(anyhow::anyhow!(
            "Upstream URL '{}' must use http or https",
            raw
        )));
    }

    Ok(trimmed.to_string())
}

/// A zero timeout would fail every upstream call immediately.
pub fn validate_timeout(secs: u64) -> Result<u64, AppError> {
    if secs == 0 {
        return Err(AppError::ConfigError(anyhow::anyhow!(
            "UPSTREAM_TIMEOUT_SECS must be greater than 0"
        )));
    }
    Ok(secs)
}

/// Splits a comma separated origin list, dropping blanks.
pub fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(|o| o.trim_end_matches('/').to_string())
        .collect()
}

fn parse_env<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => val.trim().parse().map_err(|e: T::Err| {
            AppError::ConfigError(anyhow::anyhow!("{} has an invalid value '{}': {}", key, val, e))
        }),
        Err(_) => Ok(default),
    }
}
