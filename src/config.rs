use std::path::Path;

use rustc_hash::FxHashMap;
use serde::Deserialize;

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    MissingEnv(&'static str),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub const DEFAULT_LISTEN_ADDR: &str = ":8080";
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 10 * 1024 * 1024;
pub const CREDENTIALS_FILE: &str = "keys.json";
pub const ROUTES_FILE: &str = "routes.json";

/// Application configuration resolved from the environment at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Upstream OpenAI-compatible base URL (`OPENAI_BASE_URL`, required).
    pub upstream_base: String,
    /// Default model when the request omits one (`OPENAI_MODEL`).
    pub default_model: Option<String>,
    /// Listen address, `:port` or `host:port` (`LISTEN_ADDR`).
    pub listen_addr: String,
    /// Global rate limit in requests per minute; 0 = unlimited (`RATE_LIMIT`).
    pub rate_limit_rpm: u32,
    /// Default outbound credential (`OPENAI_API_KEY`).
    pub default_api_key: Option<String>,
    /// Maximum accepted request body size in bytes (`MAX_REQUEST_SIZE`).
    pub max_request_size: usize,
}

impl AppConfig {
    /// Resolve configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnv`] when `OPENAI_BASE_URL` is absent
    /// or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let upstream_base = non_empty_env("OPENAI_BASE_URL")
            .ok_or(ConfigError::MissingEnv("OPENAI_BASE_URL"))?;

        Ok(Self {
            upstream_base,
            default_model: non_empty_env("OPENAI_MODEL"),
            listen_addr: non_empty_env("LISTEN_ADDR")
                .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
            rate_limit_rpm: parse_env_u32("RATE_LIMIT"),
            default_api_key: non_empty_env("OPENAI_API_KEY"),
            max_request_size: parse_env_usize("MAX_REQUEST_SIZE")
                .unwrap_or(DEFAULT_MAX_REQUEST_SIZE),
        })
    }

    /// Socket address to bind: a bare `:port` gets the wildcard host.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        if self.listen_addr.starts_with(':') {
            format!("0.0.0.0{}", self.listen_addr)
        } else {
            self.listen_addr.clone()
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env_u32(key: &str) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

fn parse_env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

// ---------------------------------------------------------------------------
// Credential table (keys.json)
// ---------------------------------------------------------------------------

/// Per-credential configuration from the credential table file.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialConfig {
    /// Requests per minute; 0 = unlimited.
    #[serde(default)]
    pub rate_limit: u32,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub active: bool,
}

/// Load the credential table.
///
/// A missing file is not an error: it selects legacy allow-all mode.
///
/// # Errors
///
/// Returns [`ConfigError`] on read or parse failure of an existing file.
pub fn load_credentials(
    path: impl AsRef<Path>,
) -> Result<FxHashMap<String, CredentialConfig>, ConfigError> {
    let path = path.as_ref();
    match std::fs::read(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FxHashMap::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        }),
        Ok(data) => serde_json::from_slice(&data).map_err(|e| ConfigError::Json {
            path: path.display().to_string(),
            source: e,
        }),
    }
}

// ---------------------------------------------------------------------------
// Route table (routes.json)
// ---------------------------------------------------------------------------

/// One model-routing rule from the route table file.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteEntry {
    /// Regex matched against the requested model name.
    pub pattern: String,
    /// Upstream base URL used when the pattern matches.
    pub upstream: String,
    /// Optional outbound credential override for this upstream.
    #[serde(default)]
    pub auth_key: Option<String>,
}

/// Load the route table. A missing file yields an empty table.
///
/// # Errors
///
/// Returns [`ConfigError`] on read or parse failure of an existing file.
pub fn load_routes(path: impl AsRef<Path>) -> Result<Vec<RouteEntry>, ConfigError> {
    let path = path.as_ref();
    match std::fs::read(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        }),
        Ok(data) => serde_json::from_slice(&data).map_err(|e| ConfigError::Json {
            path: path.display().to_string(),
            source: e,
        }),
    }
}
