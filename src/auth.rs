use std::sync::Arc;

use http::header::{HeaderName, AUTHORIZATION};
use http::HeaderMap;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::config::CredentialConfig;
use crate::limit::KeyBucket;

const X_API_KEY: HeaderName = HeaderName::from_static("x-api-key");

/// Extract the client credential from request headers.
///
/// `Authorization` is preferred, falling back to `x-api-key`; a
/// `Bearer ` prefix is stripped so both header conventions yield the
/// bare token.
#[must_use]
pub fn extract_client_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .or_else(|| headers.get(&X_API_KEY).and_then(|v| v.to_str().ok()))?;

    let token = raw.strip_prefix("Bearer ").unwrap_or(raw);
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Prefix `token` with `Bearer ` unless it already carries the scheme.
#[must_use]
pub fn bearer_value(token: &str) -> String {
    if token.starts_with("Bearer ") {
        token.to_string()
    } else {
        format!("Bearer {token}")
    }
}

/// Outcome of credential admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitDecision {
    Allowed,
    UnknownKey,
    Inactive,
    RateLimited,
}

/// Credential table plus the per-credential rate limiters.
///
/// The table itself sits behind a reader-writer lock (writers only at
/// reload); the limiter map uses one mutex for structural changes while
/// each bucket carries its own lock for token accounting.
pub struct CredentialStore {
    keys: RwLock<FxHashMap<String, CredentialConfig>>,
    limiters: Mutex<FxHashMap<String, Arc<KeyBucket>>>,
}

impl CredentialStore {
    #[must_use]
    pub fn new(keys: FxHashMap<String, CredentialConfig>) -> Self {
        Self {
            keys: RwLock::new(keys),
            limiters: Mutex::new(FxHashMap::default()),
        }
    }

    /// Whether any credentials are configured. An empty table selects
    /// legacy allow-all mode.
    #[must_use]
    pub fn has_keys(&self) -> bool {
        !self.keys.read().is_empty()
    }

    /// Admit or reject `token` against the credential table.
    #[must_use]
    pub fn admit(&self, token: &str) -> AdmitDecision {
        let (rate_limit, active, known) = {
            let keys = self.keys.read();
            if keys.is_empty() {
                return AdmitDecision::Allowed;
            }
            match keys.get(token) {
                None => (0, false, false),
                Some(config) => (config.rate_limit, config.active, true),
            }
        };

        if !known {
            return AdmitDecision::UnknownKey;
        }
        if !active {
            return AdmitDecision::Inactive;
        }
        if rate_limit == 0 {
            return AdmitDecision::Allowed;
        }

        let bucket = self.bucket_for(token, rate_limit);
        if bucket.allow() {
            AdmitDecision::Allowed
        } else {
            AdmitDecision::RateLimited
        }
    }

    fn bucket_for(&self, token: &str, rate_limit: u32) -> Arc<KeyBucket> {
        let mut limiters = self.limiters.lock();
        if let Some(existing) = limiters.get(token) {
            return Arc::clone(existing);
        }
        let bucket = Arc::new(
            KeyBucket::new(rate_limit).unwrap_or_else(|| unreachable!("rate_limit checked > 0")),
        );
        limiters.insert(token.to_string(), Arc::clone(&bucket));
        bucket
    }
}
