use crate::auth::{bearer_value, CredentialStore};
use crate::config::AppConfig;
use crate::limit::GlobalLimiter;
use crate::observability::Metrics;
use crate::routing::RouteTable;
use crate::transport::HttpTransport;

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub transport: HttpTransport,
    pub credentials: CredentialStore,
    pub routes: RouteTable,
    pub global_limiter: Option<GlobalLimiter>,
    pub metrics: Metrics,
}

impl AppState {
    #[must_use]
    pub fn new(
        config: AppConfig,
        transport: HttpTransport,
        credentials: CredentialStore,
        routes: RouteTable,
        global_limiter: Option<GlobalLimiter>,
    ) -> Self {
        Self {
            config,
            transport,
            credentials,
            routes,
            global_limiter,
            metrics: Metrics::new(),
        }
    }

    /// Resolve the upstream base and optional credential override for a
    /// model, falling back to the default upstream on no match.
    #[must_use]
    pub fn resolve_upstream(&self, model: &str) -> (String, Option<String>) {
        match self.routes.resolve(model) {
            Some((base, auth_key)) => (
                base.as_ref().to_string(),
                auth_key.map(|key| key.as_ref().to_string()),
            ),
            None => (self.config.upstream_base.clone(), None),
        }
    }

    /// Pick the outbound `Authorization` value: route override first,
    /// then the configured default credential, then the client's own
    /// token passed through.
    #[must_use]
    pub fn outbound_auth(&self, route_override: Option<String>, client_token: &str) -> String {
        if let Some(key) = route_override {
            return bearer_value(&key);
        }
        if let Some(key) = self.config.default_api_key.as_deref() {
            return bearer_value(key);
        }
        bearer_value(client_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteEntry;
    use rustc_hash::FxHashMap;

    fn test_state(default_api_key: Option<&str>, routes: Vec<RouteEntry>) -> AppState {
        AppState::new(
            AppConfig {
                upstream_base: "https://default.example.com".into(),
                default_model: Some("fallback-model".into()),
                listen_addr: ":8080".into(),
                rate_limit_rpm: 0,
                default_api_key: default_api_key.map(str::to_string),
                max_request_size: 1024,
            },
            HttpTransport::new(),
            CredentialStore::new(FxHashMap::default()),
            RouteTable::new(routes),
            None,
        )
    }

    #[test]
    fn test_resolve_upstream_falls_back_to_default() {
        let state = test_state(None, Vec::new());
        let (base, key) = state.resolve_upstream("gpt-4o");
        assert_eq!(base, "https://default.example.com");
        assert!(key.is_none());
    }

    #[test]
    fn test_resolve_upstream_uses_route_match() {
        let state = test_state(
            None,
            vec![RouteEntry {
                pattern: "^gpt-".into(),
                upstream: "https://routed.example.com".into(),
                auth_key: Some("route-key".into()),
            }],
        );
        let (base, key) = state.resolve_upstream("gpt-4o");
        assert_eq!(base, "https://routed.example.com");
        assert_eq!(key.as_deref(), Some("route-key"));
    }

    #[test]
    fn test_outbound_auth_precedence() {
        let state = test_state(Some("sk-default"), Vec::new());
        assert_eq!(
            state.outbound_auth(Some("sk-route".into()), "sk-client"),
            "Bearer sk-route"
        );
        assert_eq!(state.outbound_auth(None, "sk-client"), "Bearer sk-default");

        let state = test_state(None, Vec::new());
        assert_eq!(state.outbound_auth(None, "sk-client"), "Bearer sk-client");
    }
}
