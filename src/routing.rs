use std::sync::Arc;

use parking_lot::RwLock;
use regex_lite::Regex;

use crate::config::RouteEntry;

/// One compiled routing rule. An invalid pattern is kept with no regex
/// and never matches.
struct CompiledRoute {
    pattern: Option<Regex>,
    upstream: Arc<str>,
    auth_key: Option<Arc<str>>,
}

/// Ordered model-to-upstream route table: the first rule whose pattern
/// matches the requested model wins.
///
/// Behind a reader-writer lock so a future reload can swap the rules
/// while requests keep resolving concurrently.
pub struct RouteTable {
    routes: RwLock<Vec<CompiledRoute>>,
}

impl RouteTable {
    #[must_use]
    pub fn new(entries: Vec<RouteEntry>) -> Self {
        let routes = entries
            .into_iter()
            .map(|entry| {
                let pattern = match Regex::new(&entry.pattern) {
                    Ok(re) => Some(re),
                    Err(err) => {
                        tracing::warn!(
                            pattern = %entry.pattern,
                            error = %err,
                            "invalid route pattern, rule will never match"
                        );
                        None
                    }
                };
                CompiledRoute {
                    pattern,
                    upstream: Arc::from(entry.upstream.as_str()),
                    auth_key: entry.auth_key.as_deref().map(Arc::from),
                }
            })
            .collect();

        Self {
            routes: RwLock::new(routes),
        }
    }

    /// Resolve `model` against the table. Returns the matched upstream
    /// base and optional credential override, or `None` when no rule
    /// matches (caller falls back to the default upstream).
    #[must_use]
    pub fn resolve(&self, model: &str) -> Option<(Arc<str>, Option<Arc<str>>)> {
        let routes = self.routes.read();
        for route in routes.iter() {
            if route
                .pattern
                .as_ref()
                .is_some_and(|re| re.is_match(model))
            {
                return Some((Arc::clone(&route.upstream), route.auth_key.clone()));
            }
        }
        None
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }
}
