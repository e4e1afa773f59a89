use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` takes precedence; without it the crate logs at INFO while
/// dependency chatter (hyper connection churn, reqwest pool events) is
/// capped at WARN. The compact single-line format fits the per-request
/// lines the dispatcher emits; targets are dropped since everything
/// interesting comes from this crate anyway.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,antrelay=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

/// Mask a credential for logging: first four and last four characters,
/// with an `sk-` prefix preserved. Short credentials are fully masked.
#[must_use]
pub fn mask_credential(key: &str) -> String {
    let (prefix, rest) = match key.strip_prefix("sk-") {
        Some(rest) => ("sk-", rest),
        None => ("", key),
    };

    let chars: Vec<char> = rest.chars().collect();
    if chars.len() <= 8 {
        return format!("{prefix}****");
    }

    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{prefix}{head}****{tail}")
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Process-wide request counters, exposed in Prometheus text format.
pub struct Metrics {
    start_time: Instant,
    total_requests: AtomicU64,
    success_requests: AtomicU64,
    error_requests: AtomicU64,
    total_latency_ms: AtomicU64,
    upstream_errors: AtomicU64,
    rate_limited: AtomicU64,
    active_connections: AtomicI64,
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_requests: AtomicU64::new(0),
            success_requests: AtomicU64::new(0),
            error_requests: AtomicU64::new(0),
            total_latency_ms: AtomicU64::new(0),
            upstream_errors: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            active_connections: AtomicI64::new(0),
        }
    }

    pub fn record_request(&self, latency_ms: u64, is_error: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        if is_error {
            self.error_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.success_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_upstream_error(&self) {
        self.upstream_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Rate-limit rejections are tracked apart from upstream errors.
    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Render all counters in Prometheus text exposition format.
    #[must_use]
    pub fn render_prometheus(&self) -> String {
        let total = self.total_requests.load(Ordering::Relaxed);
        let avg_latency_ms = if total > 0 {
            self.total_latency_ms.load(Ordering::Relaxed) as f64 / total as f64
        } else {
            0.0
        };

        let mut out = String::with_capacity(1024);
        push_gauge(
            &mut out,
            "antrelay_uptime_seconds",
            "Time since server start",
            self.start_time.elapsed().as_secs(),
        );
        push_counter(
            &mut out,
            "antrelay_requests_total",
            "Total number of requests",
            total,
        );
        push_counter(
            &mut out,
            "antrelay_requests_success_total",
            "Successful requests",
            self.success_requests.load(Ordering::Relaxed),
        );
        push_counter(
            &mut out,
            "antrelay_requests_error_total",
            "Failed requests",
            self.error_requests.load(Ordering::Relaxed),
        );
        push_counter(
            &mut out,
            "antrelay_upstream_errors_total",
            "Upstream errors",
            self.upstream_errors.load(Ordering::Relaxed),
        );
        push_counter(
            &mut out,
            "antrelay_rate_limited_total",
            "Rate limited requests",
            self.rate_limited.load(Ordering::Relaxed),
        );

        let active = self.active_connections.load(Ordering::Relaxed).max(0);
        let _ = write!(
            out,
            "# HELP antrelay_active_connections Current active connections\n\
             # TYPE antrelay_active_connections gauge\n\
             antrelay_active_connections {active}\n\n"
        );

        let _ = write!(
            out,
            "# HELP antrelay_avg_latency_ms Average request latency in milliseconds\n\
             # TYPE antrelay_avg_latency_ms gauge\n\
             antrelay_avg_latency_ms {avg_latency_ms}\n"
        );
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn push_counter(out: &mut String, name: &str, help: &str, value: u64) {
    push_metric(out, name, help, "counter", value);
}

fn push_gauge(out: &mut String, name: &str, help: &str, value: u64) {
    push_metric(out, name, help, "gauge", value);
}

fn push_metric(out: &mut String, name: &str, help: &str, kind: &str, value: u64) {
    let _ = write!(
        out,
        "# HELP {name} {help}\n# TYPE {name} {kind}\n{name} {value}\n\n"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_credential_long_key() {
        assert_eq!(mask_credential("abcdefghijklmnop"), "abcd****mnop");
    }

    #[test]
    fn test_mask_credential_preserves_sk_prefix() {
        assert_eq!(
            mask_credential("sk-abcdefghijklmnop"),
            "sk-abcd****mnop"
        );
    }

    #[test]
    fn test_mask_credential_short_key_fully_hidden() {
        assert_eq!(mask_credential("short"), "****");
        assert_eq!(mask_credential("sk-short"), "sk-****");
    }

    #[test]
    fn test_metrics_request_counters() {
        let metrics = Metrics::new();
        metrics.record_request(10, false);
        metrics.record_request(30, true);
        metrics.record_rate_limited();
        metrics.record_upstream_error();

        let text = metrics.render_prometheus();
        assert!(text.contains("antrelay_requests_total 2\n"));
        assert!(text.contains("antrelay_requests_success_total 1\n"));
        assert!(text.contains("antrelay_requests_error_total 1\n"));
        assert!(text.contains("antrelay_rate_limited_total 1\n"));
        assert!(text.contains("antrelay_upstream_errors_total 1\n"));
        assert!(text.contains("antrelay_avg_latency_ms 20\n"));
    }

    #[test]
    fn test_metrics_active_connections_gauge() {
        let metrics = Metrics::new();
        metrics.connection_opened();
        metrics.connection_opened();
        metrics.connection_closed();
        let text = metrics.render_prometheus();
        assert!(text.contains("antrelay_active_connections 1\n"));
    }
}
