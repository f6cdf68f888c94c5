//! Prometheus metrics for the API server.

use anyhow::{Context, Result};
use prometheus::{Counter, CounterVec, Encoder, Opts, Registry, TextEncoder};

/// Request and failure counters, served at `/metrics`.
pub struct HealthMetrics {
    registry: Registry,

    /// HTTP requests by endpoint and status class.
    pub http_requests: CounterVec,
    /// Query-layer failures surfaced as error payloads.
    pub query_errors: Counter,
}

impl HealthMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let http_requests = CounterVec::new(
            Opts::new("http_requests_total", "HTTP requests served")
                .namespace("echerga"),
            &["endpoint", "status"],
        )
        .context("creating http_requests counter")?;

        let query_errors = Counter::with_opts(
            Opts::new("query_errors_total", "Store query failures").namespace("echerga"),
        )
        .context("creating query_errors counter")?;

        registry
            .register(Box::new(http_requests.clone()))
            .context("registering http_requests")?;
        registry
            .register(Box::new(query_errors.clone()))
            .context("registering query_errors")?;

        Ok(Self {
            registry,
            http_requests,
            query_errors,
        })
    }

    /// Renders the registry in Prometheus text exposition format.
    pub fn encode(&self) -> Result<String> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        encoder
            .encode(&self.registry.gather(), &mut buf)
            .context("encoding metrics")?;
        String::from_utf8(buf).context("metrics output is not UTF-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_appear_in_output() {
        let metrics = HealthMetrics::new().unwrap();
        metrics
            .http_requests
            .with_label_values(&["checkpoints", "ok"])
            .inc();
        metrics.query_errors.inc();

        let out = metrics.encode().unwrap();
        assert!(out.contains("echerga_http_requests_total"));
        assert!(out.contains("echerga_query_errors_total 1"));
    }
}
