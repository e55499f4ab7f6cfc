use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use tracing::{error, info, warn};

use crate::resolver::Resolver;

/// Prometheus collectors, registered once at startup. Values are pulled
/// from the resolver's `ServiceStats` on every scrape rather than updated
/// inline on the query path, keeping the hot path free of registry locks.
pub struct Metrics {
    registry: Registry,
    queries_total: IntCounter,
    cache_hits_total: IntCounter,
    cache_misses_total: IntCounter,
    upstream_errors_total: IntCounter,
    rate_limited_total: IntCounter,
    circuit_breaker_trips_total: IntCounter,
    cache_size: IntGauge,
    upstream_healthy: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let queries_total = IntCounter::new("hermes_doh_queries_total", "total queries received").unwrap();
        let cache_hits_total = IntCounter::new("hermes_doh_cache_hits_total", "cache hits").unwrap();
        let cache_misses_total = IntCounter::new("hermes_doh_cache_misses_total", "cache misses").unwrap();
        let upstream_errors_total =
            IntCounter::new("hermes_doh_upstream_errors_total", "upstream query failures").unwrap();
        let rate_limited_total =
            IntCounter::new("hermes_doh_rate_limited_total", "queries rejected by rate limiting").unwrap();
        let circuit_breaker_trips_total = IntCounter::new(
            "hermes_doh_circuit_breaker_trips_total",
            "queries rejected by an open circuit breaker",
        )
        .unwrap();
        let cache_size = IntGauge::new("hermes_doh_cache_size", "current cache entry count").unwrap();
        let upstream_healthy =
            IntGauge::new("hermes_doh_upstream_healthy", "1 if the upstream circuit breaker is closed").unwrap();

        for collector in [
            Box::new(queries_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(cache_hits_total.clone()),
            Box::new(cache_misses_total.clone()),
            Box::new(upstream_errors_total.clone()),
            Box::new(rate_limited_total.clone()),
            Box::new(circuit_breaker_trips_total.clone()),
            Box::new(cache_size.clone()),
            Box::new(upstream_healthy.clone()),
        ] {
            registry.register(collector).expect("metric names are unique");
        }

        Self {
            registry,
            queries_total,
            cache_hits_total,
            cache_misses_total,
            upstream_errors_total,
            rate_limited_total,
            circuit_breaker_trips_total,
            cache_size,
            upstream_healthy,
        }
    }

    /// Pull current counters from the resolver into the prometheus gauges.
    /// Counters only move forward, so this resyncs to the absolute value
    /// rather than adding a delta.
    fn sync_from(&self, resolver: &Resolver) {
        let stats = resolver.stats();
        set_counter(&self.queries_total, stats.total_queries.load(Ordering::Relaxed));
        set_counter(&self.cache_hits_total, stats.cache_hits.load(Ordering::Relaxed));
        set_counter(&self.cache_misses_total, stats.cache_misses.load(Ordering::Relaxed));
        set_counter(&self.upstream_errors_total, stats.upstream_errors.load(Ordering::Relaxed));
        set_counter(&self.rate_limited_total, stats.rate_limit_errors.load(Ordering::Relaxed));
        set_counter(
            &self.circuit_breaker_trips_total,
            stats.circuit_breaker_errors.load(Ordering::Relaxed),
        );
        self.cache_size.set(resolver.cache().len() as i64);
        self.upstream_healthy.set(resolver.upstream_healthy() as i64);
    }

    fn render(&self) -> String {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buffer)
            .expect("prometheus encoding never fails for well-formed families");
        String::from_utf8(buffer).expect("prometheus text output is always utf8")
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn set_counter(counter: &IntCounter, value: u64) {
    let current = counter.get();
    if value > current {
        counter.inc_by(value - current);
    }
}

#[derive(Clone)]
struct AppState {
    metrics: Arc<Metrics>,
    resolver: Arc<Resolver>,
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.sync_from(&state.resolver);
    (StatusCode::OK, state.metrics.render())
}

async fn healthz_handler(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.resolver.health_status();
    let code = if status.healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, axum::Json(status))
}

/// Serve `/metrics` and `/healthz` on their own listener. A failure here is
/// logged and the task exits; it never propagates to the DNS front end.
pub async fn serve(bind_addr: String, metrics: Arc<Metrics>, resolver: Arc<Resolver>) {
    let state = AppState { metrics, resolver };
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(state);

    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%bind_addr, error = %err, "failed to bind metrics listener");
            return;
        }
    };

    info!(%bind_addr, "metrics endpoint listening");
    if let Err(err) = axum::serve(listener, app).await {
        warn!(error = %err, "metrics server exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_registered_metric_names() {
        let metrics = Metrics::new();
        let output = metrics.render();
        assert!(output.contains("hermes_doh_queries_total"));
        assert!(output.contains("hermes_doh_cache_size"));
    }

    #[test]
    fn set_counter_never_decreases() {
        let counter = IntCounter::new("test_counter", "help").unwrap();
        set_counter(&counter, 5);
        assert_eq!(counter.get(), 5);
        set_counter(&counter, 3);
        assert_eq!(counter.get(), 5);
        set_counter(&counter, 9);
        assert_eq!(counter.get(), 9);
    }
}
