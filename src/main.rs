use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use hermes_doh::cache::DnsCache;
use hermes_doh::config::{CliArgs, Config};
use hermes_doh::metrics::{self, Metrics};
use hermes_doh::rate_limiter::RateLimiter;
use hermes_doh::resolver::Resolver;
use hermes_doh::server::Server;
use hermes_doh::upstream::{UpstreamClient, UpstreamConfig};

const EXIT_CONFIG_ERROR: u8 = 1;
const EXIT_FATAL_ERROR: u8 = 1;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    init_tracing(&config.log_level);
    info!(port = config.dns_port, upstream = %config.upstream_dns_url, "starting");

    let upstream_config = UpstreamConfig {
        service_url: config.upstream_dns_url.clone(),
        timeout_connect: config.upstream_timeout_connect,
        timeout_read: config.upstream_timeout_read,
        retry_attempts: config.upstream_retry_attempts,
        circuit_breaker_failure_threshold: config.circuit_breaker_failure_threshold,
        circuit_breaker_timeout: config.circuit_breaker_timeout,
    };

    let upstream = match UpstreamClient::new(upstream_config) {
        Ok(client) => client,
        Err(err) => {
            error!(error = %err, "failed to build upstream client");
            return ExitCode::from(EXIT_FATAL_ERROR);
        }
    };

    let cache = DnsCache::new(config.cache_size);
    let rate_limiter = RateLimiter::new(config.rate_limit_enabled, config.rate_limit_requests_per_minute);
    let resolver = Arc::new(Resolver::new(cache, rate_limiter, upstream));

    let server = match Server::bind(config.dns_port, Arc::clone(&resolver)).await {
        Ok(server) => server,
        Err(err) => {
            error!(port = config.dns_port, error = %err, "failed to bind dns socket");
            if err.kind() == std::io::ErrorKind::PermissionDenied {
                eprintln!(
                    "cannot bind port {}: permission denied. ports below 1024 require elevated privileges \
                     (run as root, or grant the binary CAP_NET_BIND_SERVICE, or pick a port >= 1024)",
                    config.dns_port
                );
            }
            return ExitCode::from(EXIT_FATAL_ERROR);
        }
    };

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    if let Some(bind_addr) = config.metrics_bind_addr.clone() {
        let metrics = Arc::new(Metrics::new());
        let resolver_for_metrics = Arc::clone(&resolver);
        tokio::spawn(metrics::serve(bind_addr, metrics, resolver_for_metrics));
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received");
            let _ = shutdown_tx.send(());
        }
    });

    server.run(shutdown_rx).await;
    info!("shutdown complete");
    ExitCode::SUCCESS
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
