use std::path::Path;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::validation;

const ENV_PREFIX: &str = "HERMES_";

#[derive(Parser, Debug, Default)]
#[command(name = "hermes-doh", about = "recursive DNS front end over DoH")]
pub struct CliArgs {
    #[arg(long)]
    pub config: Option<String>,
    #[arg(long)]
    pub port: Option<u16>,
    #[arg(long = "upstream-url")]
    pub upstream_dns_url: Option<String>,
    #[arg(long)]
    pub cache_size: Option<usize>,
    #[arg(long)]
    pub log_level: Option<String>,
    #[arg(long)]
    pub metrics_bind_addr: Option<String>,
    #[arg(long)]
    pub rate_limit_enabled: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    dns_port: Option<u16>,
    upstream_dns_url: Option<String>,
    upstream_timeout_connect_secs: Option<u64>,
    upstream_timeout_read_secs: Option<u64>,
    upstream_retry_attempts: Option<u32>,
    cache_size: Option<usize>,
    circuit_breaker_failure_threshold: Option<u32>,
    circuit_breaker_timeout_secs: Option<u64>,
    rate_limit_enabled: Option<bool>,
    rate_limit_requests_per_minute: Option<u32>,
    log_level: Option<String>,
    log_file: Option<String>,
    metrics_bind_addr: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub dns_port: u16,
    pub upstream_dns_url: String,
    pub upstream_timeout_connect: Duration,
    pub upstream_timeout_read: Duration,
    pub upstream_retry_attempts: u32,
    pub cache_size: usize,
    pub circuit_breaker_failure_threshold: u32,
    pub circuit_breaker_timeout: Duration,
    pub rate_limit_enabled: bool,
    pub rate_limit_requests_per_minute: u32,
    pub log_level: String,
    pub log_file: Option<String>,
    pub metrics_bind_addr: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dns_port: 1053,
            upstream_dns_url: "https://cloudflare-dns.com/dns-query".to_string(),
            upstream_timeout_connect: Duration::from_secs(2),
            upstream_timeout_read: Duration::from_secs(5),
            upstream_retry_attempts: 2,
            cache_size: 10_000,
            circuit_breaker_failure_threshold: 5,
            circuit_breaker_timeout: Duration::from_secs(30),
            rate_limit_enabled: true,
            rate_limit_requests_per_minute: 600,
            log_level: "info".to_string(),
            log_file: None,
            metrics_bind_addr: Some("127.0.0.1:9090".to_string()),
        }
    }
}

impl Config {
    /// Build the effective configuration from, in increasing precedence:
    /// defaults, an optional TOML file, environment variables prefixed with
    /// `HERMES_`, then CLI flags. Validates before returning.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = &cli.config {
            config.apply_file(path)?;
        }

        config.apply_env()?;
        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, path: &str) -> Result<(), ConfigError> {
        let contents = std::fs::read_to_string(Path::new(path)).map_err(|source| ConfigError::FileRead {
            path: path.to_string(),
            source,
        })?;
        let file: FileConfig = toml::from_str(&contents).map_err(|source| ConfigError::FileParse {
            path: path.to_string(),
            source,
        })?;

        if let Some(v) = file.dns_port {
            self.dns_port = v;
        }
        if let Some(v) = file.upstream_dns_url {
            self.upstream_dns_url = v;
        }
        if let Some(v) = file.upstream_timeout_connect_secs {
            self.upstream_timeout_connect = Duration::from_secs(v);
        }
        if let Some(v) = file.upstream_timeout_read_secs {
            self.upstream_timeout_read = Duration::from_secs(v);
        }
        if let Some(v) = file.upstream_retry_attempts {
            self.upstream_retry_attempts = v;
        }
        if let Some(v) = file.cache_size {
            self.cache_size = v;
        }
        if let Some(v) = file.circuit_breaker_failure_threshold {
            self.circuit_breaker_failure_threshold = v;
        }
        if let Some(v) = file.circuit_breaker_timeout_secs {
            self.circuit_breaker_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.rate_limit_enabled {
            self.rate_limit_enabled = v;
        }
        if let Some(v) = file.rate_limit_requests_per_minute {
            self.rate_limit_requests_per_minute = v;
        }
        if let Some(v) = file.log_level {
            self.log_level = v;
        }
        if let Some(v) = file.log_file {
            self.log_file = Some(v);
        }
        if let Some(v) = file.metrics_bind_addr {
            self.metrics_bind_addr = Some(v);
        }

        Ok(())
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        let var = |name: &str| std::env::var(format!("{ENV_PREFIX}{name}")).ok();

        if let Some(v) = var("DNS_PORT") {
            self.dns_port = v
                .parse()
                .map_err(|_| ConfigError::InvalidValue { field: "dns_port", value: v })?;
        }
        if let Some(v) = var("UPSTREAM_DNS_URL") {
            self.upstream_dns_url = v;
        }
        if let Some(v) = var("UPSTREAM_TIMEOUT_CONNECT_SECS") {
            let secs: u64 = v
                .parse()
                .map_err(|_| ConfigError::InvalidValue { field: "upstream_timeout_connect_secs", value: v })?;
            self.upstream_timeout_connect = Duration::from_secs(secs);
        }
        if let Some(v) = var("UPSTREAM_TIMEOUT_READ_SECS") {
            let secs: u64 = v
                .parse()
                .map_err(|_| ConfigError::InvalidValue { field: "upstream_timeout_read_secs", value: v })?;
            self.upstream_timeout_read = Duration::from_secs(secs);
        }
        if let Some(v) = var("UPSTREAM_RETRY_ATTEMPTS") {
            self.upstream_retry_attempts = v
                .parse()
                .map_err(|_| ConfigError::InvalidValue { field: "upstream_retry_attempts", value: v })?;
        }
        if let Some(v) = var("CACHE_SIZE") {
            self.cache_size = v
                .parse()
                .map_err(|_| ConfigError::InvalidValue { field: "cache_size", value: v })?;
        }
        if let Some(v) = var("CIRCUIT_BREAKER_FAILURE_THRESHOLD") {
            self.circuit_breaker_failure_threshold = v
                .parse()
                .map_err(|_| ConfigError::InvalidValue { field: "circuit_breaker_failure_threshold", value: v })?;
        }
        if let Some(v) = var("CIRCUIT_BREAKER_TIMEOUT_SECS") {
            let secs: u64 = v
                .parse()
                .map_err(|_| ConfigError::InvalidValue { field: "circuit_breaker_timeout_secs", value: v })?;
            self.circuit_breaker_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = var("RATE_LIMIT_ENABLED") {
            self.rate_limit_enabled = parse_bool(&v);
        }
        if let Some(v) = var("RATE_LIMIT_REQUESTS_PER_MINUTE") {
            self.rate_limit_requests_per_minute = v
                .parse()
                .map_err(|_| ConfigError::InvalidValue { field: "rate_limit_requests_per_minute", value: v })?;
        }
        if let Some(v) = var("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = var("LOG_FILE") {
            self.log_file = Some(v);
        }
        if let Some(v) = var("METRICS_BIND_ADDR") {
            self.metrics_bind_addr = if v.eq_ignore_ascii_case("disabled") { None } else { Some(v) };
        }

        Ok(())
    }

    fn apply_cli(&mut self, cli: &CliArgs) {
        if let Some(v) = cli.port {
            self.dns_port = v;
        }
        if let Some(v) = &cli.upstream_dns_url {
            self.upstream_dns_url = v.clone();
        }
        if let Some(v) = cli.cache_size {
            self.cache_size = v;
        }
        if let Some(v) = &cli.log_level {
            self.log_level = v.clone();
        }
        if let Some(v) = &cli.metrics_bind_addr {
            self.metrics_bind_addr = Some(v.clone());
        }
        if let Some(v) = cli.rate_limit_enabled {
            self.rate_limit_enabled = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !validation::is_valid_port(self.dns_port as u32) {
            return Err(ConfigError::InvalidPort(self.dns_port as u32));
        }
        if self.upstream_dns_url.trim().is_empty() {
            return Err(ConfigError::EmptyUpstreamUrl);
        }
        if self.cache_size == 0 {
            return Err(ConfigError::ZeroCacheSize);
        }
        if self.upstream_retry_attempts > 10 {
            return Err(ConfigError::TooManyRetries(self.upstream_retry_attempts));
        }
        if self.upstream_timeout_connect.is_zero() {
            return Err(ConfigError::ZeroTimeout { field: "upstream_timeout_connect" });
        }
        if self.upstream_timeout_read.is_zero() {
            return Err(ConfigError::ZeroTimeout { field: "upstream_timeout_read" });
        }
        if self.circuit_breaker_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout { field: "circuit_breaker_timeout" });
        }
        Ok(())
    }
}

fn parse_bool(s: &str) -> bool {
    matches!(s.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}
