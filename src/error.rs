use thiserror::Error;

pub type Result<T> = std::result::Result<T, DnsError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid port {0}: must be 1-65535")]
    InvalidPort(u32),
    #[error("upstream_dns_url is empty")]
    EmptyUpstreamUrl,
    #[error("cache_size must be greater than zero")]
    ZeroCacheSize,
    #[error("upstream_retry_attempts {0} exceeds maximum of 10")]
    TooManyRetries(u32),
    #[error("{field} timeout must be greater than zero")]
    ZeroTimeout { field: &'static str },
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    FileParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Unified error taxonomy for the resolution pipeline. Each variant maps to a
/// wire rcode (see `DnsError::rcode`) and carries enough context for the
/// structured log event emitted alongside it.
#[derive(Debug, Error)]
pub enum DnsError {
    #[error("malformed dns packet: {0}")]
    Malformed(String),

    #[error("unsupported query type {0}")]
    UnsupportedType(u16),

    #[error("invalid query name: {0}")]
    InvalidName(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("circuit breaker open for {upstream}")]
    CircuitOpen { upstream: String },

    #[error("upstream request to {upstream} timed out after {elapsed_ms}ms")]
    UpstreamTimeout { upstream: String, elapsed_ms: u64 },

    #[error("upstream connection to {upstream} failed: {source}")]
    UpstreamConnection {
        upstream: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("upstream {upstream} returned status {status}")]
    UpstreamService { upstream: String, status: u16 },

    #[error("failed to parse upstream response: {0}")]
    UpstreamParse(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DnsError {
    /// Wire rcode this error should be reported back to the client as, per
    /// the propagation policy: cache errors never reach here (recovered
    /// locally before the resolver returns).
    pub fn rcode(&self) -> u8 {
        const NOTIMP: u8 = 4;
        const REFUSED: u8 = 5;
        const SERVFAIL: u8 = 2;
        match self {
            DnsError::UnsupportedType(_) => NOTIMP,
            DnsError::RateLimited { .. } => REFUSED,
            _ => SERVFAIL,
        }
    }

    pub fn component(&self) -> &'static str {
        match self {
            DnsError::Malformed(_) | DnsError::UnsupportedType(_) | DnsError::InvalidName(_) => {
                "codec"
            }
            DnsError::Cache(_) => "cache",
            DnsError::RateLimited { .. } => "rate_limiter",
            DnsError::CircuitOpen { .. }
            | DnsError::UpstreamTimeout { .. }
            | DnsError::UpstreamConnection { .. }
            | DnsError::UpstreamService { .. }
            | DnsError::UpstreamParse(_) => "upstream",
            DnsError::Config(_) => "config",
            DnsError::Io(_) => "io",
        }
    }

    /// Whether this failure class is eligible for the upstream client's own
    /// retry loop. Terminal failures (4xx, parse errors) are not retried.
    pub fn is_retriable(&self) -> bool {
        match self {
            DnsError::UpstreamTimeout { .. } | DnsError::UpstreamConnection { .. } => true,
            DnsError::UpstreamService { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
