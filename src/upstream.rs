use parking_lot::Mutex;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::dns::{Answer, QType};
use crate::error::{DnsError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker state for one upstream, serialized under a single lock
/// so `(state, consecutive_failures)` is always read consistently.
struct Breaker {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    failure_threshold: u32,
    recovery_timeout: Duration,
}

impl Breaker {
    fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            failure_threshold,
            recovery_timeout,
        }
    }

    /// Checks and updates admission state in one step. Returns `true` if the
    /// caller may proceed with I/O.
    fn admit(&mut self) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = self.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.recovery_timeout {
                    self.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&mut self) {
        self.state = BreakerState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
    }

    fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        match self.state {
            BreakerState::HalfOpen => {
                self.state = BreakerState::Open;
                self.opened_at = Some(Instant::now());
            }
            BreakerState::Closed if self.consecutive_failures >= self.failure_threshold => {
                self.state = BreakerState::Open;
                self.opened_at = Some(Instant::now());
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub service_url: String,
    pub timeout_connect: Duration,
    pub timeout_read: Duration,
    pub retry_attempts: u32,
    pub circuit_breaker_failure_threshold: u32,
    pub circuit_breaker_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct DohAnswer {
    #[serde(rename = "type")]
    rtype: u16,
    #[serde(rename = "TTL")]
    ttl: Option<u32>,
    data: String,
}

#[derive(Debug, Deserialize)]
struct DohResponse {
    #[serde(rename = "Status")]
    status: i32,
    #[serde(default, rename = "Answer")]
    answer: Vec<DohAnswer>,
}

pub struct ResolvedAnswer {
    pub answers: Vec<Answer>,
    pub ttl: u32,
    pub nxdomain: bool,
}

/// DNS-over-HTTPS client for a single upstream endpoint. Owns the circuit
/// breaker for that endpoint; `query` is the only entry point and performs
/// admission, retries, and breaker bookkeeping internally.
pub struct UpstreamClient {
    http: reqwest::Client,
    config: UpstreamConfig,
    breaker: Mutex<Breaker>,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.timeout_connect)
            .timeout(config.timeout_read)
            .build()
            .map_err(|source| DnsError::UpstreamConnection {
                upstream: config.service_url.clone(),
                source,
            })?;

        Ok(Self {
            http,
            breaker: Mutex::new(Breaker::new(
                config.circuit_breaker_failure_threshold,
                config.circuit_breaker_timeout,
            )),
            config,
        })
    }

    pub async fn query(&self, name: &str, qtype: QType) -> Result<ResolvedAnswer> {
        if !self.breaker.lock().admit() {
            return Err(DnsError::CircuitOpen {
                upstream: self.config.service_url.clone(),
            });
        }

        let max_attempts = self.config.retry_attempts + 1;
        let mut last_err = None;

        for attempt in 0..max_attempts {
            match self.execute_once(name, qtype).await {
                Ok(resolved) => {
                    self.breaker.lock().record_success();
                    return Ok(resolved);
                }
                Err(err) => {
                    self.breaker.lock().record_failure();
                    let retriable = err.is_retriable();
                    last_err = Some(err);
                    if !retriable || attempt + 1 >= max_attempts {
                        break;
                    }
                    let backoff = Duration::from_secs(2u64.pow(attempt).min(10));
                    debug!(attempt, ?backoff, "retrying upstream query");
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        Err(last_err.unwrap_or(DnsError::UpstreamParse("no attempts made".into())))
    }

    async fn execute_once(&self, name: &str, qtype: QType) -> Result<ResolvedAnswer> {
        let start = Instant::now();
        let response = self
            .http
            .get(&self.config.service_url)
            .header("Accept", "application/dns-json")
            .query(&[
                ("name", name),
                ("type", &qtype.to_string()),
                ("cd", "false"),
                ("do", "false"),
            ])
            .send()
            .await
            .map_err(|source| {
                if source.is_timeout() {
                    DnsError::UpstreamTimeout {
                        upstream: self.config.service_url.clone(),
                        elapsed_ms: start.elapsed().as_millis() as u64,
                    }
                } else {
                    DnsError::UpstreamConnection {
                        upstream: self.config.service_url.clone(),
                        source,
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DnsError::UpstreamService {
                upstream: self.config.service_url.clone(),
                status: status.as_u16(),
            });
        }

        let body: DohResponse = response
            .json()
            .await
            .map_err(|e| DnsError::UpstreamParse(e.to_string()))?;

        let nxdomain = body.status == 3;
        let answers: Vec<Answer> = body
            .answer
            .iter()
            .map(|a| Answer {
                name: name.to_string(),
                qtype: QType::from(a.rtype),
                ttl: a.ttl.unwrap_or(300),
                data: a.data.clone(),
            })
            .collect();

        let ttl = body
            .answer
            .iter()
            .filter_map(|a| a.ttl)
            .min()
            .unwrap_or(300);

        Ok(ResolvedAnswer { answers, ttl, nxdomain })
    }

    pub fn reset_circuit_breaker(&self) {
        *self.breaker.lock() = Breaker::new(
            self.config.circuit_breaker_failure_threshold,
            self.config.circuit_breaker_timeout,
        );
        warn!(upstream = %self.config.service_url, "circuit breaker manually reset");
    }

    pub fn is_healthy(&self) -> bool {
        !matches!(self.breaker.lock().state, BreakerState::Open)
    }
}
