use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::{CacheKey, DnsCache};
use crate::dns::codec::{self, answer_is_valid};
use crate::dns::{Answer, ParseError, RCode};
use crate::error::{DnsError, Result};
use crate::rate_limiter::RateLimiter;
use crate::upstream::UpstreamClient;
use crate::validation;

/// Running counters for the life of the process. Cheap to read from the
/// metrics/health endpoints; every field is updated with `Relaxed` ordering
/// since these are independent counters, not a consistency group.
#[derive(Debug, Default)]
pub struct ServiceStats {
    pub total_queries: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub upstream_queries: AtomicU64,
    pub upstream_errors: AtomicU64,
    pub validation_errors: AtomicU64,
    pub rate_limit_errors: AtomicU64,
    pub circuit_breaker_errors: AtomicU64,
    pub total_response_time_ms: AtomicU64,
}

impl ServiceStats {
    pub fn average_response_time_ms(&self) -> f64 {
        let total = self.total_queries.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        self.total_response_time_ms.load(Ordering::Relaxed) as f64 / total as f64
    }
}

/// Snapshot returned from the `/healthz` endpoint. Cheap to build on every
/// scrape since it only reads atomics and the upstream breaker's own state.
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub uptime_secs: u64,
    pub total_queries: u64,
    pub cache_size: usize,
    pub upstream_circuit_closed: bool,
}

/// Outcome of resolving one query: wire bytes for the reply plus the rcode,
/// so the caller can log and count without re-parsing the reply.
pub struct Resolution {
    pub reply: Vec<u8>,
    pub rcode: RCode,
}

/// Wires together the cache, rate limiter and upstream client behind a
/// single `resolve` entry point. Owns no network socket itself; the UDP
/// front end calls into this per datagram.
pub struct Resolver {
    cache: DnsCache,
    rate_limiter: RateLimiter,
    upstream: UpstreamClient,
    stats: ServiceStats,
    start_time: Instant,
}

impl Resolver {
    pub fn new(cache: DnsCache, rate_limiter: RateLimiter, upstream: UpstreamClient) -> Self {
        Self {
            cache,
            rate_limiter,
            upstream,
            stats: ServiceStats::default(),
            start_time: Instant::now(),
        }
    }

    pub fn stats(&self) -> &ServiceStats {
        &self.stats
    }

    pub fn cache(&self) -> &DnsCache {
        &self.cache
    }

    pub fn upstream_healthy(&self) -> bool {
        self.upstream.is_healthy()
    }

    pub fn health_status(&self) -> HealthStatus {
        let upstream_closed = self.upstream.is_healthy();
        HealthStatus {
            healthy: upstream_closed,
            uptime_secs: self.start_time.elapsed().as_secs(),
            total_queries: self.stats.total_queries.load(Ordering::Relaxed),
            cache_size: self.cache.len(),
            upstream_circuit_closed: upstream_closed,
        }
    }

    /// Resolve one inbound wire-format packet to a wire-format reply.
    /// Returns `Err` only for packets too malformed to address a reply to
    /// (no question section, truncated header); everything else is mapped
    /// to a reply packet carrying the appropriate rcode.
    pub async fn resolve(&self, packet: &[u8], client_ip: IpAddr) -> Result<Resolution> {
        let request_id = Uuid::new_v4();
        let start = Instant::now();
        self.stats.total_queries.fetch_add(1, Ordering::Relaxed);

        let query = match codec::parse(packet) {
            Ok(query) => query,
            Err(ParseError::NameTooLong(reason)) => {
                self.stats.validation_errors.fetch_add(1, Ordering::Relaxed);
                let err = DnsError::InvalidName(reason);
                warn!(%request_id, %client_ip, error = %err, "replying servfail to oversized name");
                let id = codec::peek_id(packet).unwrap_or(0);
                let reply = codec::build_minimal_error_reply(id, RCode::ServerFailure);
                return Ok(Resolution { reply, rcode: RCode::ServerFailure });
            }
            Err(err) => {
                self.stats.validation_errors.fetch_add(1, Ordering::Relaxed);
                warn!(%request_id, %client_ip, error = %err, "dropping malformed packet");
                return Err(DnsError::Malformed(err.to_string()));
            }
        };

        info!(%request_id, %client_ip, name = %query.name(), qtype = %query.qtype, "query received");

        if !validation::is_valid_name(query.name()) {
            self.stats.validation_errors.fetch_add(1, Ordering::Relaxed);
            let err = DnsError::InvalidName(query.name().to_string());
            warn!(%request_id, %client_ip, error = %err, "replying servfail to invalid name");
            let reply = codec::build_error_reply(&query, RCode::ServerFailure);
            return Ok(Resolution { reply, rcode: RCode::ServerFailure });
        }

        if let Err(retry_after_secs) = self.rate_limiter.check(client_ip) {
            self.stats.rate_limit_errors.fetch_add(1, Ordering::Relaxed);
            let err = DnsError::RateLimited { retry_after_secs };
            warn!(%request_id, %client_ip, error = %err, "rate limit exceeded");
            let reply = codec::build_error_reply(&query, RCode::Refused);
            return Ok(Resolution { reply, rcode: RCode::Refused });
        }

        if !query.qtype.is_supported() {
            self.stats.validation_errors.fetch_add(1, Ordering::Relaxed);
            let reply = codec::build_error_reply(&query, RCode::NotImplemented);
            return Ok(Resolution { reply, rcode: RCode::NotImplemented });
        }

        let cache_key = CacheKey::new(query.name(), query.qtype);
        if let Some(hit) = self.cache.get(&cache_key) {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            let reply = codec::build_reply(&query, &hit.answers, RCode::NoError);
            self.record_latency(start);
            return Ok(Resolution { reply, rcode: RCode::NoError });
        }
        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);

        self.stats.upstream_queries.fetch_add(1, Ordering::Relaxed);
        let resolved = match self.upstream.query(query.name(), query.qtype).await {
            Ok(resolved) => resolved,
            Err(err) => {
                self.stats.upstream_errors.fetch_add(1, Ordering::Relaxed);
                if matches!(err, DnsError::CircuitOpen { .. }) {
                    self.stats.circuit_breaker_errors.fetch_add(1, Ordering::Relaxed);
                }
                warn!(%request_id, %client_ip, error = %err, component = err.component(), "upstream query failed");
                let rcode = rcode_from_u8(err.rcode());
                let reply = codec::build_error_reply(&query, rcode);
                self.record_latency(start);
                return Ok(Resolution { reply, rcode });
            }
        };

        if resolved.nxdomain {
            let reply = codec::build_error_reply(&query, RCode::NameError);
            self.record_latency(start);
            return Ok(Resolution { reply, rcode: RCode::NameError });
        }

        let valid_answers: Vec<Answer> = resolved
            .answers
            .into_iter()
            .filter(answer_is_valid)
            .collect();

        self.cache.set(cache_key, valid_answers.clone(), resolved.ttl);

        let reply = codec::build_reply(&query, &valid_answers, RCode::NoError);
        self.record_latency(start);
        Ok(Resolution { reply, rcode: RCode::NoError })
    }

    fn record_latency(&self, start: Instant) {
        let elapsed = start.elapsed().as_millis() as u64;
        self.stats.total_response_time_ms.fetch_add(elapsed, Ordering::Relaxed);
    }
}

fn rcode_from_u8(value: u8) -> RCode {
    match value {
        1 => RCode::FormatError,
        2 => RCode::ServerFailure,
        3 => RCode::NameError,
        4 => RCode::NotImplemented,
        5 => RCode::Refused,
        _ => RCode::NoError,
    }
}

pub type SharedResolver = Arc<Resolver>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_response_time_is_zero_with_no_queries() {
        let stats = ServiceStats::default();
        assert_eq!(stats.average_response_time_ms(), 0.0);
    }

    #[test]
    fn average_response_time_divides_by_total_queries() {
        let stats = ServiceStats::default();
        stats.total_queries.store(4, Ordering::Relaxed);
        stats.total_response_time_ms.store(40, Ordering::Relaxed);
        assert_eq!(stats.average_response_time_ms(), 10.0);
    }
}
