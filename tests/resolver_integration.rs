use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, TcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bitstream_io::{BigEndian, BitWriter};
use hermes_doh::cache::DnsCache;
use hermes_doh::dns::header::Header;
use hermes_doh::dns::name;
use hermes_doh::rate_limiter::RateLimiter;
use hermes_doh::resolver::Resolver;
use hermes_doh::upstream::{UpstreamClient, UpstreamConfig};

const CLIENT_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));

/// Spawns a thread serving a single DoH-JSON HTTP response on a fresh
/// localhost port, repeated for every connection it accepts, until the
/// returned stop handle is dropped.
fn spawn_stub_doh_server(body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf);
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/dns-json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });

    format!("http://{addr}/dns-query")
}

/// Like `spawn_stub_doh_server`, but always answers with a 500 and counts
/// how many connections it actually accepted, so a test can assert the
/// circuit breaker stopped making requests once it opened.
fn spawn_failing_doh_server() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_for_thread = Arc::clone(&hits);

    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            hits_for_thread.fetch_add(1, Ordering::SeqCst);
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf);
            let body = "upstream unavailable";
            let response = format!(
                "HTTP/1.1 500 Internal Server Error\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });

    (format!("http://{addr}/dns-query"), hits)
}

fn build_a_query_packet(id: u16, name_str: &str) -> Vec<u8> {
    let header = Header {
        id,
        qr: false,
        opcode: 0,
        aa: false,
        tc: false,
        rd: true,
        ra: false,
        z: 0,
        rcode: 0,
        qdcount: 1,
        ancount: 0,
        nscount: 0,
        arcount: 0,
    };
    let mut bytes = Vec::new();
    {
        let mut writer = BitWriter::endian(&mut bytes, BigEndian);
        header.write(&mut writer).unwrap();
    }
    bytes.extend(name::encode(name_str));
    bytes.extend_from_slice(&1u16.to_be_bytes());
    bytes.extend_from_slice(&1u16.to_be_bytes());
    bytes
}

fn test_resolver(service_url: String) -> Resolver {
    let upstream_config = UpstreamConfig {
        service_url,
        timeout_connect: Duration::from_secs(2),
        timeout_read: Duration::from_secs(2),
        retry_attempts: 0,
        circuit_breaker_failure_threshold: 3,
        circuit_breaker_timeout: Duration::from_millis(50),
    };
    let upstream = UpstreamClient::new(upstream_config).unwrap();
    let cache = DnsCache::new(100);
    let rate_limiter = RateLimiter::new(true, 600);
    Resolver::new(cache, rate_limiter, upstream)
}

#[tokio::test]
async fn resolves_a_record_and_caches_it() {
    let body = r#"{"Status":0,"Answer":[{"name":"example.com","type":1,"TTL":60,"data":"93.184.216.34"}]}"#;
    let url = spawn_stub_doh_server(body);
    let resolver = test_resolver(url);

    let packet = build_a_query_packet(1, "example.com");
    let first = resolver.resolve(&packet, CLIENT_IP).await.unwrap();
    assert_eq!(first.rcode as u8, hermes_doh::RCode::NoError as u8);
    assert_eq!(resolver.stats().cache_misses.load(std::sync::atomic::Ordering::Relaxed), 1);

    let second = resolver.resolve(&packet, CLIENT_IP).await.unwrap();
    assert_eq!(second.rcode as u8, hermes_doh::RCode::NoError as u8);
    assert_eq!(resolver.stats().cache_hits.load(std::sync::atomic::Ordering::Relaxed), 1);
}

#[tokio::test]
async fn nxdomain_upstream_status_maps_to_name_error() {
    let body = r#"{"Status":3,"Answer":[]}"#;
    let url = spawn_stub_doh_server(body);
    let resolver = test_resolver(url);

    let packet = build_a_query_packet(2, "missing.example.com");
    let result = resolver.resolve(&packet, CLIENT_IP).await.unwrap();
    assert_eq!(result.rcode as u8, hermes_doh::RCode::NameError as u8);
}

#[tokio::test]
async fn malformed_packet_is_rejected_without_a_reply() {
    let url = spawn_stub_doh_server(r#"{"Status":0,"Answer":[]}"#);
    let resolver = test_resolver(url);

    let err = resolver.resolve(&[0u8; 4], CLIENT_IP).await.unwrap_err();
    assert!(matches!(err, hermes_doh::error::DnsError::Malformed(_)));
}

#[tokio::test]
async fn rate_limited_client_gets_refused() {
    let body = r#"{"Status":0,"Answer":[{"name":"example.com","type":1,"TTL":60,"data":"1.2.3.4"}]}"#;
    let url = spawn_stub_doh_server(body);
    let upstream_config = UpstreamConfig {
        service_url: url,
        timeout_connect: Duration::from_secs(2),
        timeout_read: Duration::from_secs(2),
        retry_attempts: 0,
        circuit_breaker_failure_threshold: 3,
        circuit_breaker_timeout: Duration::from_millis(50),
    };
    let upstream = UpstreamClient::new(upstream_config).unwrap();
    let cache = DnsCache::new(100);
    let rate_limiter = RateLimiter::new(true, 1);
    let resolver = Resolver::new(cache, rate_limiter, upstream);

    let packet = build_a_query_packet(3, "a.example.com");
    let first = resolver.resolve(&packet, CLIENT_IP).await.unwrap();
    assert_eq!(first.rcode as u8, hermes_doh::RCode::NoError as u8);

    let packet2 = build_a_query_packet(4, "b.example.com");
    let second = resolver.resolve(&packet2, CLIENT_IP).await.unwrap();
    assert_eq!(second.rcode as u8, hermes_doh::RCode::Refused as u8);
}

#[tokio::test]
async fn circuit_breaker_opens_then_probes_again_after_recovery_timeout() {
    let (url, hits) = spawn_failing_doh_server();
    let upstream_config = UpstreamConfig {
        service_url: url,
        timeout_connect: Duration::from_secs(2),
        timeout_read: Duration::from_secs(2),
        retry_attempts: 0,
        circuit_breaker_failure_threshold: 3,
        circuit_breaker_timeout: Duration::from_millis(80),
    };
    let upstream = UpstreamClient::new(upstream_config).unwrap();
    let cache = DnsCache::new(100);
    let rate_limiter = RateLimiter::new(false, 0);
    let resolver = Resolver::new(cache, rate_limiter, upstream);

    // Three consecutive failures trip the breaker.
    for id in 0..3u16 {
        let packet = build_a_query_packet(id, "flaky.example.com");
        let result = resolver.resolve(&packet, CLIENT_IP).await.unwrap();
        assert_eq!(result.rcode as u8, hermes_doh::RCode::ServerFailure as u8);
    }
    assert_eq!(hits.load(Ordering::SeqCst), 3);

    // The breaker is now open: this query gets an immediate SERVFAIL with
    // no further I/O against the upstream.
    let packet = build_a_query_packet(3, "flaky.example.com");
    let open_result = resolver.resolve(&packet, CLIENT_IP).await.unwrap();
    assert_eq!(open_result.rcode as u8, hermes_doh::RCode::ServerFailure as u8);
    assert_eq!(hits.load(Ordering::SeqCst), 3, "breaker open: no new connection should be made");

    // Once the recovery timeout passes, the next query is let through as a
    // half-open probe, reaching the (still failing) upstream once more.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let packet = build_a_query_packet(4, "flaky.example.com");
    let probe_result = resolver.resolve(&packet, CLIENT_IP).await.unwrap();
    assert_eq!(probe_result.rcode as u8, hermes_doh::RCode::ServerFailure as u8);
    assert_eq!(hits.load(Ordering::SeqCst), 4, "half-open probe should reach the upstream");
}
