use dashmap::DashMap;
use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// One client's counter for the current wall-clock minute window. `window`
/// is the Unix minute index (`epoch_secs / 60`); a mismatch means the
/// window has rolled over and the counter resets on next use.
struct WindowCounter {
    window: u64,
    count: u32,
}

fn current_minute() -> u64 {
    epoch_secs() / 60
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn seconds_until_next_minute() -> u64 {
    60 - (epoch_secs() % 60)
}

/// Fixed-window, per-client request limiter aligned to wall-clock minute
/// boundaries. Unlike a token bucket, allowance resets all at once at the
/// top of each minute rather than trickling back in.
pub struct RateLimiter {
    enabled: bool,
    requests_per_minute: u32,
    counters: DashMap<IpAddr, WindowCounter>,
}

impl RateLimiter {
    pub fn new(enabled: bool, requests_per_minute: u32) -> Self {
        Self {
            enabled,
            requests_per_minute,
            counters: DashMap::new(),
        }
    }

    /// Returns `Ok(())` if `client_ip` may proceed, incrementing its counter
    /// for the current minute as a side effect. Returns `Err(retry_after_secs)`
    /// — the number of seconds until the window rolls over — if the client
    /// is over budget.
    pub fn check(&self, client_ip: IpAddr) -> Result<(), u64> {
        if !self.enabled {
            return Ok(());
        }

        let now = current_minute();
        let mut entry = self
            .counters
            .entry(client_ip)
            .or_insert_with(|| WindowCounter { window: now, count: 0 });

        if entry.window != now {
            entry.window = now;
            entry.count = 0;
        }

        if entry.count >= self.requests_per_minute {
            let retry_after = seconds_until_next_minute();
            debug!(%client_ip, limit = self.requests_per_minute, retry_after, "rate limit exceeded");
            return Err(retry_after);
        }

        entry.count += 1;
        Ok(())
    }

    /// Drops counters for windows that have rolled over, bounding memory
    /// use under a long-running process with many distinct clients.
    pub fn cleanup_stale(&self) -> usize {
        let now = current_minute();
        let before = self.counters.len();
        self.counters.retain(|_, counter| counter.window == now);
        before - self.counters.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.counters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn ip(n: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, n))
    }

    #[test]
    fn disabled_limiter_always_allows() {
        let limiter = RateLimiter::new(false, 1);
        for _ in 0..10 {
            assert!(limiter.check(ip(1)).is_ok());
        }
    }

    #[test]
    fn allows_up_to_the_per_minute_limit() {
        let limiter = RateLimiter::new(true, 3);
        assert!(limiter.check(ip(1)).is_ok());
        assert!(limiter.check(ip(1)).is_ok());
        assert!(limiter.check(ip(1)).is_ok());
        let err = limiter.check(ip(1)).unwrap_err();
        assert!(err > 0 && err <= 60);
    }

    #[test]
    fn per_ip_isolation() {
        let limiter = RateLimiter::new(true, 1);
        assert!(limiter.check(ip(1)).is_ok());
        assert!(limiter.check(ip(1)).is_err());
        assert!(limiter.check(ip(2)).is_ok());
    }

    #[test]
    fn cleanup_drops_stale_windows() {
        let limiter = RateLimiter::new(true, 5);
        let _ = limiter.check(ip(1));
        limiter.counters.get_mut(&ip(1)).unwrap().window = 0;
        let removed = limiter.cleanup_stale();
        assert_eq!(removed, 1);
        assert_eq!(limiter.tracked_clients(), 0);
    }
}
