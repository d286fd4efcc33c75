//! Per-client-IP rate limiting (ambient, spec §4.10 — explicitly not a
//! core-invariant subject per spec §1's scoping, but carried anyway as
//! part of the ambient stack).
//!
//! Grounded on `governor`'s standard keyed-limiter pattern (seen in
//! other pack entries reaching for the same crate, e.g.
//! foofork-riptidecrawler and hypernetix-hyperspot), replacing the
//! original's `slowapi`/Starlette `Limiter` with the idiomatic Rust
//! in-process equivalent.

use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};

use crate::config::RateLimitConfig;

pub struct IpRateLimiter {
    limiter: RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>,
}

impl IpRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let (count, period) = config.parsed();
        let quota = Quota::with_period(period / count.max(1))
            .unwrap_or_else(|| Quota::per_minute(NonZeroU32::new(10).unwrap()))
            .allow_burst(NonZeroU32::new(count.max(1)).unwrap());
        Self {
            limiter: RateLimiter::keyed(quota),
        }
    }

    /// `true` when the request from `addr` is within quota.
    pub fn check(&self, addr: IpAddr) -> bool {
        self.limiter.check_key(&addr).is_ok()
    }
}

pub type SharedRateLimiter = Arc<IpRateLimiter>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_requests_within_quota() {
        let limiter = IpRateLimiter::new(&RateLimitConfig {
            limit: "5/minute".to_string(),
            allowed_hosts: vec!["*".to_string()],
        });
        let addr: IpAddr = "127.0.0.1".parse().unwrap();
        assert!(limiter.check(addr));
    }

    #[test]
    fn denies_once_burst_exhausted() {
        let limiter = IpRateLimiter::new(&RateLimitConfig {
            limit: "1/minute".to_string(),
            allowed_hosts: vec!["*".to_string()],
        });
        let addr: IpAddr = "127.0.0.2".parse().unwrap();
        assert!(limiter.check(addr));
        assert!(!limiter.check(addr));
    }
}
