//! Per-domain rate limiting
//!
//! Each domain remembers the instant of its last approved fetch. A new fetch
//! is refused until the cooldown has elapsed. Check and update happen under
//! the map entry's lock, which is released before any I/O.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::GuardError;

/// Minimum-interval limiter keyed by domain
#[derive(Debug)]
pub struct RateLimiter {
    cooldown: Duration,
    last_request: DashMap<String, Instant>,
}

impl RateLimiter {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_request: DashMap::new(),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Claim the domain's slot now, or fail without touching state
    pub fn check_and_mark(&self, domain: &str) -> Result<(), GuardError> {
        self.check_and_mark_at(domain, Instant::now())
    }

    /// Same as [`check_and_mark`](Self::check_and_mark) at an explicit instant
    pub fn check_and_mark_at(&self, domain: &str, now: Instant) -> Result<(), GuardError> {
        match self.last_request.entry(domain.to_string()) {
            Entry::Occupied(mut slot) => {
                let elapsed = now.saturating_duration_since(*slot.get());
                if elapsed < self.cooldown {
                    debug!("Rate limit hit for {} ({:?} since last fetch)", domain, elapsed);
                    return Err(GuardError::RateLimited {
                        domain: domain.to_string(),
                        retry_after: self.cooldown - elapsed,
                    });
                }
                slot.insert(now);
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
            }
        }
        Ok(())
    }

    /// Number of domains seen so far
    pub fn tracked_domains(&self) -> usize {
        self.last_request.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_second_call_inside_cooldown_is_refused() {
        let limiter = RateLimiter::new(Duration::from_secs(5));
        let start = Instant::now();

        assert!(limiter.check_and_mark_at("example.com", start).is_ok());
        let err = limiter
            .check_and_mark_at("example.com", start + Duration::from_secs(2))
            .unwrap_err();
        match err {
            GuardError::RateLimited { domain, retry_after } => {
                assert_eq!(domain, "example.com");
                assert_eq!(retry_after, Duration::from_secs(3));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_refusal_does_not_extend_window() {
        let limiter = RateLimiter::new(Duration::from_secs(5));
        let start = Instant::now();

        limiter.check_and_mark_at("example.com", start).unwrap();
        assert!(limiter
            .check_and_mark_at("example.com", start + Duration::from_secs(4))
            .is_err());
        assert!(limiter
            .check_and_mark_at("example.com", start + Duration::from_secs(5))
            .is_ok());
    }

    #[test]
    fn test_cooldown_is_per_domain() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        let now = Instant::now();

        assert!(limiter.check_and_mark_at("a.example", now).is_ok());
        assert!(limiter.check_and_mark_at("b.example", now).is_ok());
        assert!(limiter.check_and_mark_at("a.example", now).is_err());
        assert_eq!(limiter.tracked_domains(), 2);
    }

    #[test]
    fn test_concurrent_callers_single_winner() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_secs(60)));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || limiter.check_and_mark("race.example").is_ok())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);
    }
}
