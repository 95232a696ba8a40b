//! Per-user rate limiting for chat submissions.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota};

/// Allows `limit` submissions per user per minute, replenished gradually.
pub struct RateLimiter {
    limiter: DefaultKeyedRateLimiter<String>,
    clock: DefaultClock,
}

impl RateLimiter {
    pub fn per_minute(limit: u32) -> Self {
        let limit = NonZeroU32::new(limit).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: DefaultKeyedRateLimiter::keyed(Quota::per_minute(limit)),
            clock: DefaultClock::default(),
        }
    }

    /// Record a request. `Err` carries how long until the next one is allowed.
    pub fn check(&self, user_id: &str) -> Result<(), Duration> {
        let verdict = self
            .limiter
            .check_key(&user_id.to_string())
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()));
        // Users whose quota has fully replenished carry no state worth keeping.
        self.limiter.retain_recent();
        verdict
    }

    /// Number of users currently tracked.
    pub fn tracked_users(&self) -> usize {
        self.limiter.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit() {
        let limiter = RateLimiter::per_minute(3);
        for _ in 0..3 {
            assert!(limiter.check("alice").is_ok());
        }
        let retry = limiter.check("alice").unwrap_err();
        assert!(retry > Duration::ZERO);
        assert!(retry <= Duration::from_secs(60));
    }

    #[test]
    fn users_are_counted_separately() {
        let limiter = RateLimiter::per_minute(1);
        assert!(limiter.check("alice").is_ok());
        assert!(limiter.check("bob").is_ok());
        assert!(limiter.check("alice").is_err());
    }

    #[test]
    fn limited_user_survives_eviction() {
        let limiter = RateLimiter::per_minute(1);
        assert!(limiter.check("alice").is_ok());
        for i in 0..50 {
            let _ = limiter.check(&format!("user-{i}"));
        }
        assert!(limiter.check("alice").is_err());
        assert!(limiter.tracked_users() <= 51);
    }

    #[test]
    fn replenished_users_are_evicted() {
        // 60_000 per minute refills one cell per millisecond.
        let limiter = RateLimiter::per_minute(60_000);
        for i in 0..100 {
            assert!(limiter.check(&format!("user-{i}")).is_ok());
        }
        std::thread::sleep(Duration::from_millis(20));
        assert!(limiter.check("late").is_ok());
        assert!(limiter.tracked_users() <= 1, "{}", limiter.tracked_users());
    }

    #[test]
    fn zero_limit_still_admits_one() {
        let limiter = RateLimiter::per_minute(0);
        assert!(limiter.check("alice").is_ok());
        assert!(limiter.check("alice").is_err());
    }
}
