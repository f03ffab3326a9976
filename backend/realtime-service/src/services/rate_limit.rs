//! Per-user request throttling for notification listing.
//!
//! State lives in this process only and is lost on restart. Behind a load
//! balancer each instance enforces its own quota, so the effective limit is
//! multiplied by the instance count until this moves to a shared counter store.

use crate::error::{AppError, AppResult};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use uuid::Uuid;

pub struct ListRateLimiter {
    limiter: DefaultKeyedRateLimiter<Uuid>,
}

impl ListRateLimiter {
    pub fn per_minute(requests: u32) -> AppResult<Self> {
        let per_minute = NonZeroU32::new(requests)
            .ok_or_else(|| AppError::Config("rate limit must be > 0".into()))?;
        Ok(Self {
            limiter: RateLimiter::keyed(Quota::per_minute(per_minute)),
        })
    }

    pub fn check(&self, user_id: Uuid) -> AppResult<()> {
        self.limiter.check_key(&user_id).map_err(|_| {
            tracing::warn!(user_id = %user_id, "notification list rate limit exceeded");
            AppError::RateLimited
        })
    }

    /// Drop idle keys so the map does not grow with every user ever seen.
    pub fn shrink(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_is_per_user() {
        let limiter = ListRateLimiter::per_minute(2).unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(limiter.check(a).is_ok());
        assert!(limiter.check(a).is_ok());
        assert!(matches!(limiter.check(a), Err(AppError::RateLimited)));
        assert!(limiter.check(b).is_ok());
    }

    #[test]
    fn test_zero_quota_rejected() {
        assert!(ListRateLimiter::per_minute(0).is_err());
    }
}
