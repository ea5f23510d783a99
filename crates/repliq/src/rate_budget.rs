//! 🚦 Rate Budget — one speed limit, many drivers.
//!
//! 🎬 *[INT. HIGHWAY — RUSH HOUR. twelve requests merge into one lane.]*
//! *[a single traffic light blinks. it answers to nobody. it was built once.]*
//!
//! The remote API gave us a ceiling: `burst` calls per `period`. Every request in a job
//! must honour that *same* ceiling, so the limiter is built exactly once and shared via `Arc`.
//! Build one per request and you've quietly multiplied your traffic by N. The API's ops team
//! will notice. They will have feelings about it. They will express them as a 429.
//!
//! 🧠 Knowledge graph:
//! - Built by `RateBudget::derive(Option<&RateLimitConfig>)`, once per job
//! - Shared as [`SharedRateBudget`] (`Arc<RateBudget>`) by every `requests::Request`
//! - Backed by `governor` (GCRA): one permit per `period / burst`, bursts up to `burst`
//! - No rate limit configured → `Unlimited`, which never blocks (but still respects cancellation)
//! - Holds no sockets, no files. Dropping the last `Arc` is the whole teardown. 🦆

use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::RateLimitConfig;
use crate::errors::ResolveError;

/// 🔗 How requests hold the budget. Identity matters: compare with `Arc::ptr_eq`.
pub type SharedRateBudget = Arc<RateBudget>;

/// 🚦 The job-wide throttle.
pub struct RateBudget {
    limiter: Limiter,
}

enum Limiter {
    /// 🏎️ No ceiling configured. The autobahn.
    Unlimited,
    Throttled {
        inner: DefaultDirectRateLimiter,
        burst: u32,
        period: Duration,
    },
}

impl RateBudget {
    /// 🏗️ Build the budget from the document's optional rate limit.
    ///
    /// `None` → unlimited. `Some` with a non-positive burst or period → `ConfigValidation`,
    /// and no limiter is constructed at all.
    pub fn derive(config: Option<&RateLimitConfig>) -> Result<Self, ResolveError> {
        let Some(config) = config else {
            debug!("🏎️ no rate limit configured, requests may go as fast as the network allows");
            return Ok(Self::unlimited());
        };

        let burst = config.validated_burst()?;
        let period = config.period;
        let cell_interval = period / burst;

        // -- validated_burst already guarantees a non-zero interval and burst, the Options are belt and braces
        let quota = Quota::with_period(cell_interval).ok_or_else(|| {
            ResolveError::invalid("rate_limit.period", "permit interval rounds down to zero")
        })?;
        let burst_nz = NonZeroU32::new(burst)
            .ok_or_else(|| ResolveError::invalid("rate_limit.burst", "must be positive"))?;

        debug!(
            burst,
            ?period,
            ?cell_interval,
            "🚦 rate budget derived: one permit every {:?}, bursts up to {}",
            cell_interval,
            burst
        );

        Ok(Self {
            limiter: Limiter::Throttled {
                inner: RateLimiter::direct(quota.allow_burst(burst_nz)),
                burst,
                period,
            },
        })
    }

    /// 🏎️ A budget that never says no.
    pub fn unlimited() -> Self {
        Self {
            limiter: Limiter::Unlimited,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self.limiter, Limiter::Unlimited)
    }

    /// 📊 Effective rate in permits per second. `f64::INFINITY` when unlimited.
    pub fn limit(&self) -> f64 {
        match &self.limiter {
            Limiter::Unlimited => f64::INFINITY,
            Limiter::Throttled { burst, period, .. } => f64::from(*burst) / period.as_secs_f64(),
        }
    }

    /// 📦 Configured burst. `0` when unlimited (there is nothing to burst *past*).
    pub fn burst(&self) -> u32 {
        match &self.limiter {
            Limiter::Unlimited => 0,
            Limiter::Throttled { burst, .. } => *burst,
        }
    }

    /// ⏱️ Configured period, if any.
    pub fn period(&self) -> Option<Duration> {
        match &self.limiter {
            Limiter::Unlimited => None,
            Limiter::Throttled { period, .. } => Some(*period),
        }
    }

    /// 🎟️ Wait for one permit.
    ///
    /// Safe to call from any number of tasks at once; the limiter does its own
    /// synchronization. Returns `Cancelled` if `cancel` is already fired or fires while waiting.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), ResolveError> {
        if cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }
        match &self.limiter {
            Limiter::Unlimited => Ok(()),
            Limiter::Throttled { inner, .. } => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        trace!("🛑 permit wait abandoned, caller cancelled");
                        Err(ResolveError::Cancelled)
                    }
                    _ = inner.until_ready() => Ok(()),
                }
            }
        }
    }

    /// 🎟️ Take a permit only if one is available right now.
    pub fn try_acquire(&self) -> bool {
        match &self.limiter {
            Limiter::Unlimited => true,
            Limiter::Throttled { inner, .. } => inner.check().is_ok(),
        }
    }
}

// -- 🎭 custom Debug because the governor's internals are a wall of atomics nobody asked to see
impl fmt::Debug for RateBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.limiter {
            Limiter::Unlimited => f.debug_struct("RateBudget").field("limit", &"unlimited").finish(),
            Limiter::Throttled { burst, period, .. } => f
                .debug_struct("RateBudget")
                .field("burst", burst)
                .field("period", period)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn budget(burst: i64, period: Duration) -> RateBudget {
        RateBudget::derive(Some(&RateLimitConfig::new(burst, period)))
            .expect("💀 A valid rate limit refused to become a budget.")
    }

    #[test]
    fn the_one_where_ten_per_second_means_ten_per_second() {
        let budget = budget(10, Duration::from_secs(1));
        assert_eq!(budget.burst(), 10);
        assert!((budget.limit() - 10.0).abs() < f64::EPSILON);
        assert_eq!(budget.period(), Some(Duration::from_secs(1)));
        assert!(!budget.is_unlimited());
    }

    #[test]
    fn the_one_where_no_config_means_no_brakes() {
        let budget = RateBudget::derive(None).expect("💀 Unlimited should never fail");
        assert!(budget.is_unlimited());
        assert!(budget.limit().is_infinite());
        assert_eq!(budget.burst(), 0);
        for _ in 0..10_000 {
            assert!(budget.try_acquire());
        }
    }

    #[test]
    fn the_one_where_bad_numbers_never_become_a_limiter() {
        for (burst, period) in [
            (0, Duration::from_secs(1)),
            (-1, Duration::from_secs(1)),
            (5, Duration::ZERO),
            (i64::from(u32::MAX) + 1, Duration::from_secs(1)),
        ] {
            match RateBudget::derive(Some(&RateLimitConfig::new(burst, period))) {
                Err(ResolveError::ConfigValidation { .. }) => {}
                other => panic!("💀 burst={burst} period={period:?} should be rejected, got {other:?}"),
            }
        }
    }

    #[test]
    fn the_one_where_the_burst_runs_out() {
        let budget = budget(3, Duration::from_secs(60));
        assert!(budget.try_acquire());
        assert!(budget.try_acquire());
        assert!(budget.try_acquire());
        assert!(!budget.try_acquire(), "💀 a fourth permit inside the window is a leak");
    }

    #[tokio::test]
    async fn the_one_where_acquire_waits_its_turn() {
        let budget = budget(1, Duration::from_millis(100));
        let token = CancellationToken::new();

        budget.acquire(&token).await.expect("💀 first permit should be free");
        let started = Instant::now();
        budget.acquire(&token).await.expect("💀 second permit should arrive eventually");
        assert!(
            started.elapsed() >= Duration::from_millis(50),
            "💀 the second permit showed up after {:?}, the bucket is leaking",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn the_one_where_concurrent_callers_share_one_bucket() {
        let budget = Arc::new(budget(2, Duration::from_secs(60)));
        let token = CancellationToken::new();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let budget = Arc::clone(&budget);
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                tokio::time::timeout(Duration::from_millis(200), budget.acquire(&token))
                    .await
                    .is_ok()
            }));
        }

        let mut granted = 0;
        for handle in handles {
            if handle.await.expect("💀 acquire task panicked") {
                granted += 1;
            }
        }
        assert_eq!(granted, 2, "💀 exactly the burst should get through, not one more");
    }

    #[tokio::test]
    async fn the_one_where_cancel_beats_the_wait() {
        let budget = budget(1, Duration::from_secs(3600));
        let token = CancellationToken::new();
        assert!(budget.try_acquire());

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let outcome = tokio::time::timeout(Duration::from_secs(5), budget.acquire(&token))
            .await
            .expect("💀 acquire ignored cancellation and sat there for an hour");
        assert!(matches!(outcome, Err(ResolveError::Cancelled)));
    }

    #[tokio::test]
    async fn the_one_where_unlimited_still_hears_the_cancel() {
        let budget = RateBudget::unlimited();
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(budget.acquire(&token).await, Err(ResolveError::Cancelled)));
    }
}
