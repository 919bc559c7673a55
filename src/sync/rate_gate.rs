use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use strum_macros::{Display, EnumString};
use tokio::time::Instant;
use tracing::debug;

use crate::config::schema::RateLimits;
use crate::sync::metrics::SyncMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum RateBucket {
    // Data operations: uploads, job starts and polls, entity creation
    General,
    // Column metadata queries, which the service throttles far more aggressively
    Metadata,
}

/// `permits` tokens replenished every `per`. Zero permits means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rate {
    pub permits: u32,
    pub per: Duration,
}

impl Rate {
    pub const UNLIMITED: Rate = Rate {
        permits: 0,
        per: Duration::from_secs(1),
    };

    pub fn per_second(permits: u32) -> Self {
        Self {
            permits,
            per: Duration::from_secs(1),
        }
    }

    pub fn per_minute(permits: u32) -> Self {
        Self {
            permits,
            per: Duration::from_secs(60),
        }
    }

    fn is_unlimited(&self) -> bool {
        self.permits == 0 || self.per.is_zero()
    }

    fn permits_per_second(&self) -> f64 {
        f64::from(self.permits) / self.per.as_secs_f64()
    }
}

// Classic token bucket: tokens refill continuously at the configured rate, up
// to one second's worth (and never less than a single token).
#[derive(Debug)]
struct TokenBucket {
    rate: Rate,
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(rate: Rate, now: Instant) -> Self {
        let capacity = Self::capacity_for(rate);
        Self {
            rate,
            capacity,
            tokens: capacity,
            last_refill: now,
        }
    }

    fn capacity_for(rate: Rate) -> f64 {
        if rate.is_unlimited() {
            0.0
        } else {
            rate.permits_per_second().max(1.0)
        }
    }

    // Take a token, or report how long until one is available
    fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        if self.rate.is_unlimited() {
            return Ok(());
        }
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(
                missing / self.rate.permits_per_second(),
            ))
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens =
            (self.tokens + elapsed * self.rate.permits_per_second()).min(self.capacity);
        self.last_refill = now;
    }

    fn set_rate(&mut self, rate: Rate, now: Instant) {
        if !self.rate.is_unlimited() {
            self.refill(now);
        }
        let was_unlimited = self.rate.is_unlimited();
        self.rate = rate;
        self.capacity = Self::capacity_for(rate);
        self.tokens = if was_unlimited {
            self.capacity
        } else {
            self.tokens.min(self.capacity)
        };
        self.last_refill = now;
    }
}

/// Process-wide throttle for outbound calls to the remote service. Each
/// bucket is an independent token bucket; the rates can be changed while the
/// gate is in use.
#[derive(Debug)]
pub struct RateGate {
    buckets: Mutex<HashMap<RateBucket, TokenBucket>>,
}

impl Default for RateGate {
    fn default() -> Self {
        Self::new(&RateLimits::default())
    }
}

impl RateGate {
    pub fn new(limits: &RateLimits) -> Self {
        Self::with_rates([
            (RateBucket::General, Rate::per_second(limits.general_per_second)),
            (
                RateBucket::Metadata,
                Rate::per_minute(limits.metadata_per_minute),
            ),
        ])
    }

    pub fn with_rates(rates: impl IntoIterator<Item = (RateBucket, Rate)>) -> Self {
        let now = Instant::now();
        let buckets = rates
            .into_iter()
            .map(|(bucket, rate)| (bucket, TokenBucket::new(rate, now)))
            .collect();
        Self {
            buckets: Mutex::new(buckets),
        }
    }

    pub fn unlimited() -> Self {
        Self::with_rates([
            (RateBucket::General, Rate::UNLIMITED),
            (RateBucket::Metadata, Rate::UNLIMITED),
        ])
    }

    /// Wait until a token for `bucket` is available and take it. A bucket that
    /// was never configured doesn't throttle.
    pub async fn acquire(&self, bucket: RateBucket) {
        let started = Instant::now();
        loop {
            let wait = {
                let mut buckets = self.buckets.lock();
                match buckets.get_mut(&bucket) {
                    Some(token_bucket) => token_bucket.try_acquire(Instant::now()),
                    None => Ok(()),
                }
            };

            match wait {
                Ok(()) => break,
                Err(wait) => {
                    debug!("Rate gate {bucket}: waiting {wait:?} for a token");
                    tokio::time::sleep(wait).await;
                }
            }
        }

        SyncMetrics::rate_gate_wait(bucket, started.elapsed().as_secs_f64());
    }

    pub fn set_rate(&self, bucket: RateBucket, rate: Rate) {
        let now = Instant::now();
        self.buckets
            .lock()
            .entry(bucket)
            .and_modify(|b| b.set_rate(rate, now))
            .or_insert_with(|| TokenBucket::new(rate, now));
    }

    pub fn rate(&self, bucket: RateBucket) -> Option<Rate> {
        self.buckets.lock().get(&bucket).map(|b| b.rate)
    }
}
