//! Token bucket limiting the sustained dispatch rate while allowing bursts.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::error::SchedulerError;

/// Slack for floating-point refill error; a bucket this close to one token
/// counts as holding one.
const TOKEN_EPSILON: f64 = 1e-9;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    rate: f64,
    capacity: f64,
}

impl BucketState {
    fn refill(&mut self, now: Instant) {
        // Callers may race with an older `now`; never move time backwards.
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = elapsed.mul_add(self.rate, self.tokens).min(self.capacity);
        if now > self.last_refill {
            self.last_refill = now;
        }
    }
}

/// Token bucket rate limiter.
///
/// `tokens` stays within `[0, capacity]`. The `(tokens, last_refill)` pair is
/// only touched under a short-held mutex, so the limiter is safe to share
/// even though the coordinator is its only caller on the hot path.
#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
}

fn check_params(rate: f64, capacity: u32) -> Result<(), SchedulerError> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(SchedulerError::InvalidConfig(format!(
            "rate must be a positive finite number, got {rate}"
        )));
    }
    if capacity == 0 {
        return Err(SchedulerError::InvalidConfig(
            "burst capacity must be greater than 0".into(),
        ));
    }
    Ok(())
}

impl TokenBucket {
    /// Create a full bucket refilling at `rate` tokens per second up to `capacity`.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if `rate` is not a positive finite number or `capacity` is zero.
    pub fn new(rate: f64, capacity: u32) -> Result<Self, SchedulerError> {
        check_params(rate, capacity)?;
        let capacity = f64::from(capacity);
        Ok(Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
                rate,
                capacity,
            }),
        })
    }

    /// Take one token if available, otherwise report how long until one is.
    ///
    /// # Errors
    ///
    /// Returns the wait duration when the bucket is empty.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        self.try_acquire_at(Instant::now())
    }

    /// [`try_acquire`](Self::try_acquire) against an explicit clock reading.
    ///
    /// # Errors
    ///
    /// Returns the wait duration when the bucket is empty.
    pub fn try_acquire_at(&self, now: Instant) -> Result<(), Duration> {
        let mut state = self.state.lock();
        state.refill(now);
        if state.tokens + TOKEN_EPSILON >= 1.0 {
            state.tokens = (state.tokens - 1.0).max(0.0);
            return Ok(());
        }
        Err(Duration::try_from_secs_f64((1.0 - state.tokens) / state.rate).unwrap_or(Duration::MAX))
    }

    /// Block the calling thread until a token is available, then take it.
    pub fn acquire(&self) {
        while let Err(wait) = self.try_acquire() {
            std::thread::sleep(wait);
        }
    }

    /// Change rate and capacity without resetting accumulated tokens.
    ///
    /// Tokens are refilled at the old rate up to now, then clamped to the
    /// new capacity.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` under the same rules as [`new`](Self::new).
    pub fn update_rate(&self, rate: f64, capacity: u32) -> Result<(), SchedulerError> {
        check_params(rate, capacity)?;
        let mut state = self.state.lock();
        state.refill(Instant::now());
        state.rate = rate;
        state.capacity = f64::from(capacity);
        state.tokens = state.tokens.min(state.capacity);
        Ok(())
    }

    /// Tokens currently available (after refill).
    #[must_use]
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        state.refill(Instant::now());
        state.tokens
    }

    /// Current refill rate in tokens per second.
    #[must_use]
    pub fn rate(&self) -> f64 {
        self.state.lock().rate
    }

    /// Current capacity.
    #[must_use]
    pub fn capacity(&self) -> f64 {
        self.state.lock().capacity
    }
}
