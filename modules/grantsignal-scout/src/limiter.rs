//! Request accounting and retry policy.
//!
//! The `RateLimiter` is the single owner of the minute/day counters and the
//! backoff state — no other call site reads or writes them. Many chunk tasks
//! call `try_acquire`/`record` concurrently; the mutex keeps increments
//! race-free.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::warn;

/// Window length for the per-minute counter.
const MINUTE_WINDOW: Duration = Duration::from_secs(60);

/// Outcome of one provider attempt, reported back to the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Throttled,
    QuotaExceeded,
}

/// What the caller may do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    /// Dispatch now; the request has been counted.
    Granted,
    /// Minute window is saturated — wait this long, then try again.
    Backoff(Duration),
    /// Day window is spent. Terminal for the rest of the run.
    Exhausted,
}

struct LimiterState {
    window_start: Instant,
    minute_count: u32,
    day_count: u32,
    backoff: Duration,
    day_exhausted: bool,
}

pub struct RateLimiter {
    minute_limit: u32,
    day_limit: u32,
    backoff_base: Duration,
    backoff_ceiling: Duration,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(
        minute_limit: u32,
        day_limit: u32,
        backoff_base: Duration,
        backoff_ceiling: Duration,
    ) -> Self {
        Self {
            minute_limit,
            day_limit,
            backoff_base,
            backoff_ceiling,
            state: Mutex::new(LimiterState {
                window_start: Instant::now(),
                minute_count: 0,
                day_count: 0,
                backoff: backoff_base,
                day_exhausted: false,
            }),
        }
    }

    /// Ask to dispatch one request. Saturating the minute window answers
    /// `Backoff` with the current wait, and the wait doubles (up to the
    /// ceiling) on each consecutive saturated ask. A granted permit resets
    /// the doubling.
    pub fn try_acquire(&self) -> Permit {
        let mut state = self.state.lock().expect("rate limiter mutex poisoned");

        if state.day_exhausted || state.day_count >= self.day_limit {
            if !state.day_exhausted {
                warn!(day_count = state.day_count, limit = self.day_limit, "Daily request quota exhausted");
                state.day_exhausted = true;
            }
            return Permit::Exhausted;
        }

        if state.window_start.elapsed() >= MINUTE_WINDOW {
            state.window_start = Instant::now();
            state.minute_count = 0;
        }

        if state.minute_count >= self.minute_limit {
            let wait = state.backoff;
            state.backoff = (state.backoff * 2).min(self.backoff_ceiling);
            warn!(wait_secs = wait.as_secs_f64(), "Minute request window saturated, backing off");
            return Permit::Backoff(wait);
        }

        state.minute_count += 1;
        state.day_count += 1;
        state.backoff = self.backoff_base;
        Permit::Granted
    }

    /// Report how a dispatched attempt went. Provider throttling doubles the
    /// backoff like a saturated window does; a provider quota signal ends the
    /// run's budget.
    pub fn record(&self, outcome: AttemptOutcome) {
        let mut state = self.state.lock().expect("rate limiter mutex poisoned");
        match outcome {
            AttemptOutcome::Success => {
                state.backoff = self.backoff_base;
            }
            AttemptOutcome::Throttled => {
                state.backoff = (state.backoff * 2).min(self.backoff_ceiling);
            }
            AttemptOutcome::QuotaExceeded => {
                state.day_exhausted = true;
            }
        }
    }

    pub fn is_exhausted(&self) -> bool {
        let state = self.state.lock().expect("rate limiter mutex poisoned");
        state.day_exhausted || state.day_count >= self.day_limit
    }

    pub fn requests_dispatched(&self) -> u32 {
        self.state
            .lock()
            .expect("rate limiter mutex poisoned")
            .day_count
    }
}

// ---------------------------------------------------------------------------
// RetryPolicy — reusable by any external-call path
// ---------------------------------------------------------------------------

/// Exponential backoff with jitter. `delay_for(0)` is the delay after the
/// first failed attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        let jitter_ms: u64 = rand::rng().random_range(0..=250);
        exp + Duration::from_millis(jitter_ms)
    }
}
