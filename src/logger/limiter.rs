//! Token-bucket admission for logger sinks.

use std::time::Instant;

/// Rate limiter state for a single sink.
///
/// The bucket starts full so a burst right after startup is not penalised.
/// `allowance` is refilled in proportion to the time elapsed since the last
/// admission attempt and never exceeds the configured rate, so the sink can
/// emit at most `rate` lines per second over any window.
pub struct TokenBucket {
    allowance: f64,
    last_attempt: Instant,
    dropped: u64,
    last_report: Instant,
}

impl TokenBucket {
    pub fn new(rate: f64) -> Self {
        let now = Instant::now();
        Self {
            allowance: rate.max(0.0),
            last_attempt: now,
            dropped: 0,
            last_report: now,
        }
    }

    /// Refill for the elapsed time and try to take one token.
    ///
    /// Returns whether the caller may emit. A refused attempt is counted
    /// toward the next drop report. The rate is passed per call because it
    /// is a live config value.
    pub fn admit(&mut self, rate: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_attempt).as_secs_f64();
        self.last_attempt = now;

        self.allowance = (self.allowance + elapsed * rate).min(rate);

        if self.allowance >= 1.0 {
            self.allowance -= 1.0;
            true
        } else {
            self.dropped += 1;
            false
        }
    }

    /// Once per second, hand back the number of refusals since the last
    /// report. Returns `None` inside the report interval or when nothing
    /// was dropped.
    pub fn take_drop_report(&mut self) -> Option<u64> {
        if self.last_report.elapsed().as_secs_f64() <= 1.0 {
            return None;
        }

        self.last_report = Instant::now();

        if self.dropped == 0 {
            return None;
        }

        let count = self.dropped;
        self.dropped = 0;
        Some(count)
    }

    /// Refusals accumulated since the last report.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
