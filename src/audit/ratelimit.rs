use std::time::{Duration, Instant};

/// How far behind schedule a limiter may fall before it stops catching up
const MAX_LAG: Duration = Duration::from_secs(1);

/// Paces work to a steady rate of units per second
///
/// Keeps a virtual clock of when the next unit may start; each call sleeps
/// until that point and advances it by the cost of the work. A limiter left
/// idle resets instead of bursting to catch up.
#[derive(Debug)]
pub struct RateLimiter {
    per_second: f64,
    next: Option<Instant>,
}

impl RateLimiter {
    /// Zero or negative rates disable limiting
    pub fn new(per_second: f64) -> Self {
        Self {
            per_second,
            next: None,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.per_second.is_nan() || self.per_second <= 0.0
    }

    /// Block until `amount` more units may proceed
    pub fn wait(&mut self, amount: u64) {
        if let Some(delay) = self.reserve(amount, Instant::now()) {
            std::thread::sleep(delay);
        }
    }

    /// Advance the schedule by `amount` units and return how long to sleep
    pub fn reserve(&mut self, amount: u64, now: Instant) -> Option<Duration> {
        if self.is_unlimited() {
            return None;
        }

        let scheduled = match self.next {
            Some(next) if next + MAX_LAG > now => next,
            _ => now,
        };
        self.next = Some(scheduled + Duration::from_secs_f64(amount as f64 / self.per_second));

        if scheduled > now {
            Some(scheduled - now)
        } else {
            None
        }
    }
}
