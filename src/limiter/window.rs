//! Sliding-window call log for one `(provider, service)` pair.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::{Admission, RateLimitConfig};

/// Recent call instants, oldest first.
#[derive(Debug, Default)]
pub struct RateLimitWindow {
    calls: VecDeque<Instant>,
}

impl RateLimitWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prune calls older than the window, then admit or deny a call at `now`.
    ///
    /// An admitted call is recorded; a denied one is not.
    pub fn admit_at(&mut self, now: Instant, config: &RateLimitConfig) -> Admission {
        while let Some(&oldest) = self.calls.front() {
            if now.saturating_duration_since(oldest) >= config.window {
                self.calls.pop_front();
            } else {
                break;
            }
        }

        if self.calls.len() >= config.calls_per_second as usize
            && let Some(&oldest) = self.calls.front()
        {
            return Admission::Denied {
                retry_after: remaining(config.window, now.saturating_duration_since(oldest)),
            };
        }

        let in_burst = self
            .calls
            .iter()
            .rev()
            .take_while(|&&t| now.saturating_duration_since(t) < config.burst_window)
            .count();
        if in_burst >= config.burst as usize {
            // Oldest call still inside the burst sub-window.
            let oldest_in_burst = self.calls[self.calls.len() - in_burst];
            return Admission::Denied {
                retry_after: remaining(
                    config.burst_window,
                    now.saturating_duration_since(oldest_in_burst),
                ),
            };
        }

        self.calls.push_back(now);
        Admission::Allowed
    }

    /// Calls recorded inside the window ending at `now`.
    pub fn count_at(&self, now: Instant, window: Duration) -> usize {
        self.calls
            .iter()
            .filter(|&&t| now.saturating_duration_since(t) < window)
            .count()
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }
}

/// Time left until a call of age `age` leaves a window of length `window`.
/// Never zero, so a denial always carries a positive wait.
fn remaining(window: Duration, age: Duration) -> Duration {
    window
        .saturating_sub(age)
        .max(Duration::from_micros(1))
}
