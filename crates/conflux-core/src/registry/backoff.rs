use std::time::Duration;

use crate::config::RegistrySettings;

/// Exponential reconnect delay, always within `[initial, max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    current: Duration,
    initial: Duration,
    max: Duration,
    factor: f64,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, factor: f64) -> Self {
        let max = max.max(initial);
        Self {
            current: initial,
            initial,
            max,
            factor: if factor.is_finite() && factor >= 1.0 {
                factor
            } else {
                1.0
            },
        }
    }

    pub fn from_settings(settings: &RegistrySettings) -> Self {
        Self::new(
            settings.initial_backoff,
            settings.max_backoff,
            settings.backoff_factor,
        )
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Grows the delay after a failed attempt.
    pub fn advance(&mut self) {
        let next = self.current.as_secs_f64() * self.factor;
        self.current = if next >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(next).clamp(self.initial, self.max)
        };
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
