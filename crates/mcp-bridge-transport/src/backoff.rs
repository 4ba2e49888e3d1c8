//! Reconnection backoff policy.

use std::time::Duration;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectionOptions {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Ceiling for the computed delay.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub grow_factor: f64,
    /// Attempts before the transport gives up and closes.
    pub max_retries: u32,
}

impl Default for ReconnectionOptions {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            grow_factor: 1.5,
            max_retries: 2,
        }
    }
}

impl ReconnectionOptions {
    /// Backoff delay for the given attempt number (0-based):
    /// `min(initial_delay * grow_factor^attempt, max_delay)`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let millis = (self.initial_delay.as_millis() as f64
            * self.grow_factor.powi(attempt.min(i32::MAX as u32) as i32)) as u64;
        Duration::from_millis(millis).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_with_attempts() {
        let opts = ReconnectionOptions::default();
        assert_eq!(opts.delay_for(0), Duration::from_millis(1000));
        assert_eq!(opts.delay_for(1), Duration::from_millis(1500));
        assert_eq!(opts.delay_for(2), Duration::from_millis(2250));
    }

    #[test]
    fn delay_is_capped() {
        let opts = ReconnectionOptions::default();
        assert_eq!(opts.delay_for(50), Duration::from_millis(30_000));
    }
}
