//! Reconnect policy with full-jitter exponential back-off.

use std::time::Duration;

/// Controls how a session driver reconnects after a transport drop.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    /// Delay ceiling for the first attempt.
    pub initial_delay: Duration,
    /// Cap on the un-jittered delay.
    pub max_delay: Duration,
    /// Consecutive failures before the driver surfaces `fatal`.
    pub max_attempts: u32,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

impl ReconnectBackoff {
    /// Compute the delay for the given attempt number (0-indexed).
    ///
    /// Full jitter: uniform in `[0, min(max_delay, initial * 2^attempt)]`,
    /// which spreads reconnect storms better than fixed-percentage jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let ceiling_ms = (base_ms * 2f64.powi(attempt.min(16) as i32))
            .min(self.max_delay.as_millis() as f64);
        let jittered = ceiling_ms * pseudo_random_fraction(attempt);
        Duration::from_millis(jittered as u64)
    }

    pub fn should_give_up(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

/// Cheap deterministic "random" fraction [0, 1) seeded by attempt number
/// and process-local time. Not cryptographic — just storm spreading.
fn pseudo_random_fraction(attempt: u32) -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let hash = attempt
        .wrapping_mul(2654435761)
        .wrapping_add(nanos.wrapping_mul(40503));
    (hash as f64) / (u32::MAX as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_never_exceeds_cap() {
        let policy = ReconnectBackoff::default();
        for attempt in 0..20 {
            assert!(policy.delay_for_attempt(attempt) <= Duration::from_secs(30));
        }
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let policy = ReconnectBackoff::default();
        assert!(!policy.should_give_up(9));
        assert!(policy.should_give_up(10));
    }

    #[test]
    fn early_attempts_stay_under_their_ceiling() {
        let policy = ReconnectBackoff::default();
        // Attempt 0 ceiling is the 1s initial delay.
        assert!(policy.delay_for_attempt(0) <= Duration::from_secs(1));
        // Attempt 2 ceiling is 4s.
        assert!(policy.delay_for_attempt(2) <= Duration::from_secs(4));
    }
}
