use std::time::Duration;

/// Delay policy the retry worker applies after a transient failure.
///
/// The queue itself never picks a delay; this lives with the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// `base * 2^(attempt - 1)`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Fixed(Duration::from_secs(60))
    }
}

impl Backoff {
    /// Delay before attempt number `attempt` (1-based) becomes due.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => {
                if attempt == 0 {
                    return Duration::ZERO;
                }
                2u32.checked_pow(attempt - 1)
                    .and_then(|factor| base.checked_mul(factor))
                    .map_or(max, |delay| delay.min(max))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_backoff_ignores_attempt() {
        let backoff = Backoff::Fixed(Duration::from_secs(5));
        assert_eq!(backoff.delay_for(1), Duration::from_secs(5));
        assert_eq!(backoff.delay_for(40), Duration::from_secs(5));
    }

    #[test]
    fn exponential_backoff_doubles_then_caps() {
        let backoff = Backoff::Exponential {
            base: Duration::from_secs(2),
            max: Duration::from_secs(30),
        };
        assert_eq!(backoff.delay_for(1), Duration::from_secs(2));
        assert_eq!(backoff.delay_for(2), Duration::from_secs(4));
        assert_eq!(backoff.delay_for(4), Duration::from_secs(16));
        assert_eq!(backoff.delay_for(5), Duration::from_secs(30));
        // 2^40 overflows u32 and must still clamp.
        assert_eq!(backoff.delay_for(41), Duration::from_secs(30));
    }
}
