use std::time::Duration;

/// `base * 2^attempt`, saturating.
pub fn exponential(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.min(16))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubling() {
        let base = Duration::from_secs(5);
        assert_eq!(exponential(base, 0), Duration::from_secs(5));
        assert_eq!(exponential(base, 1), Duration::from_secs(10));
        assert_eq!(exponential(base, 2), Duration::from_secs(20));
    }

    #[test]
    fn test_large_attempt_does_not_overflow() {
        let d = exponential(Duration::from_secs(u64::MAX / 2), 40);
        assert_eq!(d, Duration::MAX);
    }
}
