use std::time::Duration;

/// Reconnection delay for the given attempt: `attempt × increment`, capped
/// at `max`. Attempt counting starts at 1; a zeroth attempt waits nothing.
pub fn delay(attempt: u32, increment: Duration, max: Duration) -> Duration {
    let raw = increment.saturating_mul(attempt);
    if raw > max { max } else { raw }
}

#[cfg(test)]
mod tests {
    use super::delay;
    use std::time::Duration;

    #[test]
    fn test_delay_grows_linearly() {
        let increment = Duration::from_millis(500);
        let max = Duration::from_secs(10);
        assert_eq!(delay(0, increment, max), Duration::ZERO);
        assert_eq!(delay(1, increment, max), Duration::from_millis(500));
        assert_eq!(delay(2, increment, max), Duration::from_millis(1000));
        assert_eq!(delay(3, increment, max), Duration::from_millis(1500));
    }

    #[test]
    fn test_delay_is_nondecreasing_and_capped() {
        let increment = Duration::from_millis(700);
        let max = Duration::from_secs(3);
        let mut previous = Duration::ZERO;
        for attempt in 0..50 {
            let d = delay(attempt, increment, max);
            assert!(d >= previous);
            assert!(d <= max);
            previous = d;
        }
        assert_eq!(delay(49, increment, max), max);
    }
}
