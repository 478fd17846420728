use std::time::{Duration, Instant};

use crate::error::ZabError;

/// Fixed-window failure counter used as a circuit breaker by the workers.
///
/// Timestamps come from `Instant`, so wall-clock jumps neither expire nor
/// prolong recorded errors.
#[derive(Debug)]
pub struct RollingErrorCounter {
    duration: Duration,
    tolerance: u32,
    errors: Vec<Instant>,
}

impl RollingErrorCounter {
    /// A zero window is refused; negative inputs are unrepresentable.
    pub fn new(duration: Duration, tolerance: u32) -> Result<Self, ZabError> {
        if duration.is_zero() {
            return Err(ZabError::Config(
                "rolling error counter duration must be positive".to_string(),
            ));
        }
        Ok(RollingErrorCounter {
            duration,
            tolerance,
            errors: Vec::new(),
        })
    }

    /// Records an error at the current instant.
    pub fn add(&mut self) {
        self.errors.push(Instant::now());
    }

    /// Drops entries older than the window and returns how many remain.
    pub fn count(&mut self) -> usize {
        let cutoff = Instant::now().checked_sub(self.duration);
        if let Some(cutoff) = cutoff {
            self.errors.retain(|stamp| *stamp > cutoff);
        }
        self.errors.len()
    }

    pub fn tolerance_exceeded(&mut self) -> bool {
        self.count() > self.tolerance as usize
    }

    pub fn reset(&mut self) {
        self.errors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init() {
        let mut rec = RollingErrorCounter::new(Duration::from_secs(60), 5).unwrap();
        assert_eq!(rec.count(), 0);
        assert!(!rec.tolerance_exceeded());
    }

    #[test]
    fn init_zero_duration_is_refused() {
        let err = RollingErrorCounter::new(Duration::ZERO, 5).unwrap_err();
        assert!(err.to_string().contains("duration"));
    }

    #[test]
    fn add_records_monotonic_timestamps() {
        let mut rec = RollingErrorCounter::new(Duration::from_secs(60), 5).unwrap();
        rec.add();
        std::thread::sleep(Duration::from_millis(10));
        rec.add();
        assert_eq!(rec.errors.len(), 2);
        assert!(rec.errors[0] < rec.errors[1]);
    }

    #[test]
    fn count_expires_old_entries() {
        let mut rec = RollingErrorCounter::new(Duration::from_millis(30), 5).unwrap();
        for expected in 1..=4 {
            rec.add();
            assert_eq!(rec.count(), expected);
        }
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(rec.count(), 0);
    }

    #[test]
    fn count_is_rolling() {
        // Short windows are flaky in CI, so use a generous one and sleep
        // double the duration before adding the fresh entry.
        let mut rec = RollingErrorCounter::new(Duration::from_millis(50), 5).unwrap();
        rec.add();
        rec.add();
        assert_eq!(rec.count(), 2);
        std::thread::sleep(Duration::from_millis(100));
        rec.add();
        assert_eq!(rec.count(), 1);
    }

    #[test]
    fn tolerance_exceeded_and_reset() {
        let mut rec = RollingErrorCounter::new(Duration::from_secs(60), 5).unwrap();
        assert!(!rec.tolerance_exceeded());
        for _ in 0..6 {
            rec.add();
        }
        assert_eq!(rec.count(), 6);
        assert!(rec.tolerance_exceeded());

        rec.reset();
        assert_eq!(rec.count(), 0);
        assert!(!rec.tolerance_exceeded());
    }

    #[test]
    fn tolerance_zero_trips_on_first_error() {
        let mut rec = RollingErrorCounter::new(Duration::from_secs(60), 0).unwrap();
        assert!(!rec.tolerance_exceeded());
        rec.add();
        assert!(rec.tolerance_exceeded());
    }
}
