use log::warn;

/// Caps how often a single property may write to its store.
///
/// Time is the transport's server clock in seconds, so peers with skewed
/// local clocks still agree on send spacing.
#[derive(Debug, Clone)]
pub struct SendRateLimiter {
    min_interval: Option<f64>,
    last_send_time: Option<f64>,
    total_sends: u64,
    total_deferred: u64,
}

impl SendRateLimiter {
    pub fn unlimited() -> Self {
        Self {
            min_interval: None,
            last_send_time: None,
            total_sends: 0,
            total_deferred: 0,
        }
    }

    pub fn new(sends_per_second: Option<f64>) -> Self {
        let mut limiter = Self::unlimited();
        limiter.set_limit(sends_per_second);
        limiter
    }

    /// `None` (or a non-positive rate) removes the cap.
    pub fn set_limit(&mut self, sends_per_second: Option<f64>) {
        self.min_interval = match sends_per_second {
            Some(rate) if rate > 0.0 && rate.is_finite() => Some(1.0 / rate),
            Some(rate) => {
                warn!("Ignoring invalid send limit of {} per second", rate);
                None
            }
            None => None,
        };
    }

    pub fn sends_per_second(&self) -> Option<f64> {
        self.min_interval.map(|interval| 1.0 / interval)
    }

    /// Whether a send at `server_time` fits the budget. Does not record it.
    pub fn check(&self, server_time: f64) -> bool {
        match (self.min_interval, self.last_send_time) {
            (Some(interval), Some(last)) => server_time - last >= interval,
            _ => true,
        }
    }

    pub fn record_send(&mut self, server_time: f64) {
        self.last_send_time = Some(server_time);
        self.total_sends += 1;
    }

    pub fn record_deferral(&mut self) {
        self.total_deferred += 1;
    }

    pub fn last_send_time(&self) -> Option<f64> {
        self.last_send_time
    }

    pub fn reset(&mut self) {
        self.last_send_time = None;
    }

    pub fn get_stats(&self) -> SendLimitStats {
        SendLimitStats {
            total_sends: self.total_sends,
            total_deferred: self.total_deferred,
            last_send_time: self.last_send_time,
        }
    }
}

impl Default for SendRateLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendLimitStats {
    pub total_sends: u64,
    pub total_deferred: u64,
    pub last_send_time: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_always_allows() {
        let mut limiter = SendRateLimiter::unlimited();
        for i in 0..100 {
            let now = i as f64 * 0.001;
            assert!(limiter.check(now));
            limiter.record_send(now);
        }
        assert_eq!(limiter.get_stats().total_sends, 100);
    }

    #[test]
    fn test_limit_spacing() {
        let mut limiter = SendRateLimiter::new(Some(10.0));

        assert!(limiter.check(0.0));
        limiter.record_send(0.0);

        assert!(!limiter.check(0.05));
        assert!(limiter.check(0.1));
    }

    #[test]
    fn test_limit_over_one_second() {
        let mut limiter = SendRateLimiter::new(Some(5.0));
        let mut sent = 0;

        for tick in 0..60 {
            let now = tick as f64 / 60.0;
            if limiter.check(now) {
                limiter.record_send(now);
                sent += 1;
            } else {
                limiter.record_deferral();
            }
        }

        assert!(sent <= 5);
        assert!(sent >= 4);
        assert_eq!(limiter.get_stats().total_deferred, 60 - sent as u64);
    }

    #[test]
    fn test_invalid_limit_means_unlimited() {
        let limiter = SendRateLimiter::new(Some(0.0));
        assert_eq!(limiter.sends_per_second(), None);
        assert!(limiter.check(0.0));
    }

    #[test]
    fn test_reset() {
        let mut limiter = SendRateLimiter::new(Some(1.0));
        limiter.record_send(10.0);
        assert!(!limiter.check(10.5));

        limiter.reset();
        assert!(limiter.check(10.5));
    }
}
