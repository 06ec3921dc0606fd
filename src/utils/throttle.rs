//! Log throttling for per-frame failure paths
//!
//! The pipeline can hit the same failure dozens of times a second (viewer gone,
//! encoder starved). [`LogThrottler`] lets one message per key through each
//! interval and counts the rest, so the next emitted line can report how many
//! were swallowed.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug)]
struct KeyState {
    last_logged: Instant,
    suppressed: u64,
}

/// Per-key rate limiter for log lines
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use vision_rtc::utils::LogThrottler;
///
/// let throttler = LogThrottler::new(Duration::from_secs(5));
/// assert_eq!(throttler.check("push_failed"), Some(0));
/// assert_eq!(throttler.check("push_failed"), None);
/// ```
pub struct LogThrottler {
    keys: Mutex<HashMap<String, KeyState>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Returns `Some(suppressed)` when a line for `key` may be emitted now,
    /// where `suppressed` is the number of lines swallowed since the last one.
    pub fn check(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let mut keys = self.keys.lock();

        match keys.get_mut(key) {
            Some(state) if now.duration_since(state.last_logged) < self.interval => {
                state.suppressed += 1;
                None
            }
            Some(state) => {
                let suppressed = state.suppressed;
                state.last_logged = now;
                state.suppressed = 0;
                Some(suppressed)
            }
            None => {
                keys.insert(
                    key.to_string(),
                    KeyState {
                        last_logged: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
        }
    }

    pub fn should_log(&self, key: &str) -> bool {
        self.check(key).is_some()
    }

    /// Forget `key` so its next failure is logged immediately (call on recovery)
    pub fn clear(&self, key: &str) {
        self.keys.lock().remove(key);
    }

    pub fn clear_all(&self) {
        self.keys.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }
}

impl Default for LogThrottler {
    /// 5 second interval
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// Throttled `tracing::warn!`; adds a `suppressed` field with the swallowed count
///
/// ```rust
/// use vision_rtc::utils::LogThrottler;
/// use vision_rtc::warn_throttled;
///
/// let throttler = LogThrottler::default();
/// warn_throttled!(throttler, "push", "Push failed: {}", "track closed");
/// ```
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if let Some(suppressed) = $throttler.check($key) {
            tracing::warn!(suppressed, $($arg)*);
        }
    };
}

/// Throttled `tracing::error!`
#[macro_export]
macro_rules! error_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if let Some(suppressed) = $throttler.check($key) {
            tracing::error!(suppressed, $($arg)*);
        }
    };
}

/// Throttled `tracing::debug!`
#[macro_export]
macro_rules! debug_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if let Some(suppressed) = $throttler.check($key) {
            tracing::debug!(suppressed, $($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_first_call_passes() {
        let throttler = LogThrottler::with_secs(1);
        assert_eq!(throttler.check("k"), Some(0));
    }

    #[test]
    fn test_suppressed_count_reported() {
        let throttler = LogThrottler::new(Duration::from_millis(100));

        assert_eq!(throttler.check("k"), Some(0));
        assert_eq!(throttler.check("k"), None);
        assert_eq!(throttler.check("k"), None);

        thread::sleep(Duration::from_millis(150));

        assert_eq!(throttler.check("k"), Some(2));
        assert_eq!(throttler.check("k"), None);
    }

    #[test]
    fn test_keys_are_independent() {
        let throttler = LogThrottler::with_secs(10);
        assert!(throttler.should_log("a"));
        assert!(throttler.should_log("b"));
        assert!(!throttler.should_log("a"));
        assert_eq!(throttler.len(), 2);
    }

    #[test]
    fn test_clear() {
        let throttler = LogThrottler::with_secs(10);
        assert!(throttler.should_log("k"));
        assert!(!throttler.should_log("k"));

        throttler.clear("k");
        assert!(throttler.should_log("k"));

        throttler.clear_all();
        assert!(throttler.is_empty());
    }

    #[test]
    fn test_macros_expand() {
        let throttler = LogThrottler::default();
        warn_throttled!(throttler, "w", "warn {}", 1);
        error_throttled!(throttler, "e", "error {}", 2);
        debug_throttled!(throttler, "d", "debug {}", 3);
        assert_eq!(throttler.len(), 3);
    }
}
