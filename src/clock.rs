use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};

/// Time source for the timed state machines (sync debouncing, persistence
/// scheduling, presence expiry, room grace periods). Injected so transitions
/// are testable on literal timestamps without wall-clock waits.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Start at the given epoch offset in milliseconds.
    pub fn at_millis(ms: i64) -> Self {
        Self {
            now: Arc::new(Mutex::new(Utc.timestamp_millis_opt(ms).unwrap())),
        }
    }

    pub fn advance_millis(&self, ms: i64) {
        let mut now = self.now.lock().unwrap();
        *now = *now + Duration::milliseconds(ms);
    }

    pub fn set_millis(&self, ms: i64) {
        let mut now = self.now.lock().unwrap();
        *now = Utc.timestamp_millis_opt(ms).unwrap();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
