//! Time source for snapshot timestamps and environment file names

use std::time::{Instant, SystemTime};

use chrono::{DateTime, Utc};

/// Clock trait for testable time
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn now_utc(&self) -> SystemTime;
}

/// Real system clock
#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
    fn now_utc(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Format SystemTime as ISO8601 UTC timestamp
pub fn format_timestamp(time: SystemTime) -> String {
    let datetime: DateTime<Utc> = time.into();
    datetime.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Second-resolution stamp embedded in file names: `YYYYMMDD_HHMMSS`
pub fn file_stamp(time: SystemTime) -> String {
    let datetime: DateTime<Utc> = time.into();
    datetime.format("%Y%m%d_%H%M%S").to_string()
}

/// Controllable clock for tests
#[derive(Debug, Clone)]
pub struct ManualClock {
    instant: std::sync::Arc<std::sync::Mutex<Instant>>,
    system_time: std::sync::Arc<std::sync::Mutex<SystemTime>>,
}

impl ManualClock {
    pub fn at(system_time: SystemTime) -> Self {
        Self {
            instant: std::sync::Arc::new(std::sync::Mutex::new(Instant::now())),
            system_time: std::sync::Arc::new(std::sync::Mutex::new(system_time)),
        }
    }

    pub fn advance(&self, duration: std::time::Duration) {
        *self.instant.lock().unwrap_or_else(|e| e.into_inner()) += duration;
        *self.system_time.lock().unwrap_or_else(|e| e.into_inner()) += duration;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.instant.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn now_utc(&self) -> SystemTime {
        *self.system_time.lock().unwrap_or_else(|e| e.into_inner())
    }
}
