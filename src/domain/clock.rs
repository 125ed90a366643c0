use chrono::{NaiveDateTime, NaiveTime, TimeDelta};
use std::sync::{Arc, Mutex};

/// Host wall clock, local time.
pub trait Clock: Send {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Settable clock shared between a test and the code under test.
#[derive(Debug, Clone)]
pub struct FixedClock {
    now: Arc<Mutex<NaiveDateTime>>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, delta: TimeDelta) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += delta;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Attach a device time-of-day to the host calendar date.
///
/// The device only reports hour/minute/second/centisecond. When the device
/// time is more than 12 h ahead of the host, the frame belongs to the
/// previous day; more than 12 h behind, to the next one.
pub fn anchor_time_of_day(host_now: NaiveDateTime, device_time: NaiveTime) -> NaiveDateTime {
    let half_day = TimeDelta::hours(12);
    let candidate = host_now.date().and_time(device_time);
    let offset = candidate - host_now;
    if offset > half_day {
        candidate - TimeDelta::days(1)
    } else if offset < -half_day {
        candidate + TimeDelta::days(1)
    } else {
        candidate
    }
}
