use std::time::{Duration, Instant};

use chrono::{DateTime, Local, NaiveDate, TimeZone};

/// The moment a capture is taken: local calendar date for the directory,
/// unix seconds for the file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureTime {
    pub date: NaiveDate,
    pub unix: i64,
}

impl CaptureTime {
    pub fn from_datetime<Tz: TimeZone>(dt: &DateTime<Tz>) -> Self {
        CaptureTime { date: dt.date_naive(), unix: dt.timestamp() }
    }
}

pub trait Clock {
    fn now(&self) -> CaptureTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> CaptureTime {
        CaptureTime::from_datetime(&Local::now())
    }
}

pub struct Timer {
    start: Instant
}

impl Timer {
    pub fn new() -> Self {
        Timer { start: Instant::now() }
    }

    pub fn mark(&self) -> Duration {
        self.start.elapsed()
    }
}
