use chrono::{DateTime, Local};

pub const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
pub const FEEDBACK_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Second-resolution stamp shared by an upload and its prediction.
pub fn stamp(at: &DateTime<Local>) -> String {
    at.format(STAMP_FORMAT).to_string()
}
