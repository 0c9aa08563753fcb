use chrono::{DateTime, Utc};
use obconsent_application::Clock;

/// Wall clock backed by the operating system time in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
