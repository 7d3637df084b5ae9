use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};

/// Offset of the clinic's local time (Indochina Time, UTC+7).
///
/// Calendar dates ("is this booking in the past?") and gateway timestamps
/// are both evaluated in this zone.
pub const CLINIC_UTC_OFFSET_SECONDS: i32 = 7 * 3600;

pub fn clinic_offset() -> FixedOffset {
    FixedOffset::east_opt(CLINIC_UTC_OFFSET_SECONDS).unwrap_or(Utc.fix())
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// The current calendar date at the clinic.
    fn today(&self) -> NaiveDate {
        self.now().with_timezone(&clinic_offset()).date_naive()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to one instant, for tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    instant: DateTime<Utc>,
}

impl FixedClock {
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self { instant }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.instant
    }
}
