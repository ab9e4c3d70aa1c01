//! Local clinic time.
//!
//! "Today" and "in the past" are judged on the clinic's wall clock, which is
//! the injected UTC clock shifted by a fixed offset.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, Utc};
use domains::{AppError, Clock, Result, TimeOfDay};

#[derive(Clone)]
pub struct ClinicClock {
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
}

impl ClinicClock {
    pub fn new(clock: Arc<dyn Clock>, utc_offset_minutes: i32) -> Result<Self> {
        let offset = utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| AppError::invalid(format!("UTC offset of {utc_offset_minutes} minutes")))?;
        Ok(Self { clock, offset })
    }

    pub fn utc(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            offset: Utc.fix(),
        }
    }

    pub fn now_utc(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn now_local(&self) -> NaiveDateTime {
        self.clock.now().with_timezone(&self.offset).naive_local()
    }

    pub fn today(&self) -> NaiveDate {
        self.now_local().date()
    }

    /// Earliest start time still bookable on `date`.
    ///
    /// `None` when the whole day lies ahead; `24:00` when it is already over.
    pub fn earliest_start_on(&self, date: NaiveDate) -> Option<TimeOfDay> {
        let now = self.now_local();
        if date > now.date() {
            None
        } else if date == now.date() {
            Some(TimeOfDay::ceil_from(now.time()))
        } else {
            Some(TimeOfDay::END_OF_DAY)
        }
    }
}
