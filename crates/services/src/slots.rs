//! # Slot Allocator
//!
//! Derives bookable slots for one date from the weekly availability windows
//! minus the intervals already held by appointments.
//!
//! Overlapping windows on the same weekday are merged into their union first,
//! then each range is walked in steps of the appointment duration. Windows
//! that merely touch are walked separately, so no slot straddles them. A proposed
//! slot survives if it fits inside the range, does not overlap any held
//! interval and does not start before "now" in clinic time.

use std::sync::Arc;

use chrono::NaiveDate;
use domains::{
    merge_ranges, parse_calendar_date, AppError, AppointmentRepo, AppointmentType,
    AppointmentTypeRepo, AvailabilityRepo, DayOfWeek, Result, Slot, TimeOfDay, TimeRange,
};
use tracing::debug;
use uuid::Uuid;

use crate::clinic::ClinicClock;

/// Pure slot generation.
///
/// `earliest_start` drops every slot starting before it. Output is ascending
/// by start time and pairwise non-overlapping.
pub fn generate_slots(
    windows: &[TimeRange],
    held: &[TimeRange],
    duration_minutes: u32,
    earliest_start: Option<TimeOfDay>,
) -> Vec<Slot> {
    let mut slots = Vec::new();
    if duration_minutes == 0 {
        return slots;
    }

    for window in merge_ranges(windows.to_vec()) {
        let mut start = window.start;
        while let Ok(candidate) = TimeRange::starting_at(start, duration_minutes) {
            if candidate.end > window.end {
                break;
            }
            let in_past = earliest_start.is_some_and(|earliest| candidate.start < earliest);
            if !in_past && !held.iter().any(|h| h.overlaps(&candidate)) {
                slots.push(candidate.into());
            }
            start = candidate.end;
        }
    }
    slots
}

/// Whether `requested` lies entirely inside one window, after overlapping
/// windows have been merged.
pub fn covered_by(windows: &[TimeRange], requested: &TimeRange) -> bool {
    merge_ranges(windows.to_vec())
        .iter()
        .any(|range| range.contains(requested))
}

pub struct SlotAllocator {
    availability: Arc<dyn AvailabilityRepo>,
    types: Arc<dyn AppointmentTypeRepo>,
    appointments: Arc<dyn AppointmentRepo>,
    clinic: ClinicClock,
}

impl SlotAllocator {
    pub fn new(
        availability: Arc<dyn AvailabilityRepo>,
        types: Arc<dyn AppointmentTypeRepo>,
        appointments: Arc<dyn AppointmentRepo>,
        clinic: ClinicClock,
    ) -> Self {
        Self {
            availability,
            types,
            appointments,
            clinic,
        }
    }

    /// Parses `date` as `YYYY-MM-DD`, then computes slots.
    pub async fn list_slots(&self, date: &str, appointment_type_id: Uuid) -> Result<Vec<Slot>> {
        let date = parse_calendar_date(date)?;
        self.compute_available_slots(date, appointment_type_id).await
    }

    pub async fn compute_available_slots(
        &self,
        date: NaiveDate,
        appointment_type_id: Uuid,
    ) -> Result<Vec<Slot>> {
        let appointment_type = self.active_type(appointment_type_id).await?;

        let windows = self.window_ranges(date).await?;
        if windows.is_empty() {
            debug!(%date, "no active availability for weekday");
            return Ok(Vec::new());
        }

        let held: Vec<TimeRange> = self
            .appointments
            .holding_on(date)
            .await?
            .iter()
            .map(|a| a.range())
            .collect();

        let slots = generate_slots(
            &windows,
            &held,
            appointment_type.duration_minutes,
            self.clinic.earliest_start_on(date),
        );
        debug!(%date, %appointment_type_id, slots = slots.len(), held = held.len(), "computed slots");
        Ok(slots)
    }

    /// Resolves an appointment type that is bookable right now.
    pub async fn active_type(&self, id: Uuid) -> Result<AppointmentType> {
        match self.types.get_type(id).await? {
            Some(t) if t.is_active => Ok(t),
            _ => Err(AppError::not_found("AppointmentType", id)),
        }
    }

    /// Fails with `Conflict` unless `requested` lies inside the active
    /// availability for `date`'s weekday.
    pub async fn ensure_within_availability(&self, date: NaiveDate, requested: &TimeRange) -> Result<()> {
        let windows = self.window_ranges(date).await?;
        if covered_by(&windows, requested) {
            Ok(())
        } else {
            Err(AppError::Conflict(format!(
                "{requested} on {date} is outside the opening hours"
            )))
        }
    }

    async fn window_ranges(&self, date: NaiveDate) -> Result<Vec<TimeRange>> {
        Ok(self
            .availability
            .active_windows(DayOfWeek::of(date))
            .await?
            .iter()
            .filter(|w| w.is_active)
            .map(|w| w.range())
            .collect())
    }
}
