//! # Domain Models
//!
//! These structs represent the core entities of the booking system.
//! Appointments own their time-window values; they reference patients and
//! appointment types by id only.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::time::{DayOfWeek, TimeOfDay, TimeRange};

/// One recurring weekly opening interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityWindow {
    pub id: Uuid,
    pub day_of_week: DayOfWeek,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub is_active: bool,
}

impl AvailabilityWindow {
    pub fn new(day_of_week: DayOfWeek, start_time: TimeOfDay, end_time: TimeOfDay) -> Result<Self> {
        TimeRange::new(start_time, end_time)?;
        Ok(Self {
            id: Uuid::new_v4(),
            day_of_week,
            start_time,
            end_time,
            is_active: true,
        })
    }

    pub fn range(&self) -> TimeRange {
        TimeRange {
            start: self.start_time,
            end: self.end_time,
        }
    }
}

/// A bookable service definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentType {
    pub id: Uuid,
    /// Unique across all types, active or not
    pub name: String,
    /// Length of one appointment in minutes; always positive
    pub duration_minutes: u32,
    pub description: Option<String>,
    pub is_active: bool,
}

impl AppointmentType {
    pub fn new(name: impl Into<String>, duration_minutes: u32, description: Option<String>) -> Result<Self> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(AppError::invalid("appointment type name must not be empty"));
        }
        if duration_minutes == 0 {
            return Err(AppError::invalid("appointment type duration must be positive"));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            name,
            duration_minutes,
            description,
            is_active: true,
        })
    }
}

/// Appointment workflow status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
    NoShow,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 5] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Cancelled,
        AppointmentStatus::Completed,
        AppointmentStatus::NoShow,
    ];

    /// Statuses that keep their interval reserved for no-double-booking.
    pub const HOLDING: [AppointmentStatus; 3] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Completed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Cancelled => "CANCELLED",
            Self::Completed => "COMPLETED",
            Self::NoShow => "NO_SHOW",
        }
    }

    pub fn holds_slot(self) -> bool {
        Self::HOLDING.contains(&self)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed | Self::NoShow)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Only the canonical upper-case names are accepted.
impl FromStr for AppointmentStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| AppError::invalid(format!("'{s}' is not an appointment status")))
    }
}

/// One scheduled or requested visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub appointment_type_id: Uuid,
    pub date: NaiveDate,
    pub start_time: TimeOfDay,
    /// Fixed at creation from the type's duration at that moment
    pub end_time: TimeOfDay,
    pub status: AppointmentStatus,
    /// Administratively resolved; independent of `status`
    pub handled_internally: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn range(&self) -> TimeRange {
        TimeRange {
            start: self.start_time,
            end: self.end_time,
        }
    }

    /// Whether `self` and `other` both reserve their interval and collide.
    pub fn clashes_with(&self, other: &Appointment) -> bool {
        self.id != other.id
            && self.date == other.date
            && self.status.holds_slot()
            && other.status.holds_slot()
            && self.range().overlaps(&other.range())
    }
}

/// An alternative time offered by an administrator for an appointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub date: NaiveDate,
    pub start_time: TimeOfDay,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

/// A concrete bookable interval on a specific date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
}

impl From<TimeRange> for Slot {
    fn from(range: TimeRange) -> Self {
        Self {
            start_time: range.start,
            end_time: range.end,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Patient,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Patient => "PATIENT",
        }
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ADMIN" => Ok(Self::Admin),
            "PATIENT" => Ok(Self::Patient),
            other => Err(AppError::invalid(format!("'{other}' is not a role"))),
        }
    }
}

/// The authenticated caller as supplied by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub user_id: Uuid,
    pub role: Role,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// A login-capable account. Patients' account ids equal their patient ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAccount {
    pub id: Uuid,
    pub email: String,
    /// PHC-format Argon2 hash
    pub password_hash: String,
    pub role: Role,
}

/// Returned by a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub principal: Principal,
    pub expires_at: DateTime<Utc>,
}

/// Administrative listing filter; `None` fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub statuses: Option<Vec<AppointmentStatus>>,
    pub handled_internally: Option<bool>,
    pub patient_id: Option<Uuid>,
}

impl AppointmentFilter {
    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.from.map_or(true, |from| appointment.date >= from)
            && self.to.map_or(true, |to| appointment.date <= to)
            && self
                .statuses
                .as_ref()
                .map_or(true, |set| set.contains(&appointment.status))
            && self
                .handled_internally
                .map_or(true, |flag| appointment.handled_internally == flag)
            && self.patient_id.map_or(true, |id| appointment.patient_id == id)
    }
}

/// What the notification sender needs to tell a patient about a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub patient_name: String,
    pub patient_email: String,
    /// Human-readable, e.g. "Monday, 19 October 2026"
    pub date: String,
    /// Human-readable, e.g. "08:30"
    pub time: String,
    pub appointment_type_name: String,
    pub provider_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn appointment(date: NaiveDate, start: &str, end: &str, status: AppointmentStatus) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            appointment_type_id: Uuid::new_v4(),
            date,
            start_time: start.parse().unwrap(),
            end_time: end.parse().unwrap(),
            status,
            handled_internally: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn status_parsing_is_exact() {
        assert_eq!("NO_SHOW".parse::<AppointmentStatus>().unwrap(), AppointmentStatus::NoShow);
        assert!(matches!(
            "BOGUS".parse::<AppointmentStatus>(),
            Err(AppError::InvalidInput(_))
        ));
        assert!("confirmed".parse::<AppointmentStatus>().is_err());
    }

    #[test]
    fn status_serializes_as_screaming_case() {
        let json = serde_json::to_string(&AppointmentStatus::NoShow).unwrap();
        assert_eq!(json, "\"NO_SHOW\"");
    }

    #[test]
    fn cancelled_appointments_do_not_clash() {
        let day = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let held = appointment(day, "08:00", "08:30", AppointmentStatus::Confirmed);
        let cancelled = appointment(day, "08:00", "08:30", AppointmentStatus::Cancelled);
        let pending = appointment(day, "08:15", "08:45", AppointmentStatus::Pending);
        assert!(!held.clashes_with(&cancelled));
        assert!(held.clashes_with(&pending));
        assert!(!held.clashes_with(&held));
    }

    #[test]
    fn appointment_type_rejects_zero_duration() {
        assert!(AppointmentType::new("Checkup", 0, None).is_err());
        assert!(AppointmentType::new("  ", 30, None).is_err());
        assert_eq!(AppointmentType::new(" Checkup ", 30, None).unwrap().name, "Checkup");
    }

    #[test]
    fn filter_combines_constraints() {
        let day = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let a = appointment(day, "08:00", "08:30", AppointmentStatus::Pending);
        let filter = AppointmentFilter {
            from: Some(day),
            to: Some(day),
            statuses: Some(vec![AppointmentStatus::Pending]),
            handled_internally: Some(false),
            patient_id: None,
        };
        assert!(filter.matches(&a));
        let handled = AppointmentFilter {
            handled_internally: Some(true),
            ..AppointmentFilter::default()
        };
        assert!(!handled.matches(&a));
    }
}
