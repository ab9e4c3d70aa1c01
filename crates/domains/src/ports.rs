//! # Core Traits (Ports)
//!
//! Any adapter must implement these traits to be used by the binary.
//! The services crate depends only on these contracts.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::error::Result;
use crate::models::{
    Appointment, AppointmentFilter, AppointmentStatus, AppointmentType, AvailabilityWindow,
    NotificationPayload, Patient, Principal, Proposal, Session, UserAccount,
};
use crate::time::DayOfWeek;

/// Weekly recurring opening windows.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait AvailabilityRepo: Send + Sync {
    /// All windows, optionally restricted to one weekday, active or not.
    async fn list_windows(&self, day: Option<DayOfWeek>) -> Result<Vec<AvailabilityWindow>>;
    async fn active_windows(&self, day: DayOfWeek) -> Result<Vec<AvailabilityWindow>>;
    async fn get_window(&self, id: Uuid) -> Result<Option<AvailabilityWindow>>;
    /// Inserts or replaces by id.
    async fn save_window(&self, window: AvailabilityWindow) -> Result<AvailabilityWindow>;
}

/// Bookable service definitions.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait AppointmentTypeRepo: Send + Sync {
    async fn get_type(&self, id: Uuid) -> Result<Option<AppointmentType>>;
    async fn list_types(&self) -> Result<Vec<AppointmentType>>;
    /// Inserts or replaces by id. Fails with `Conflict` when another type
    /// already uses the same name.
    async fn save_type(&self, appointment_type: AppointmentType) -> Result<AppointmentType>;
}

/// Appointment persistence, including the atomic booking primitive.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait AppointmentRepo: Send + Sync {
    /// Appointments on `date` whose status holds their slot.
    async fn holding_on(&self, date: NaiveDate) -> Result<Vec<Appointment>>;

    /// Rechecks overlap against slot-holding appointments on the same date
    /// and inserts in one serialized step. Fails with `Conflict` when taken.
    async fn insert_if_free(&self, appointment: Appointment) -> Result<Appointment>;

    async fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>>;

    /// Persists a new status. Moving into a slot-holding status from one that
    /// does not hold rechecks overlap under the same serialization as
    /// `insert_if_free`.
    async fn set_status(
        &self,
        id: Uuid,
        status: AppointmentStatus,
        at: DateTime<Utc>,
    ) -> Result<Appointment>;

    async fn set_handled_internally(&self, id: Uuid, flag: bool, at: DateTime<Utc>) -> Result<Appointment>;

    /// Removes the appointment and its proposal. `NotFound` when absent.
    async fn delete_appointment(&self, id: Uuid) -> Result<()>;

    /// Ordered by date, then start time.
    async fn list_appointments(&self, filter: AppointmentFilter) -> Result<Vec<Appointment>>;

    /// Replaces any earlier proposal for the same appointment.
    async fn save_proposal(&self, proposal: Proposal) -> Result<Proposal>;
    async fn get_proposal(&self, appointment_id: Uuid) -> Result<Option<Proposal>>;
}

#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait PatientRepo: Send + Sync {
    async fn get_patient(&self, id: Uuid) -> Result<Option<Patient>>;
    async fn find_patient_by_email(&self, email: &str) -> Result<Option<Patient>>;
    async fn save_patient(&self, patient: Patient) -> Result<Patient>;
}

/// Credential storage for login-capable accounts.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait AccountRepo: Send + Sync {
    async fn find_account_by_email(&self, email: &str) -> Result<Option<UserAccount>>;
    async fn save_account(&self, account: UserAccount) -> Result<UserAccount>;
}

/// Delivers patient-facing messages. Delivery retries are the sender's job.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_confirmed(&self, payload: &NotificationPayload) -> Result<()>;
    async fn send_cancelled(&self, payload: &NotificationPayload) -> Result<()>;
}

/// Fixed-window admission check for one protected surface.
///
/// `Ok(true)` admits, `Ok(false)` throttles. Implementations may be local to
/// the process or backed by a shared counter.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait RateLimit: Send + Sync {
    async fn check(&self, identifier: &str) -> Result<bool>;
}

/// Identity/session provider.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> Result<Session>;
    fn authenticate(&self, token: &str) -> Result<Principal>;
}

/// Wall clock, injected everywhere time matters.
#[cfg_attr(any(test, feature = "testing"), automock)]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}
