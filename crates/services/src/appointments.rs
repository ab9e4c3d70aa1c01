//! # Appointment State Machine
//!
//! Creation revalidates the requested interval at insert time through the
//! store's atomic `insert_if_free`; listing slots earlier proves nothing.
//!
//! Status changes persist first and notify second. A failed notification is
//! logged and reported as a degraded outcome, never rolled back.

use std::sync::Arc;

use chrono::NaiveDate;
use domains::{
    AppError, Appointment, AppointmentFilter, AppointmentRepo, AppointmentStatus,
    AppointmentTypeRepo, Notifier, PatientRepo, Proposal, Result, TimeOfDay, TimeRange,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::clinic::ClinicClock;
use crate::notification::{build_payload, NotificationKind, NotificationOutcome};
use crate::slots::SlotAllocator;

/// Which status changes an administrator may make.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPolicy {
    /// Any status to any status, as long as the value is a known status.
    #[default]
    Permissive,
    /// PENDING → CONFIRMED | CANCELLED;
    /// CONFIRMED → CANCELLED | COMPLETED | NO_SHOW; nothing else.
    Strict,
}

impl TransitionPolicy {
    pub fn allows(self, from: AppointmentStatus, to: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        match self {
            Self::Permissive => true,
            Self::Strict if from.is_terminal() => false,
            Self::Strict => matches!(
                (from, to),
                (Pending, Confirmed | Cancelled) | (Confirmed, Cancelled | Completed | NoShow)
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub appointment: Appointment,
    pub notification: NotificationOutcome,
}

impl StatusChange {
    /// The change was committed but its notification was not delivered.
    pub fn is_degraded(&self) -> bool {
        matches!(self.notification, NotificationOutcome::Failed { .. })
    }
}

pub struct AppointmentService {
    allocator: Arc<SlotAllocator>,
    appointments: Arc<dyn AppointmentRepo>,
    types: Arc<dyn AppointmentTypeRepo>,
    patients: Arc<dyn PatientRepo>,
    notifier: Arc<dyn Notifier>,
    clinic: ClinicClock,
    policy: TransitionPolicy,
    provider_name: String,
}

impl AppointmentService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        allocator: Arc<SlotAllocator>,
        appointments: Arc<dyn AppointmentRepo>,
        types: Arc<dyn AppointmentTypeRepo>,
        patients: Arc<dyn PatientRepo>,
        notifier: Arc<dyn Notifier>,
        clinic: ClinicClock,
        policy: TransitionPolicy,
        provider_name: impl Into<String>,
    ) -> Self {
        Self {
            allocator,
            appointments,
            types,
            patients,
            notifier,
            clinic,
            policy,
            provider_name: provider_name.into(),
        }
    }

    pub fn policy(&self) -> TransitionPolicy {
        self.policy
    }

    /// Books `[start_time, start_time + duration)` on `date` as PENDING.
    #[instrument(skip(self), fields(%patient_id, %appointment_type_id, %date, %start_time))]
    pub async fn create(
        &self,
        patient_id: Uuid,
        appointment_type_id: Uuid,
        date: NaiveDate,
        start_time: TimeOfDay,
    ) -> Result<Appointment> {
        let appointment_type = self.allocator.active_type(appointment_type_id).await?;
        if self.patients.get_patient(patient_id).await?.is_none() {
            return Err(AppError::not_found("Patient", patient_id));
        }

        let requested = TimeRange::starting_at(start_time, appointment_type.duration_minutes)?;
        if self
            .clinic
            .earliest_start_on(date)
            .is_some_and(|earliest| requested.start < earliest)
        {
            return Err(AppError::invalid(format!("{date} {start_time} is in the past")));
        }
        self.allocator.ensure_within_availability(date, &requested).await?;

        let now = self.clinic.now_utc();
        let appointment = Appointment {
            id: Uuid::new_v4(),
            patient_id,
            appointment_type_id,
            date,
            start_time: requested.start,
            end_time: requested.end,
            status: AppointmentStatus::Pending,
            handled_internally: false,
            created_at: now,
            updated_at: now,
        };

        match self.appointments.insert_if_free(appointment).await {
            Ok(created) => {
                info!(appointment_id = %created.id, "appointment requested");
                Ok(created)
            }
            Err(err @ AppError::Conflict(_)) => {
                warn!(error = %err, "slot taken at insert time");
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Applies a status given as its canonical name. Unknown names fail with
    /// `InvalidInput` before anything is read or written.
    #[instrument(skip(self), fields(%appointment_id))]
    pub async fn set_status(&self, appointment_id: Uuid, status: &str) -> Result<StatusChange> {
        let status: AppointmentStatus = status.parse()?;
        self.transition(appointment_id, status).await
    }

    pub async fn transition(&self, appointment_id: Uuid, status: AppointmentStatus) -> Result<StatusChange> {
        let current = self.get(appointment_id).await?;
        if !self.policy.allows(current.status, status) {
            warn!(from = %current.status, to = %status, "transition refused");
            return Err(AppError::InvalidTransition {
                from: current.status,
                to: status,
            });
        }

        let appointment = self
            .appointments
            .set_status(appointment_id, status, self.clinic.now_utc())
            .await?;
        info!(from = %current.status, to = %status, "status changed");

        let notification = match status {
            AppointmentStatus::Confirmed => self.notify(&appointment, NotificationKind::Confirmed).await,
            AppointmentStatus::Cancelled => self.notify(&appointment, NotificationKind::Cancelled).await,
            _ => NotificationOutcome::NotRequired,
        };

        Ok(StatusChange {
            appointment,
            notification,
        })
    }

    pub async fn set_handled_internally(&self, appointment_id: Uuid, flag: bool) -> Result<Appointment> {
        let appointment = self
            .appointments
            .set_handled_internally(appointment_id, flag, self.clinic.now_utc())
            .await?;
        info!(%appointment_id, handled_internally = flag, "handled flag updated");
        Ok(appointment)
    }

    pub async fn delete(&self, appointment_id: Uuid) -> Result<()> {
        self.appointments.delete_appointment(appointment_id).await?;
        info!(%appointment_id, "appointment deleted");
        Ok(())
    }

    /// Attaches an alternative time to an appointment, replacing any earlier
    /// proposal. The alternative must be open and free right now; it does not
    /// reserve anything.
    pub async fn propose_alternative(
        &self,
        appointment_id: Uuid,
        date: NaiveDate,
        start_time: TimeOfDay,
        message: Option<String>,
    ) -> Result<Proposal> {
        let appointment = self.get(appointment_id).await?;
        let proposed = TimeRange::starting_at(start_time, appointment.range().duration_minutes())?;
        if self
            .clinic
            .earliest_start_on(date)
            .is_some_and(|earliest| proposed.start < earliest)
        {
            return Err(AppError::invalid(format!("{date} {start_time} is in the past")));
        }
        self.allocator.ensure_within_availability(date, &proposed).await?;

        let taken = self
            .appointments
            .holding_on(date)
            .await?
            .iter()
            .any(|other| other.id != appointment_id && other.range().overlaps(&proposed));
        if taken {
            return Err(AppError::Conflict(format!("{proposed} on {date} is already taken")));
        }

        let proposal = Proposal {
            id: Uuid::new_v4(),
            appointment_id,
            date,
            start_time: proposed.start,
            message,
            created_at: self.clinic.now_utc(),
        };
        let saved = self.appointments.save_proposal(proposal).await?;
        info!(%appointment_id, %date, %start_time, "alternative proposed");
        Ok(saved)
    }

    pub async fn get(&self, appointment_id: Uuid) -> Result<Appointment> {
        self.appointments
            .get_appointment(appointment_id)
            .await?
            .ok_or_else(|| AppError::not_found("Appointment", appointment_id))
    }

    pub async fn proposal_for(&self, appointment_id: Uuid) -> Result<Option<Proposal>> {
        self.appointments.get_proposal(appointment_id).await
    }

    pub async fn list(&self, filter: AppointmentFilter) -> Result<Vec<Appointment>> {
        self.appointments.list_appointments(filter).await
    }

    pub async fn list_for_patient(&self, patient_id: Uuid) -> Result<Vec<Appointment>> {
        self.list(AppointmentFilter {
            patient_id: Some(patient_id),
            ..AppointmentFilter::default()
        })
        .await
    }

    /// PENDING appointments nobody has resolved internally yet.
    pub async fn open_work_count(&self) -> Result<usize> {
        let open = self
            .list(AppointmentFilter {
                statuses: Some(vec![AppointmentStatus::Pending]),
                handled_internally: Some(false),
                ..AppointmentFilter::default()
            })
            .await?;
        Ok(open.len())
    }

    async fn notify(&self, appointment: &Appointment, kind: NotificationKind) -> NotificationOutcome {
        let sent: Result<()> = async {
            let patient = self
                .patients
                .get_patient(appointment.patient_id)
                .await?
                .ok_or_else(|| AppError::not_found("Patient", appointment.patient_id))?;
            let appointment_type = self
                .types
                .get_type(appointment.appointment_type_id)
                .await?
                .ok_or_else(|| AppError::not_found("AppointmentType", appointment.appointment_type_id))?;
            let payload = build_payload(appointment, &patient, &appointment_type, &self.provider_name);
            match kind {
                NotificationKind::Confirmed => self.notifier.send_confirmed(&payload).await,
                NotificationKind::Cancelled => self.notifier.send_cancelled(&payload).await,
            }
        }
        .await;

        match sent {
            Ok(()) => NotificationOutcome::Sent(kind),
            Err(err) => {
                warn!(appointment_id = %appointment.id, ?kind, error = %err, "notification not delivered");
                NotificationOutcome::Failed {
                    kind,
                    reason: err.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use domains::{
        AppointmentType, AvailabilityWindow, DayOfWeek, ManualClock, MockAppointmentRepo,
        MockAppointmentTypeRepo, MockAvailabilityRepo, MockNotifier, MockPatientRepo, Patient,
    };
    use mockall::predicate::eq;

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn patient() -> Patient {
        Patient {
            id: Uuid::new_v4(),
            name: "Grace Hopper".into(),
            email: "grace@example.org".into(),
        }
    }

    fn pending(patient: &Patient, kind: &AppointmentType) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            patient_id: patient.id,
            appointment_type_id: kind.id,
            date: monday(),
            start_time: "08:00".parse().unwrap(),
            end_time: "08:30".parse().unwrap(),
            status: AppointmentStatus::Pending,
            handled_internally: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    struct Fixture {
        availability: MockAvailabilityRepo,
        types: MockAppointmentTypeRepo,
        appointments: MockAppointmentRepo,
        patients: MockPatientRepo,
        notifier: MockNotifier,
        policy: TransitionPolicy,
    }

    impl Fixture {
        fn new(patient: &Patient, kind: &AppointmentType) -> Self {
            let mut availability = MockAvailabilityRepo::new();
            let window =
                AvailabilityWindow::new(DayOfWeek::Monday, "08:00".parse().unwrap(), "12:00".parse().unwrap())
                    .unwrap();
            availability
                .expect_active_windows()
                .returning(move |_| Ok(vec![window.clone()]));

            let mut types = MockAppointmentTypeRepo::new();
            let kind = kind.clone();
            types.expect_get_type().returning(move |_| Ok(Some(kind.clone())));

            let mut patients = MockPatientRepo::new();
            let patient = patient.clone();
            patients.expect_get_patient().returning(move |_| Ok(Some(patient.clone())));

            Self {
                availability,
                types,
                appointments: MockAppointmentRepo::new(),
                patients,
                notifier: MockNotifier::new(),
                policy: TransitionPolicy::Permissive,
            }
        }

        fn build(self) -> AppointmentService {
            let clock = ManualClock::at(Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap());
            let clinic = ClinicClock::utc(Arc::new(clock));
            let types: Arc<dyn AppointmentTypeRepo> = Arc::new(self.types);
            let appointments: Arc<dyn AppointmentRepo> = Arc::new(self.appointments);
            let allocator = Arc::new(SlotAllocator::new(
                Arc::new(self.availability),
                types.clone(),
                appointments.clone(),
                clinic.clone(),
            ));
            AppointmentService::new(
                allocator,
                appointments,
                types,
                Arc::new(self.patients),
                Arc::new(self.notifier),
                clinic,
                self.policy,
                "Dr. Grey",
            )
        }
    }

    #[tokio::test]
    async fn create_persists_pending_through_atomic_insert() {
        let patient = patient();
        let kind = AppointmentType::new("Consultation", 30, None).unwrap();
        let mut fx = Fixture::new(&patient, &kind);
        fx.appointments
            .expect_insert_if_free()
            .times(1)
            .returning(|a| Ok(a));
        let service = fx.build();

        let created = service
            .create(patient.id, kind.id, monday(), "08:30".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(created.status, AppointmentStatus::Pending);
        assert_eq!(created.end_time, "09:00".parse().unwrap());
    }

    #[tokio::test]
    async fn create_surfaces_conflict_from_insert() {
        let patient = patient();
        let kind = AppointmentType::new("Consultation", 30, None).unwrap();
        let mut fx = Fixture::new(&patient, &kind);
        fx.appointments
            .expect_insert_if_free()
            .returning(|_| Err(AppError::Conflict("taken".into())));
        let service = fx.build();

        let err = service
            .create(patient.id, kind.id, monday(), "08:00".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn create_outside_opening_hours_never_inserts() {
        let patient = patient();
        let kind = AppointmentType::new("Consultation", 30, None).unwrap();
        let mut fx = Fixture::new(&patient, &kind);
        fx.appointments.expect_insert_if_free().never();
        let service = fx.build();

        let err = service
            .create(patient.id, kind.id, monday(), "11:45".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn create_in_the_past_is_invalid() {
        let patient = patient();
        let kind = AppointmentType::new("Consultation", 30, None).unwrap();
        let mut fx = Fixture::new(&patient, &kind);
        fx.appointments.expect_insert_if_free().never();
        let service = fx.build();

        let last_week = NaiveDate::from_ymd_opt(2026, 10, 12).unwrap();
        let err = service
            .create(patient.id, kind.id, last_week, "08:00".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn confirming_sends_exactly_one_confirmation() {
        let patient = patient();
        let kind = AppointmentType::new("Consultation", 30, None).unwrap();
        let appointment = pending(&patient, &kind);
        let id = appointment.id;

        let mut fx = Fixture::new(&patient, &kind);
        let current = appointment.clone();
        fx.appointments
            .expect_get_appointment()
            .with(eq(id))
            .returning(move |_| Ok(Some(current.clone())));
        fx.appointments
            .expect_set_status()
            .withf(move |got, status, _| *got == id && *status == AppointmentStatus::Confirmed)
            .times(1)
            .returning(move |_, status, _| {
                let mut updated = appointment.clone();
                updated.status = status;
                Ok(updated)
            });
        fx.notifier
            .expect_send_confirmed()
            .withf(|p| p.date == "Monday, 19 October 2026" && p.time == "08:00" && p.patient_name == "Grace Hopper")
            .times(1)
            .returning(|_| Ok(()));
        fx.notifier.expect_send_cancelled().never();
        let service = fx.build();

        let change = service.set_status(id, "CONFIRMED").await.unwrap();
        assert_eq!(change.appointment.status, AppointmentStatus::Confirmed);
        assert_eq!(change.notification, NotificationOutcome::Sent(NotificationKind::Confirmed));
    }

    #[tokio::test]
    async fn bogus_status_mutates_nothing() {
        let patient = patient();
        let kind = AppointmentType::new("Consultation", 30, None).unwrap();
        let mut fx = Fixture::new(&patient, &kind);
        fx.appointments.expect_get_appointment().never();
        fx.appointments.expect_set_status().never();
        fx.notifier.expect_send_confirmed().never();
        let service = fx.build();

        let err = service.set_status(Uuid::new_v4(), "BOGUS").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn failed_cancellation_notice_keeps_the_status_change() {
        let patient = patient();
        let kind = AppointmentType::new("Consultation", 30, None).unwrap();
        let appointment = pending(&patient, &kind);
        let id = appointment.id;

        let mut fx = Fixture::new(&patient, &kind);
        let current = appointment.clone();
        fx.appointments
            .expect_get_appointment()
            .returning(move |_| Ok(Some(current.clone())));
        fx.appointments.expect_set_status().returning(move |_, status, _| {
            let mut updated = appointment.clone();
            updated.status = status;
            Ok(updated)
        });
        fx.notifier
            .expect_send_cancelled()
            .times(1)
            .returning(|_| Err(AppError::unavailable("smtp relay down")));
        let service = fx.build();

        let change = service.set_status(id, "CANCELLED").await.unwrap();
        assert_eq!(change.appointment.status, AppointmentStatus::Cancelled);
        assert!(change.is_degraded());
    }

    #[tokio::test]
    async fn completion_has_no_notification() {
        let patient = patient();
        let kind = AppointmentType::new("Consultation", 30, None).unwrap();
        let appointment = pending(&patient, &kind);
        let id = appointment.id;

        let mut fx = Fixture::new(&patient, &kind);
        let current = appointment.clone();
        fx.appointments
            .expect_get_appointment()
            .returning(move |_| Ok(Some(current.clone())));
        fx.appointments.expect_set_status().returning(move |_, status, _| {
            let mut updated = appointment.clone();
            updated.status = status;
            Ok(updated)
        });
        fx.notifier.expect_send_confirmed().never();
        fx.notifier.expect_send_cancelled().never();
        let service = fx.build();

        let change = service.set_status(id, "COMPLETED").await.unwrap();
        assert_eq!(change.notification, NotificationOutcome::NotRequired);
    }

    #[tokio::test]
    async fn strict_policy_refuses_leaving_a_terminal_status() {
        let patient = patient();
        let kind = AppointmentType::new("Consultation", 30, None).unwrap();
        let mut cancelled = pending(&patient, &kind);
        cancelled.status = AppointmentStatus::Cancelled;
        let id = cancelled.id;

        let mut fx = Fixture::new(&patient, &kind);
        fx.policy = TransitionPolicy::Strict;
        fx.appointments
            .expect_get_appointment()
            .returning(move |_| Ok(Some(cancelled.clone())));
        fx.appointments.expect_set_status().never();
        let service = fx.build();

        let err = service.set_status(id, "PENDING").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[test]
    fn strict_graph_matches_the_workflow() {
        use AppointmentStatus::*;
        let strict = TransitionPolicy::Strict;
        assert!(strict.allows(Pending, Confirmed));
        assert!(strict.allows(Pending, Cancelled));
        assert!(strict.allows(Confirmed, Completed));
        assert!(strict.allows(Confirmed, NoShow));
        assert!(!strict.allows(Pending, Completed));
        assert!(!strict.allows(Completed, Pending));
        assert!(!strict.allows(NoShow, Confirmed));
        for terminal in AppointmentStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in AppointmentStatus::ALL {
                assert!(!strict.allows(terminal, to), "{terminal} -> {to}");
            }
        }
        assert!(TransitionPolicy::Permissive.allows(Cancelled, Pending));
    }

    #[tokio::test]
    async fn missing_appointment_is_not_found() {
        let patient = patient();
        let kind = AppointmentType::new("Consultation", 30, None).unwrap();
        let mut fx = Fixture::new(&patient, &kind);
        fx.appointments.expect_get_appointment().returning(|_| Ok(None));
        let service = fx.build();

        let err = service.set_status(Uuid::new_v4(), "CONFIRMED").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(..)));
    }
}
