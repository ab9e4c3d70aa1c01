//! # In-memory store
//!
//! Backs every data-store port with `DashMap`s. Appointments are grouped by
//! date so that the day's entry lock serializes the overlap recheck with the
//! write, the same guarantee the Postgres store gets from an advisory lock.
//!
//! Lock order: a `days` guard may be held while touching `index`, never the
//! other way round.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use domains::{
    AccountRepo, AppError, Appointment, AppointmentFilter, AppointmentRepo, AppointmentStatus, AppointmentType,
    AppointmentTypeRepo, AvailabilityRepo, AvailabilityWindow, DayOfWeek, Patient, PatientRepo, Proposal, Result,
    UserAccount,
};
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryStore {
    windows: DashMap<Uuid, AvailabilityWindow>,
    types: DashMap<Uuid, AppointmentType>,
    type_names: DashMap<String, Uuid>,
    days: DashMap<NaiveDate, Vec<Appointment>>,
    index: DashMap<Uuid, NaiveDate>,
    proposals: DashMap<Uuid, Proposal>,
    patients: DashMap<Uuid, Patient>,
    patient_emails: DashMap<String, Uuid>,
    accounts: DashMap<String, UserAccount>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn appointment_count(&self) -> usize {
        self.index.len()
    }

    fn date_of(&self, id: Uuid) -> Result<NaiveDate> {
        self.index
            .get(&id)
            .map(|date| *date)
            .ok_or_else(|| AppError::not_found("Appointment", id))
    }

    /// Applies `change` to the stored appointment while the day is locked.
    fn update_appointment<F>(&self, id: Uuid, change: F) -> Result<Appointment>
    where
        F: FnOnce(&[Appointment], &mut Appointment) -> Result<()>,
    {
        let date = self.date_of(id)?;
        let mut day = self
            .days
            .get_mut(&date)
            .ok_or_else(|| AppError::not_found("Appointment", id))?;
        let position = day
            .iter()
            .position(|a| a.id == id)
            .ok_or_else(|| AppError::not_found("Appointment", id))?;

        let mut updated = day[position].clone();
        change(&day, &mut updated)?;
        day[position] = updated.clone();
        Ok(updated)
    }
}

fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

#[async_trait]
impl AvailabilityRepo for MemoryStore {
    async fn list_windows(&self, day: Option<DayOfWeek>) -> Result<Vec<AvailabilityWindow>> {
        Ok(self
            .windows
            .iter()
            .filter(|w| day.map_or(true, |d| w.day_of_week == d))
            .map(|w| w.value().clone())
            .collect())
    }

    async fn active_windows(&self, day: DayOfWeek) -> Result<Vec<AvailabilityWindow>> {
        Ok(self
            .windows
            .iter()
            .filter(|w| w.is_active && w.day_of_week == day)
            .map(|w| w.value().clone())
            .collect())
    }

    async fn get_window(&self, id: Uuid) -> Result<Option<AvailabilityWindow>> {
        Ok(self.windows.get(&id).map(|w| w.clone()))
    }

    async fn save_window(&self, window: AvailabilityWindow) -> Result<AvailabilityWindow> {
        self.windows.insert(window.id, window.clone());
        Ok(window)
    }
}

#[async_trait]
impl AppointmentTypeRepo for MemoryStore {
    async fn get_type(&self, id: Uuid) -> Result<Option<AppointmentType>> {
        Ok(self.types.get(&id).map(|t| t.clone()))
    }

    async fn list_types(&self) -> Result<Vec<AppointmentType>> {
        Ok(self.types.iter().map(|t| t.value().clone()).collect())
    }

    async fn save_type(&self, appointment_type: AppointmentType) -> Result<AppointmentType> {
        let key = name_key(&appointment_type.name);
        match self.type_names.entry(key.clone()) {
            Entry::Occupied(owner) if *owner.get() != appointment_type.id => {
                return Err(AppError::Conflict(format!(
                    "an appointment type named '{}' already exists",
                    appointment_type.name
                )));
            }
            Entry::Occupied(_) => {}
            Entry::Vacant(vacant) => {
                vacant.insert(appointment_type.id);
            }
        }

        if let Some(previous) = self.types.insert(appointment_type.id, appointment_type.clone()) {
            let previous_key = name_key(&previous.name);
            if previous_key != key {
                self.type_names.remove(&previous_key);
            }
        }
        Ok(appointment_type)
    }
}

#[async_trait]
impl AppointmentRepo for MemoryStore {
    async fn holding_on(&self, date: NaiveDate) -> Result<Vec<Appointment>> {
        Ok(self
            .days
            .get(&date)
            .map(|day| day.iter().filter(|a| a.status.holds_slot()).cloned().collect())
            .unwrap_or_default())
    }

    async fn insert_if_free(&self, appointment: Appointment) -> Result<Appointment> {
        let mut day = self.days.entry(appointment.date).or_default();
        if let Some(taken) = day.iter().find(|other| appointment.clashes_with(other)) {
            debug!(appointment_id = %taken.id, "overlapping appointment holds the slot");
            return Err(AppError::Conflict(format!(
                "{} on {} is already taken",
                appointment.range(),
                appointment.date
            )));
        }
        day.push(appointment.clone());
        self.index.insert(appointment.id, appointment.date);
        Ok(appointment)
    }

    async fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>> {
        let Some(date) = self.index.get(&id).map(|date| *date) else {
            return Ok(None);
        };
        Ok(self
            .days
            .get(&date)
            .and_then(|day| day.iter().find(|a| a.id == id).cloned()))
    }

    async fn set_status(&self, id: Uuid, status: AppointmentStatus, at: DateTime<Utc>) -> Result<Appointment> {
        self.update_appointment(id, |day, appointment| {
            let reclaims = status.holds_slot() && !appointment.status.holds_slot();
            appointment.status = status;
            appointment.updated_at = at;
            if reclaims && day.iter().any(|other| appointment.clashes_with(other)) {
                return Err(AppError::Conflict(format!(
                    "{} on {} has been booked by someone else",
                    appointment.range(),
                    appointment.date
                )));
            }
            Ok(())
        })
    }

    async fn set_handled_internally(&self, id: Uuid, flag: bool, at: DateTime<Utc>) -> Result<Appointment> {
        self.update_appointment(id, |_, appointment| {
            appointment.handled_internally = flag;
            appointment.updated_at = at;
            Ok(())
        })
    }

    async fn delete_appointment(&self, id: Uuid) -> Result<()> {
        let (_, date) = self
            .index
            .remove(&id)
            .ok_or_else(|| AppError::not_found("Appointment", id))?;
        if let Entry::Occupied(mut day) = self.days.entry(date) {
            day.get_mut().retain(|a| a.id != id);
            if day.get().is_empty() {
                day.remove();
            }
        }
        self.proposals.remove(&id);
        Ok(())
    }

    async fn list_appointments(&self, filter: AppointmentFilter) -> Result<Vec<Appointment>> {
        let mut found: Vec<Appointment> = self
            .days
            .iter()
            .filter(|day| filter.from.map_or(true, |from| *day.key() >= from))
            .filter(|day| filter.to.map_or(true, |to| *day.key() <= to))
            .flat_map(|day| {
                day.value()
                    .iter()
                    .filter(|a| filter.matches(a))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        found.sort_by_key(|a| (a.date, a.start_time, a.created_at));
        Ok(found)
    }

    async fn save_proposal(&self, proposal: Proposal) -> Result<Proposal> {
        if !self.index.contains_key(&proposal.appointment_id) {
            return Err(AppError::not_found("Appointment", proposal.appointment_id));
        }
        self.proposals.insert(proposal.appointment_id, proposal.clone());
        Ok(proposal)
    }

    async fn get_proposal(&self, appointment_id: Uuid) -> Result<Option<Proposal>> {
        Ok(self.proposals.get(&appointment_id).map(|p| p.clone()))
    }
}

#[async_trait]
impl PatientRepo for MemoryStore {
    async fn get_patient(&self, id: Uuid) -> Result<Option<Patient>> {
        Ok(self.patients.get(&id).map(|p| p.clone()))
    }

    async fn find_patient_by_email(&self, email: &str) -> Result<Option<Patient>> {
        let Some(id) = self.patient_emails.get(&name_key(email)).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.patients.get(&id).map(|p| p.clone()))
    }

    async fn save_patient(&self, patient: Patient) -> Result<Patient> {
        let key = name_key(&patient.email);
        match self.patient_emails.entry(key.clone()) {
            Entry::Occupied(owner) if *owner.get() != patient.id => {
                return Err(AppError::Conflict(format!("{} is already registered", patient.email)));
            }
            Entry::Occupied(_) => {}
            Entry::Vacant(vacant) => {
                vacant.insert(patient.id);
            }
        }
        if let Some(previous) = self.patients.insert(patient.id, patient.clone()) {
            let previous_key = name_key(&previous.email);
            if previous_key != key {
                self.patient_emails.remove(&previous_key);
            }
        }
        Ok(patient)
    }
}

#[async_trait]
impl AccountRepo for MemoryStore {
    async fn find_account_by_email(&self, email: &str) -> Result<Option<UserAccount>> {
        Ok(self.accounts.get(&name_key(email)).map(|a| a.clone()))
    }

    async fn save_account(&self, account: UserAccount) -> Result<UserAccount> {
        match self.accounts.entry(name_key(&account.email)) {
            Entry::Occupied(existing) if existing.get().id != account.id => {
                Err(AppError::Conflict(format!("{} is already registered", account.email)))
            }
            Entry::Occupied(mut existing) => {
                existing.insert(account.clone());
                Ok(account)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(account.clone());
                Ok(account)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domains::TimeOfDay;
    use std::sync::Arc;

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn appointment(start: &str, end: &str) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            appointment_type_id: Uuid::new_v4(),
            date: monday(),
            start_time: start.parse().unwrap(),
            end_time: end.parse().unwrap(),
            status: AppointmentStatus::Pending,
            handled_internally: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn overlapping_insert_is_a_conflict() {
        let store = MemoryStore::new();
        tokio_test::block_on(async {
            store.insert_if_free(appointment("08:00", "08:30")).await.unwrap();

            let err = store.insert_if_free(appointment("08:15", "08:45")).await.unwrap_err();
            assert!(matches!(err, AppError::Conflict(_)));
            store.insert_if_free(appointment("08:30", "09:00")).await.unwrap();
        });
        assert_eq!(store.appointment_count(), 2);
    }

    #[tokio::test]
    async fn cancelled_appointments_free_their_slot() {
        let store = MemoryStore::new();
        let first = store.insert_if_free(appointment("08:00", "08:30")).await.unwrap();
        store
            .set_status(first.id, AppointmentStatus::Cancelled, Utc::now())
            .await
            .unwrap();

        store.insert_if_free(appointment("08:00", "08:30")).await.unwrap();
        assert_eq!(store.holding_on(monday()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reactivating_onto_a_taken_slot_conflicts() {
        let store = MemoryStore::new();
        let first = store.insert_if_free(appointment("08:00", "08:30")).await.unwrap();
        store
            .set_status(first.id, AppointmentStatus::Cancelled, Utc::now())
            .await
            .unwrap();
        store.insert_if_free(appointment("08:00", "08:30")).await.unwrap();

        let err = store
            .set_status(first.id, AppointmentStatus::Confirmed, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        let unchanged = store.get_appointment(first.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, AppointmentStatus::Cancelled);
    }

    #[tokio::test]
    async fn delete_removes_the_proposal_too() {
        let store = MemoryStore::new();
        let booked = store.insert_if_free(appointment("10:00", "10:30")).await.unwrap();
        store
            .save_proposal(Proposal {
                id: Uuid::new_v4(),
                appointment_id: booked.id,
                date: monday(),
                start_time: TimeOfDay::from_hm(11, 0).unwrap(),
                message: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        store.delete_appointment(booked.id).await.unwrap();
        assert!(store.get_proposal(booked.id).await.unwrap().is_none());
        assert!(store.get_appointment(booked.id).await.unwrap().is_none());
        assert!(matches!(
            store.delete_appointment(booked.id).await,
            Err(AppError::NotFound(..))
        ));
    }

    #[tokio::test]
    async fn deleting_the_last_booking_drops_the_day() {
        let store = MemoryStore::new();
        let first = store.insert_if_free(appointment("08:00", "08:30")).await.unwrap();
        let second = store.insert_if_free(appointment("09:00", "09:30")).await.unwrap();

        store.delete_appointment(first.id).await.unwrap();
        assert_eq!(store.days.len(), 1);
        store.delete_appointment(second.id).await.unwrap();
        assert!(store.days.is_empty());

        store.insert_if_free(appointment("08:00", "08:30")).await.unwrap();
        assert_eq!(store.holding_on(monday()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn listing_is_ordered_and_filtered() {
        let store = MemoryStore::new();
        let late = store.insert_if_free(appointment("11:00", "11:30")).await.unwrap();
        let early = store.insert_if_free(appointment("08:00", "08:30")).await.unwrap();
        store
            .set_handled_internally(late.id, true, Utc::now())
            .await
            .unwrap();

        let all = store.list_appointments(AppointmentFilter::default()).await.unwrap();
        assert_eq!(all.iter().map(|a| a.id).collect::<Vec<_>>(), vec![early.id, late.id]);

        let open = store
            .list_appointments(AppointmentFilter {
                handled_internally: Some(false),
                ..AppointmentFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, early.id);
    }

    #[tokio::test]
    async fn type_names_are_unique_ignoring_case() {
        let store = MemoryStore::new();
        let consultation = store
            .save_type(AppointmentType::new("Consultation", 30, None).unwrap())
            .await
            .unwrap();
        let err = store
            .save_type(AppointmentType::new("consultation", 15, None).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let mut renamed = consultation.clone();
        renamed.name = "Long consultation".into();
        store.save_type(renamed).await.unwrap();
        store
            .save_type(AppointmentType::new("Consultation", 20, None).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_bookings_of_one_slot_admit_exactly_one() {
        let store = Arc::new(MemoryStore::new());
        let attempts: Vec<_> = (0..64)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.insert_if_free(appointment("09:00", "09:30")).await })
            })
            .collect();

        let mut admitted = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => admitted += 1,
                Err(err) => assert!(matches!(err, AppError::Conflict(_))),
            }
        }
        assert_eq!(admitted, 1);
        assert_eq!(store.holding_on(monday()).await.unwrap().len(), 1);
    }
}
