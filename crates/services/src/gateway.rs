//! # Admission Gateway
//!
//! Every externally reachable operation goes through here: the caller's
//! limiter is consulted first, then the role, then the use case itself.
//! Transport adapters only translate requests into [`RequestContext`] plus
//! arguments and errors back into responses.

use std::sync::Arc;

use chrono::NaiveDate;
use domains::{
    AccountRepo, AppError, Appointment, AppointmentFilter, AppointmentType, AvailabilityWindow, DayOfWeek,
    IdentityProvider, Patient, PatientRepo, Principal, Proposal, Result, Role, Session, Slot, TimeOfDay, parse_calendar_date,
};
use serde::Deserialize;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::appointments::{AppointmentService, StatusChange};
use crate::catalogue::{CatalogueService, TypeUpdate, WindowUpdate};
use crate::identifier::{resolve_client_identifier, IdentifierPolicy};
use crate::rate_limit::{LimiterName, RateLimiters};
use crate::slots::SlotAllocator;

/// Who is calling, as far as the gateway is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Rate-limit key.
    pub client: String,
    pub principal: Option<Principal>,
}

impl RequestContext {
    pub fn anonymous(client: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            principal: None,
        }
    }

    pub fn authenticated(client: impl Into<String>, principal: Principal) -> Self {
        Self {
            client: client.into(),
            principal: Some(principal),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayOptions {
    pub identifier_policy: IdentifierPolicy,
    pub allow_anonymous_booking: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientDetails {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub appointment_type_id: Uuid,
    pub date: String,
    pub start_time: String,
    /// Required for anonymous and administrator bookings.
    #[serde(default)]
    pub patient: Option<PatientDetails>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalRequest {
    pub date: String,
    pub start_time: String,
    #[serde(default)]
    pub message: Option<String>,
}

pub struct AdmissionGateway {
    limiters: RateLimiters,
    allocator: Arc<SlotAllocator>,
    appointments: Arc<AppointmentService>,
    catalogue: Arc<CatalogueService>,
    patients: Arc<dyn PatientRepo>,
    accounts: Arc<dyn AccountRepo>,
    identity: Arc<dyn IdentityProvider>,
    options: GatewayOptions,
}

impl AdmissionGateway {
    pub fn new(
        limiters: RateLimiters,
        allocator: Arc<SlotAllocator>,
        appointments: Arc<AppointmentService>,
        catalogue: Arc<CatalogueService>,
        patients: Arc<dyn PatientRepo>,
        accounts: Arc<dyn AccountRepo>,
        identity: Arc<dyn IdentityProvider>,
        options: GatewayOptions,
    ) -> Self {
        Self {
            limiters,
            allocator,
            appointments,
            catalogue,
            patients,
            accounts,
            identity,
            options,
        }
    }

    pub fn options(&self) -> GatewayOptions {
        self.options
    }

    /// Builds the context from the raw proxy headers and an optional bearer
    /// token. A token that does not verify is `Unauthorized`, not anonymous.
    pub fn context(
        &self,
        forwarded_for: Option<&str>,
        real_ip: Option<&str>,
        bearer: Option<&str>,
    ) -> Result<RequestContext> {
        let client = resolve_client_identifier(forwarded_for, real_ip, self.options.identifier_policy)?;
        let principal = bearer.map(|token| self.identity.authenticate(token)).transpose()?;
        Ok(RequestContext { client, principal })
    }

    /// `true` admits, `false` throttles. Unknown limiter names are `InvalidInput`.
    pub async fn check_rate(&self, identifier: &str, limiter: &str) -> Result<bool> {
        let name: LimiterName = limiter.parse()?;
        self.limiters.check_rate(identifier, name).await
    }

    pub async fn list_appointment_types(&self, ctx: &RequestContext) -> Result<Vec<AppointmentType>> {
        self.limiters.admit(&ctx.client, LimiterName::General).await?;
        self.catalogue.list_active_types().await
    }

    pub async fn list_slots(&self, ctx: &RequestContext, date: &str, appointment_type_id: Uuid) -> Result<Vec<Slot>> {
        self.limiters.admit(&ctx.client, LimiterName::General).await?;
        self.allocator.list_slots(date, appointment_type_id).await
    }

    /// Bookings pass both the general and the booking limiter.
    #[instrument(skip(self, request), fields(client = %ctx.client))]
    pub async fn create_appointment(&self, ctx: &RequestContext, request: BookingRequest) -> Result<Appointment> {
        self.limiters.admit(&ctx.client, LimiterName::General).await?;
        self.limiters.admit(&ctx.client, LimiterName::Booking).await?;

        let date = parse_calendar_date(&request.date)?;
        let start_time: TimeOfDay = request.start_time.parse()?;
        let patient_id = self.booking_patient(ctx, request.patient).await?;

        self.appointments
            .create(patient_id, request.appointment_type_id, date, start_time)
            .await
    }

    pub async fn my_appointments(&self, ctx: &RequestContext) -> Result<Vec<Appointment>> {
        self.limiters.admit(&ctx.client, LimiterName::General).await?;
        let principal = require_principal(ctx)?;
        self.appointments.list_for_patient(principal.user_id).await
    }

    /// Logins pass both the general and the auth limiter.
    pub async fn login(&self, ctx: &RequestContext, email: &str, password: &str) -> Result<Session> {
        self.limiters.admit(&ctx.client, LimiterName::General).await?;
        self.limiters.admit(&ctx.client, LimiterName::Auth).await?;
        let session = self.identity.login(email, password).await?;
        info!(user_id = %session.principal.user_id, role = %session.principal.role.as_str(), "login succeeded");
        Ok(session)
    }

    pub fn authenticate(&self, token: &str) -> Result<Principal> {
        self.identity.authenticate(token)
    }

    pub async fn set_status(&self, ctx: &RequestContext, appointment_id: Uuid, status: &str) -> Result<StatusChange> {
        self.admit_admin(ctx).await?;
        self.appointments.set_status(appointment_id, status).await
    }

    pub async fn set_handled_internally(
        &self,
        ctx: &RequestContext,
        appointment_id: Uuid,
        flag: bool,
    ) -> Result<Appointment> {
        self.admit_admin(ctx).await?;
        self.appointments.set_handled_internally(appointment_id, flag).await
    }

    pub async fn delete_appointment(&self, ctx: &RequestContext, appointment_id: Uuid) -> Result<()> {
        self.admit_admin(ctx).await?;
        self.appointments.delete(appointment_id).await
    }

    pub async fn propose_alternative(
        &self,
        ctx: &RequestContext,
        appointment_id: Uuid,
        request: ProposalRequest,
    ) -> Result<Proposal> {
        self.admit_admin(ctx).await?;
        let date = parse_calendar_date(&request.date)?;
        let start_time: TimeOfDay = request.start_time.parse()?;
        self.appointments
            .propose_alternative(appointment_id, date, start_time, request.message)
            .await
    }

    pub async fn list_appointments(&self, ctx: &RequestContext, filter: AppointmentFilter) -> Result<Vec<Appointment>> {
        self.admit_admin(ctx).await?;
        self.appointments.list(filter).await
    }

    pub async fn open_work_count(&self, ctx: &RequestContext) -> Result<usize> {
        self.admit_admin(ctx).await?;
        self.appointments.open_work_count().await
    }

    pub async fn list_windows(&self, ctx: &RequestContext, day: Option<DayOfWeek>) -> Result<Vec<AvailabilityWindow>> {
        self.admit_admin(ctx).await?;
        self.catalogue.list_windows(day).await
    }

    pub async fn create_window(
        &self,
        ctx: &RequestContext,
        day: DayOfWeek,
        start_time: TimeOfDay,
        end_time: TimeOfDay,
    ) -> Result<AvailabilityWindow> {
        self.admit_admin(ctx).await?;
        self.catalogue.create_window(day, start_time, end_time).await
    }

    pub async fn update_window(
        &self,
        ctx: &RequestContext,
        window_id: Uuid,
        update: WindowUpdate,
    ) -> Result<AvailabilityWindow> {
        self.admit_admin(ctx).await?;
        self.catalogue.update_window(window_id, update).await
    }

    pub async fn list_all_types(&self, ctx: &RequestContext) -> Result<Vec<AppointmentType>> {
        self.admit_admin(ctx).await?;
        self.catalogue.list_all_types().await
    }

    pub async fn create_type(
        &self,
        ctx: &RequestContext,
        name: &str,
        duration_minutes: u32,
        description: Option<String>,
    ) -> Result<AppointmentType> {
        self.admit_admin(ctx).await?;
        self.catalogue.create_type(name, duration_minutes, description).await
    }

    pub async fn update_type(&self, ctx: &RequestContext, type_id: Uuid, update: TypeUpdate) -> Result<AppointmentType> {
        self.admit_admin(ctx).await?;
        self.catalogue.update_type(type_id, update).await
    }

    async fn admit_admin(&self, ctx: &RequestContext) -> Result<()> {
        self.limiters.admit(&ctx.client, LimiterName::General).await?;
        let principal = require_principal(ctx)?;
        if !principal.is_admin() {
            return Err(AppError::Forbidden("administrator role required".into()));
        }
        Ok(())
    }

    /// Patients book for themselves. Administrators and, when allowed,
    /// anonymous callers name the patient, who is looked up or registered
    /// by email. An existing patient record is never edited from booking
    /// details, and anonymous callers cannot book under an email that has
    /// an account.
    async fn booking_patient(&self, ctx: &RequestContext, details: Option<PatientDetails>) -> Result<Uuid> {
        match &ctx.principal {
            Some(principal) if principal.role == Role::Patient => Ok(principal.user_id),
            Some(_) => {
                let details = details.ok_or_else(|| AppError::invalid("patient details are required"))?;
                self.upsert_patient(details, false).await
            }
            None if self.options.allow_anonymous_booking => {
                let details = details.ok_or_else(|| AppError::invalid("patient name and email are required"))?;
                self.upsert_patient(details, true).await
            }
            None => Err(AppError::Unauthorized("sign in to book an appointment".into())),
        }
    }

    async fn upsert_patient(&self, details: PatientDetails, anonymous: bool) -> Result<Uuid> {
        let name = details.name.trim();
        let email = normalize_email(&details.email)?;
        if name.is_empty() {
            return Err(AppError::invalid("patient name must not be empty"));
        }

        if anonymous && self.accounts.find_account_by_email(&email).await?.is_some() {
            return Err(AppError::Unauthorized(
                "this email belongs to an account; sign in to book".into(),
            ));
        }

        if let Some(existing) = self.patients.find_patient_by_email(&email).await? {
            debug!(patient_id = %existing.id, "known patient");
            return Ok(existing.id);
        }

        let patient = self
            .patients
            .save_patient(Patient {
                id: Uuid::new_v4(),
                name: name.to_string(),
                email,
            })
            .await?;
        info!(patient_id = %patient.id, "patient registered");
        Ok(patient.id)
    }
}

fn require_principal(ctx: &RequestContext) -> Result<&Principal> {
    ctx.principal
        .as_ref()
        .ok_or_else(|| AppError::Unauthorized("authentication required".into()))
}

/// Lowercased and trimmed; must look like `local@domain`.
pub fn normalize_email(raw: &str) -> Result<String> {
    let email = raw.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') && !domain.starts_with('.') => Ok(email),
        _ => Err(AppError::invalid(format!("'{}' is not an email address", raw.trim()))),
    }
}

/// Parses an optional `YYYY-MM-DD` query value.
pub fn parse_optional_date(raw: Option<&str>) -> Result<Option<NaiveDate>> {
    raw.filter(|value| !value.is_empty()).map(parse_calendar_date).transpose()
}
