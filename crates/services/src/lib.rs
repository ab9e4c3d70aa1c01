//! medibook/crates/services/src/lib.rs
//!
//! Use cases of the booking core. Everything here talks to the outside
//! world through the ports in `domains`; nothing knows about HTTP, SQL or
//! Redis.

pub mod appointments;
pub mod catalogue;
pub mod clinic;
pub mod gateway;
pub mod identifier;
pub mod notification;
pub mod rate_limit;
pub mod slots;

use std::sync::Arc;

use domains::{AccountRepo, AppointmentRepo, AppointmentTypeRepo, AvailabilityRepo, PatientRepo};

pub use appointments::{AppointmentService, StatusChange, TransitionPolicy};
pub use catalogue::{CatalogueService, TypeUpdate, WindowUpdate};
pub use clinic::ClinicClock;
pub use gateway::{AdmissionGateway, BookingRequest, GatewayOptions, PatientDetails, ProposalRequest, RequestContext};
pub use identifier::{resolve_client_identifier, IdentifierPolicy, UNKNOWN_CLIENT};
pub use notification::{NotificationKind, NotificationOutcome};
pub use rate_limit::{FixedWindowLimiter, LimiterConfigs, LimiterName, RateLimitConfig, RateLimiters, SweeperHandle};
pub use slots::{generate_slots, SlotAllocator};

/// The data-store ports, usually all backed by one store.
#[derive(Clone)]
pub struct Repositories {
    pub availability: Arc<dyn AvailabilityRepo>,
    pub types: Arc<dyn AppointmentTypeRepo>,
    pub appointments: Arc<dyn AppointmentRepo>,
    pub patients: Arc<dyn PatientRepo>,
    pub accounts: Arc<dyn AccountRepo>,
}

impl Repositories {
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: AvailabilityRepo + AppointmentTypeRepo + AppointmentRepo + PatientRepo + AccountRepo + 'static,
    {
        Self {
            availability: store.clone(),
            types: store.clone(),
            appointments: store.clone(),
            patients: store.clone(),
            accounts: store,
        }
    }
}

/// Settings the core services are assembled from.
#[derive(Debug, Clone)]
pub struct CoreOptions {
    pub provider_name: String,
    pub transition_policy: TransitionPolicy,
    pub gateway: GatewayOptions,
}

/// Wires services over the given ports.
pub fn assemble(
    repos: &Repositories,
    notifier: Arc<dyn domains::Notifier>,
    identity: Arc<dyn domains::IdentityProvider>,
    limiters: RateLimiters,
    clinic: ClinicClock,
    options: CoreOptions,
) -> AdmissionGateway {
    let allocator = Arc::new(SlotAllocator::new(
        repos.availability.clone(),
        repos.types.clone(),
        repos.appointments.clone(),
        clinic.clone(),
    ));
    let appointments = Arc::new(AppointmentService::new(
        allocator.clone(),
        repos.appointments.clone(),
        repos.types.clone(),
        repos.patients.clone(),
        notifier,
        clinic,
        options.transition_policy,
        options.provider_name,
    ));
    let catalogue = Arc::new(CatalogueService::new(repos.availability.clone(), repos.types.clone()));

    AdmissionGateway::new(
        limiters,
        allocator,
        appointments,
        catalogue,
        repos.patients.clone(),
        repos.accounts.clone(),
        identity,
        options.gateway,
    )
}
