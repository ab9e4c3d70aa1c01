//! Shared fixtures for the end-to-end tests: a fully assembled booking core
//! over the in-memory store, a controllable clock and a recording notifier.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use auth_adapters::{hash_password, SessionIdentityProvider};
use chrono::{NaiveDate, TimeZone, Utc};
use domains::{
    AccountRepo, AppError, AppointmentType, AppointmentTypeRepo, AvailabilityRepo, AvailabilityWindow, Clock,
    DayOfWeek, ManualClock, NotificationPayload, Notifier, Patient, PatientRepo, Result, Role, TimeOfDay,
    UserAccount,
};
use services::{
    assemble, AdmissionGateway, BookingRequest, ClinicClock, CoreOptions, FixedWindowLimiter, GatewayOptions,
    LimiterConfigs, PatientDetails, RateLimitConfig, RateLimiters, Repositories, RequestContext, TransitionPolicy,
};
use storage_adapters::MemoryStore;
use uuid::Uuid;

pub const ADMIN_EMAIL: &str = "admin@clinic.example";
pub const ADMIN_PASSWORD: &str = "admin-password";
pub const PATIENT_EMAIL: &str = "ada@patients.example";
pub const PATIENT_PASSWORD: &str = "patient-password";

/// Monday. The fixture clock starts on the Friday before.
pub fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 19).expect("valid date")
}

pub fn time(raw: &str) -> TimeOfDay {
    raw.parse().expect("valid time of day")
}

/// Limits high enough that only tests about throttling ever hit them.
pub fn generous_limits() -> LimiterConfigs {
    let wide = RateLimitConfig {
        window_ms: 60_000,
        max_requests: 10_000,
    };
    LimiterConfigs {
        general: wide,
        booking: wide,
        auth: wide,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub kind: &'static str,
    pub payload: NotificationPayload,
}

/// Records every message; can be switched into failing.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    fn record(&self, kind: &'static str, payload: &NotificationPayload) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::unavailable("mail relay unreachable"));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(SentNotification {
                kind,
                payload: payload.clone(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_confirmed(&self, payload: &NotificationPayload) -> Result<()> {
        self.record("confirmed", payload)
    }

    async fn send_cancelled(&self, payload: &NotificationPayload) -> Result<()> {
        self.record("cancelled", payload)
    }
}

pub struct ClinicOptions {
    pub limits: LimiterConfigs,
    pub policy: TransitionPolicy,
    pub gateway: GatewayOptions,
}

impl Default for ClinicOptions {
    fn default() -> Self {
        Self {
            limits: generous_limits(),
            policy: TransitionPolicy::Permissive,
            gateway: GatewayOptions {
                allow_anonymous_booking: true,
                ..GatewayOptions::default()
            },
        }
    }
}

/// One clinic: Monday 09:00-12:00, a 30-minute consultation type, an admin
/// account and a patient with a login.
pub struct TestClinic {
    pub store: Arc<MemoryStore>,
    pub clock: ManualClock,
    pub notifier: Arc<RecordingNotifier>,
    pub gateway: Arc<AdmissionGateway>,
    pub limiter_tables: Vec<Arc<FixedWindowLimiter>>,
    pub consultation: AppointmentType,
    pub patient: Patient,
}

impl TestClinic {
    pub async fn new() -> Self {
        Self::with_options(ClinicOptions::default()).await
    }

    pub async fn with_options(options: ClinicOptions) -> Self {
        let store = Arc::new(MemoryStore::new());
        let start = Utc
            .with_ymd_and_hms(2026, 10, 16, 8, 0, 0)
            .single()
            .expect("valid instant");
        let clock = ManualClock::at(start);
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let notifier = Arc::new(RecordingNotifier::default());

        let window = AvailabilityWindow::new(DayOfWeek::Monday, time("09:00"), time("12:00"))
            .expect("fixture window");
        store.save_window(window).await.expect("fixture setup");
        let consultation = store
            .save_type(
                AppointmentType::new("General Consultation", 30, None).expect("fixture type"),
            )
            .await
            .expect("fixture setup");

        let patient = store
            .save_patient(Patient {
                id: Uuid::new_v4(),
                name: "Ada Lovelace".into(),
                email: PATIENT_EMAIL.into(),
            })
            .await
            .expect("fixture setup");
        for (id, email, password, role) in [
            (Uuid::new_v4(), ADMIN_EMAIL, ADMIN_PASSWORD, Role::Admin),
            (patient.id, PATIENT_EMAIL, PATIENT_PASSWORD, Role::Patient),
        ] {
            store
                .save_account(UserAccount {
                    id,
                    email: email.into(),
                    password_hash: hash_password(password).expect("fixture setup"),
                    role,
                })
                .await
                .expect("fixture setup");
        }

        let repos = Repositories::from_store(store.clone());
        let identity = Arc::new(SessionIdentityProvider::new(repos.accounts.clone(), shared_clock.clone(), 60));
        let (limiters, limiter_tables) = RateLimiters::in_memory(options.limits, shared_clock.clone());
        let gateway = assemble(
            &repos,
            notifier.clone(),
            identity,
            limiters,
            ClinicClock::utc(shared_clock),
            CoreOptions {
                provider_name: "Dr. Grace Hopper".into(),
                transition_policy: options.policy,
                gateway: options.gateway,
            },
        );

        Self {
            store,
            clock,
            notifier,
            gateway: Arc::new(gateway),
            limiter_tables,
            consultation,
            patient,
        }
    }

    pub fn anonymous(&self, client: &str) -> RequestContext {
        RequestContext::anonymous(client)
    }

    pub async fn admin(&self) -> RequestContext {
        self.login(ADMIN_EMAIL, ADMIN_PASSWORD).await
    }

    pub async fn patient_context(&self) -> RequestContext {
        self.login(PATIENT_EMAIL, PATIENT_PASSWORD).await
    }

    async fn login(&self, email: &str, password: &str) -> RequestContext {
        let ctx = RequestContext::anonymous("198.51.100.1");
        let session = self
            .gateway
            .login(&ctx, email, password)
            .await
            .unwrap_or_else(|e| panic!("fixture login for {email}: {e}"));
        RequestContext::authenticated("198.51.100.1", session.principal)
    }

    /// An anonymous booking request for the consultation type on Monday.
    pub fn booking(&self, start: &str, email: &str) -> BookingRequest {
        BookingRequest {
            appointment_type_id: self.consultation.id,
            date: monday().to_string(),
            start_time: start.into(),
            patient: Some(PatientDetails {
                name: "Walk-in Patient".into(),
                email: email.into(),
            }),
        }
    }
}
