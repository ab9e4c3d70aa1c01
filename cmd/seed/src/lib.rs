//! Bootstrap data for a fresh clinic: the default appointment types, weekday
//! opening hours and the first admin account. Running it twice is harmless.

use domains::{AppointmentType, AvailabilityWindow, DayOfWeek, Result, Role, TimeOfDay, UserAccount};
use services::Repositories;
use tracing::{debug, info};
use uuid::Uuid;

pub const DEFAULT_TYPES: [(&str, u32, &str); 3] = [
    ("General Consultation", 30, "Standard consultation with the doctor"),
    ("Follow-up", 15, "Short follow-up on an earlier visit"),
    ("Extended Consultation", 60, "Longer visit for complex concerns"),
];

/// Morning and afternoon blocks, `(start, end)` as `(hours, minutes)`.
pub const WEEKDAY_HOURS: [((u32, u32), (u32, u32)); 2] = [((9, 0), (12, 0)), ((13, 0), (17, 0))];

pub const WEEKDAYS: [DayOfWeek; 5] = [
    DayOfWeek::Monday,
    DayOfWeek::Tuesday,
    DayOfWeek::Wednesday,
    DayOfWeek::Thursday,
    DayOfWeek::Friday,
];

#[derive(Debug, Clone)]
pub struct AdminSeed {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedReport {
    pub types_created: usize,
    pub windows_created: usize,
    pub admin_created: bool,
}

pub async fn seed(repos: &Repositories, admin: &AdminSeed) -> Result<SeedReport> {
    let mut report = SeedReport::default();

    let existing = repos.types.list_types().await?;
    for (name, minutes, description) in DEFAULT_TYPES {
        if existing.iter().any(|t| t.name.eq_ignore_ascii_case(name)) {
            debug!(name, "appointment type already present");
            continue;
        }
        repos
            .types
            .save_type(AppointmentType::new(name, minutes, Some(description.to_string()))?)
            .await?;
        report.types_created += 1;
    }

    // A weekday that already has any window was configured by hand; leave it.
    for day in WEEKDAYS {
        if !repos.availability.list_windows(Some(day)).await?.is_empty() {
            debug!(day = day.name(), "opening hours already present");
            continue;
        }
        for ((start_h, start_m), (end_h, end_m)) in WEEKDAY_HOURS {
            let window = AvailabilityWindow::new(
                day,
                TimeOfDay::from_hm(start_h, start_m)?,
                TimeOfDay::from_hm(end_h, end_m)?,
            )?;
            repos.availability.save_window(window).await?;
            report.windows_created += 1;
        }
    }

    let email = admin.email.trim().to_lowercase();
    if repos.accounts.find_account_by_email(&email).await?.is_none() {
        repos
            .accounts
            .save_account(UserAccount {
                id: Uuid::new_v4(),
                email: email.clone(),
                password_hash: auth_adapters::hash_password(&admin.password)?,
                role: Role::Admin,
            })
            .await?;
        report.admin_created = true;
    }

    info!(
        types = report.types_created,
        windows = report.windows_created,
        admin_created = report.admin_created,
        admin = %email,
        "seed finished"
    );
    Ok(report)
}
