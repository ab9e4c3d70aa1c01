//! # Postgres store
//!
//! Maps the relational model onto the domain types. Times of day are stored
//! as minutes since midnight.
//!
//! Booking writes take a transaction-scoped advisory lock keyed by the date,
//! recheck overlap and write before committing. Two bookings for the same day
//! therefore serialize while other days proceed in parallel.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use domains::{
    AccountRepo, AppError, Appointment, AppointmentFilter, AppointmentRepo, AppointmentStatus, AppointmentType,
    AppointmentTypeRepo, AvailabilityRepo, AvailabilityWindow, DayOfWeek, Patient, PatientRepo, Proposal, Result,
    Role, TimeOfDay, UserAccount,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

const APPOINTMENT_COLUMNS: &str = "id, patient_id, appointment_type_id, date, start_minute, end_minute, status, \
                                   handled_internally, created_at, updated_at";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(db_err)?;
        info!(max_connections, "connected to postgres");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(AppError::unavailable)?;
        info!("database migrations applied");
        Ok(())
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(db_err)?;
        Ok(())
    }

    async fn lock_day(tx: &mut Transaction<'_, Postgres>, date: NaiveDate) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(format!("appointments:{date}"))
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn slot_taken(
        tx: &mut Transaction<'_, Postgres>,
        date: NaiveDate,
        start: TimeOfDay,
        end: TimeOfDay,
        except: Uuid,
    ) -> Result<bool> {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM appointments \
             WHERE date = $1 AND status = ANY($2) AND start_minute < $4 AND $3 < end_minute AND id <> $5)",
        )
        .bind(date)
        .bind(holding_statuses())
        .bind(minutes(start))
        .bind(minutes(end))
        .bind(except)
        .fetch_one(&mut **tx)
        .await
        .map_err(db_err)
    }
}

/// Unique violations become `Conflict`; everything else is the database
/// being unavailable.
fn db_err(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::Conflict(db.message().to_string()),
        _ => AppError::unavailable(format!("database: {err}")),
    }
}

fn corrupt(what: impl std::fmt::Display) -> AppError {
    AppError::unavailable(format!("corrupt row: {what}"))
}

fn minutes(time: TimeOfDay) -> i32 {
    time.minutes_since_midnight() as i32
}

fn time_of_day(row: &PgRow, column: &str) -> Result<TimeOfDay> {
    let raw: i32 = row.try_get(column).map_err(db_err)?;
    let raw = u32::try_from(raw).map_err(corrupt)?;
    TimeOfDay::from_minutes(raw).map_err(corrupt)
}

fn holding_statuses() -> Vec<String> {
    AppointmentStatus::HOLDING.iter().map(|s| s.as_str().to_string()).collect()
}

fn window_from_row(row: &PgRow) -> Result<AvailabilityWindow> {
    let day: i16 = row.try_get("day_of_week").map_err(db_err)?;
    Ok(AvailabilityWindow {
        id: row.try_get("id").map_err(db_err)?,
        day_of_week: u8::try_from(day)
            .map_err(corrupt)
            .and_then(|d| DayOfWeek::from_index(d).map_err(corrupt))?,
        start_time: time_of_day(row, "start_minute")?,
        end_time: time_of_day(row, "end_minute")?,
        is_active: row.try_get("is_active").map_err(db_err)?,
    })
}

fn type_from_row(row: &PgRow) -> Result<AppointmentType> {
    let duration: i32 = row.try_get("duration_minutes").map_err(db_err)?;
    Ok(AppointmentType {
        id: row.try_get("id").map_err(db_err)?,
        name: row.try_get("name").map_err(db_err)?,
        duration_minutes: u32::try_from(duration).map_err(corrupt)?,
        description: row.try_get("description").map_err(db_err)?,
        is_active: row.try_get("is_active").map_err(db_err)?,
    })
}

fn appointment_from_row(row: &PgRow) -> Result<Appointment> {
    let status: String = row.try_get("status").map_err(db_err)?;
    Ok(Appointment {
        id: row.try_get("id").map_err(db_err)?,
        patient_id: row.try_get("patient_id").map_err(db_err)?,
        appointment_type_id: row.try_get("appointment_type_id").map_err(db_err)?,
        date: row.try_get("date").map_err(db_err)?,
        start_time: time_of_day(row, "start_minute")?,
        end_time: time_of_day(row, "end_minute")?,
        status: status.parse().map_err(corrupt)?,
        handled_internally: row.try_get("handled_internally").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
        updated_at: row.try_get("updated_at").map_err(db_err)?,
    })
}

fn proposal_from_row(row: &PgRow) -> Result<Proposal> {
    Ok(Proposal {
        id: row.try_get("id").map_err(db_err)?,
        appointment_id: row.try_get("appointment_id").map_err(db_err)?,
        date: row.try_get("date").map_err(db_err)?,
        start_time: time_of_day(row, "start_minute")?,
        message: row.try_get("message").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
    })
}

fn patient_from_row(row: &PgRow) -> Result<Patient> {
    Ok(Patient {
        id: row.try_get("id").map_err(db_err)?,
        name: row.try_get("name").map_err(db_err)?,
        email: row.try_get("email").map_err(db_err)?,
    })
}

fn account_from_row(row: &PgRow) -> Result<UserAccount> {
    let role: String = row.try_get("role").map_err(db_err)?;
    Ok(UserAccount {
        id: row.try_get("id").map_err(db_err)?,
        email: row.try_get("email").map_err(db_err)?,
        password_hash: row.try_get("password_hash").map_err(db_err)?,
        role: role.parse::<Role>().map_err(corrupt)?,
    })
}

#[async_trait]
impl AvailabilityRepo for PgStore {
    async fn list_windows(&self, day: Option<DayOfWeek>) -> Result<Vec<AvailabilityWindow>> {
        sqlx::query(
            "SELECT * FROM availability_windows WHERE ($1::SMALLINT IS NULL OR day_of_week = $1) \
             ORDER BY day_of_week, start_minute",
        )
        .bind(day.map(|d| i16::from(d.index())))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?
        .iter()
        .map(window_from_row)
        .collect()
    }

    async fn active_windows(&self, day: DayOfWeek) -> Result<Vec<AvailabilityWindow>> {
        sqlx::query("SELECT * FROM availability_windows WHERE day_of_week = $1 AND is_active ORDER BY start_minute")
            .bind(i16::from(day.index()))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?
            .iter()
            .map(window_from_row)
            .collect()
    }

    async fn get_window(&self, id: Uuid) -> Result<Option<AvailabilityWindow>> {
        sqlx::query("SELECT * FROM availability_windows WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .as_ref()
            .map(window_from_row)
            .transpose()
    }

    async fn save_window(&self, window: AvailabilityWindow) -> Result<AvailabilityWindow> {
        sqlx::query(
            "INSERT INTO availability_windows (id, day_of_week, start_minute, end_minute, is_active) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (id) DO UPDATE SET day_of_week = EXCLUDED.day_of_week, \
             start_minute = EXCLUDED.start_minute, end_minute = EXCLUDED.end_minute, is_active = EXCLUDED.is_active",
        )
        .bind(window.id)
        .bind(i16::from(window.day_of_week.index()))
        .bind(minutes(window.start_time))
        .bind(minutes(window.end_time))
        .bind(window.is_active)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(window)
    }
}

#[async_trait]
impl AppointmentTypeRepo for PgStore {
    async fn get_type(&self, id: Uuid) -> Result<Option<AppointmentType>> {
        sqlx::query("SELECT * FROM appointment_types WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .as_ref()
            .map(type_from_row)
            .transpose()
    }

    async fn list_types(&self) -> Result<Vec<AppointmentType>> {
        sqlx::query("SELECT * FROM appointment_types ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?
            .iter()
            .map(type_from_row)
            .collect()
    }

    async fn save_type(&self, appointment_type: AppointmentType) -> Result<AppointmentType> {
        let duration = i32::try_from(appointment_type.duration_minutes)
            .map_err(|_| AppError::invalid("duration is out of range"))?;
        sqlx::query(
            "INSERT INTO appointment_types (id, name, duration_minutes, description, is_active) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, duration_minutes = EXCLUDED.duration_minutes, \
             description = EXCLUDED.description, is_active = EXCLUDED.is_active",
        )
        .bind(appointment_type.id)
        .bind(&appointment_type.name)
        .bind(duration)
        .bind(&appointment_type.description)
        .bind(appointment_type.is_active)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(appointment_type)
    }
}

#[async_trait]
impl AppointmentRepo for PgStore {
    async fn holding_on(&self, date: NaiveDate) -> Result<Vec<Appointment>> {
        sqlx::query(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE date = $1 AND status = ANY($2) ORDER BY start_minute"
        ))
        .bind(date)
        .bind(holding_statuses())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?
        .iter()
        .map(appointment_from_row)
        .collect()
    }

    async fn insert_if_free(&self, appointment: Appointment) -> Result<Appointment> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        Self::lock_day(&mut tx, appointment.date).await?;

        if Self::slot_taken(
            &mut tx,
            appointment.date,
            appointment.start_time,
            appointment.end_time,
            appointment.id,
        )
        .await?
        {
            debug!(date = %appointment.date, range = %appointment.range(), "slot taken at insert time");
            return Err(AppError::Conflict(format!(
                "{} on {} is already taken",
                appointment.range(),
                appointment.date
            )));
        }

        sqlx::query(&format!(
            "INSERT INTO appointments ({APPOINTMENT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        ))
        .bind(appointment.id)
        .bind(appointment.patient_id)
        .bind(appointment.appointment_type_id)
        .bind(appointment.date)
        .bind(minutes(appointment.start_time))
        .bind(minutes(appointment.end_time))
        .bind(appointment.status.as_str())
        .bind(appointment.handled_internally)
        .bind(appointment.created_at)
        .bind(appointment.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(appointment)
    }

    async fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>> {
        sqlx::query(&format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .as_ref()
            .map(appointment_from_row)
            .transpose()
    }

    async fn set_status(&self, id: Uuid, status: AppointmentStatus, at: DateTime<Utc>) -> Result<Appointment> {
        let current = self
            .get_appointment(id)
            .await?
            .ok_or_else(|| AppError::not_found("Appointment", id))?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        Self::lock_day(&mut tx, current.date).await?;

        let row = sqlx::query(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| AppError::not_found("Appointment", id))?;
        let locked = appointment_from_row(&row)?;

        let reclaims = status.holds_slot() && !locked.status.holds_slot();
        if reclaims && Self::slot_taken(&mut tx, locked.date, locked.start_time, locked.end_time, id).await? {
            return Err(AppError::Conflict(format!(
                "{} on {} has been booked by someone else",
                locked.range(),
                locked.date
            )));
        }

        let row = sqlx::query(&format!(
            "UPDATE appointments SET status = $2, updated_at = $3 WHERE id = $1 RETURNING {APPOINTMENT_COLUMNS}"
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(at)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
        let updated = appointment_from_row(&row)?;

        tx.commit().await.map_err(db_err)?;
        Ok(updated)
    }

    async fn set_handled_internally(&self, id: Uuid, flag: bool, at: DateTime<Utc>) -> Result<Appointment> {
        sqlx::query(&format!(
            "UPDATE appointments SET handled_internally = $2, updated_at = $3 WHERE id = $1 \
             RETURNING {APPOINTMENT_COLUMNS}"
        ))
        .bind(id)
        .bind(flag)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .as_ref()
        .map(appointment_from_row)
        .transpose()?
        .ok_or_else(|| AppError::not_found("Appointment", id))
    }

    async fn delete_appointment(&self, id: Uuid) -> Result<()> {
        let deleted = sqlx::query("DELETE FROM appointments WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?
            .rows_affected();
        if deleted == 0 {
            return Err(AppError::not_found("Appointment", id));
        }
        Ok(())
    }

    async fn list_appointments(&self, filter: AppointmentFilter) -> Result<Vec<Appointment>> {
        let mut query = QueryBuilder::<Postgres>::new(format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE TRUE"));
        if let Some(from) = filter.from {
            query.push(" AND date >= ").push_bind(from);
        }
        if let Some(to) = filter.to {
            query.push(" AND date <= ").push_bind(to);
        }
        if let Some(statuses) = &filter.statuses {
            let names: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
            query.push(" AND status = ANY(").push_bind(names).push(")");
        }
        if let Some(flag) = filter.handled_internally {
            query.push(" AND handled_internally = ").push_bind(flag);
        }
        if let Some(patient_id) = filter.patient_id {
            query.push(" AND patient_id = ").push_bind(patient_id);
        }
        query.push(" ORDER BY date, start_minute, created_at");

        query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?
            .iter()
            .map(appointment_from_row)
            .collect()
    }

    async fn save_proposal(&self, proposal: Proposal) -> Result<Proposal> {
        let result = sqlx::query(
            "INSERT INTO proposals (id, appointment_id, date, start_minute, message, created_at) \
             SELECT $1, $2, $3, $4, $5, $6 WHERE EXISTS (SELECT 1 FROM appointments WHERE id = $2) \
             ON CONFLICT (appointment_id) DO UPDATE SET id = EXCLUDED.id, date = EXCLUDED.date, \
             start_minute = EXCLUDED.start_minute, message = EXCLUDED.message, created_at = EXCLUDED.created_at",
        )
        .bind(proposal.id)
        .bind(proposal.appointment_id)
        .bind(proposal.date)
        .bind(minutes(proposal.start_time))
        .bind(&proposal.message)
        .bind(proposal.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found("Appointment", proposal.appointment_id));
        }
        Ok(proposal)
    }

    async fn get_proposal(&self, appointment_id: Uuid) -> Result<Option<Proposal>> {
        sqlx::query("SELECT * FROM proposals WHERE appointment_id = $1")
            .bind(appointment_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .as_ref()
            .map(proposal_from_row)
            .transpose()
    }
}

#[async_trait]
impl PatientRepo for PgStore {
    async fn get_patient(&self, id: Uuid) -> Result<Option<Patient>> {
        sqlx::query("SELECT id, name, email FROM patients WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .as_ref()
            .map(patient_from_row)
            .transpose()
    }

    async fn find_patient_by_email(&self, email: &str) -> Result<Option<Patient>> {
        sqlx::query("SELECT id, name, email FROM patients WHERE LOWER(email) = LOWER($1)")
            .bind(email.trim())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .as_ref()
            .map(patient_from_row)
            .transpose()
    }

    async fn save_patient(&self, patient: Patient) -> Result<Patient> {
        sqlx::query(
            "INSERT INTO patients (id, name, email) VALUES ($1, $2, $3) \
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, email = EXCLUDED.email",
        )
        .bind(patient.id)
        .bind(&patient.name)
        .bind(&patient.email)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(patient)
    }
}

#[async_trait]
impl AccountRepo for PgStore {
    async fn find_account_by_email(&self, email: &str) -> Result<Option<UserAccount>> {
        sqlx::query("SELECT id, email, password_hash, role FROM user_accounts WHERE LOWER(email) = LOWER($1)")
            .bind(email.trim())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .as_ref()
            .map(account_from_row)
            .transpose()
    }

    async fn save_account(&self, account: UserAccount) -> Result<UserAccount> {
        sqlx::query(
            "INSERT INTO user_accounts (id, email, password_hash, role) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO UPDATE SET email = EXCLUDED.email, password_hash = EXCLUDED.password_hash, \
             role = EXCLUDED.role",
        )
        .bind(account.id)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(account.role.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(account)
    }
}
