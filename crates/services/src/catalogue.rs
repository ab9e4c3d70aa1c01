//! Administration of appointment types and weekly availability.

use std::sync::Arc;

use domains::{
    AppError, AppointmentType, AppointmentTypeRepo, AvailabilityRepo, AvailabilityWindow, DayOfWeek,
    Result, TimeOfDay, TimeRange,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

/// Partial update of an appointment type; `None` keeps the current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeUpdate {
    pub name: Option<String>,
    pub duration_minutes: Option<u32>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

/// Partial update of an availability window; `None` keeps the current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowUpdate {
    pub day_of_week: Option<DayOfWeek>,
    pub start_time: Option<TimeOfDay>,
    pub end_time: Option<TimeOfDay>,
    pub is_active: Option<bool>,
}

pub struct CatalogueService {
    availability: Arc<dyn AvailabilityRepo>,
    types: Arc<dyn AppointmentTypeRepo>,
}

impl CatalogueService {
    pub fn new(availability: Arc<dyn AvailabilityRepo>, types: Arc<dyn AppointmentTypeRepo>) -> Self {
        Self { availability, types }
    }

    /// The public listing: active types only, by name.
    pub async fn list_active_types(&self) -> Result<Vec<AppointmentType>> {
        let mut types: Vec<_> = self
            .types
            .list_types()
            .await?
            .into_iter()
            .filter(|t| t.is_active)
            .collect();
        types.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(types)
    }

    pub async fn list_all_types(&self) -> Result<Vec<AppointmentType>> {
        let mut types = self.types.list_types().await?;
        types.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(types)
    }

    pub async fn create_type(
        &self,
        name: &str,
        duration_minutes: u32,
        description: Option<String>,
    ) -> Result<AppointmentType> {
        let created = self
            .types
            .save_type(AppointmentType::new(name, duration_minutes, description)?)
            .await?;
        info!(appointment_type_id = %created.id, name = %created.name, "appointment type created");
        Ok(created)
    }

    /// Existing appointments keep their stored end time whatever the new
    /// duration or active flag.
    pub async fn update_type(&self, id: Uuid, update: TypeUpdate) -> Result<AppointmentType> {
        let current = self
            .types
            .get_type(id)
            .await?
            .ok_or_else(|| AppError::not_found("AppointmentType", id))?;

        let mut updated = AppointmentType::new(
            update.name.unwrap_or(current.name),
            update.duration_minutes.unwrap_or(current.duration_minutes),
            update.description.or(current.description),
        )?;
        updated.id = id;
        updated.is_active = update.is_active.unwrap_or(current.is_active);

        let saved = self.types.save_type(updated).await?;
        info!(appointment_type_id = %id, is_active = saved.is_active, "appointment type updated");
        Ok(saved)
    }

    pub async fn set_type_active(&self, id: Uuid, is_active: bool) -> Result<AppointmentType> {
        self.update_type(
            id,
            TypeUpdate {
                is_active: Some(is_active),
                ..TypeUpdate::default()
            },
        )
        .await
    }

    /// Windows sorted by weekday, then start time.
    pub async fn list_windows(&self, day: Option<DayOfWeek>) -> Result<Vec<AvailabilityWindow>> {
        let mut windows = self.availability.list_windows(day).await?;
        windows.sort_by_key(|w| (w.day_of_week, w.start_time, w.end_time));
        Ok(windows)
    }

    pub async fn create_window(
        &self,
        day: DayOfWeek,
        start_time: TimeOfDay,
        end_time: TimeOfDay,
    ) -> Result<AvailabilityWindow> {
        let window = self
            .availability
            .save_window(AvailabilityWindow::new(day, start_time, end_time)?)
            .await?;
        info!(window_id = %window.id, %day, range = %window.range(), "availability window created");
        Ok(window)
    }

    pub async fn update_window(&self, id: Uuid, update: WindowUpdate) -> Result<AvailabilityWindow> {
        let current = self
            .availability
            .get_window(id)
            .await?
            .ok_or_else(|| AppError::not_found("AvailabilityWindow", id))?;

        let start_time = update.start_time.unwrap_or(current.start_time);
        let end_time = update.end_time.unwrap_or(current.end_time);
        TimeRange::new(start_time, end_time)?;

        let window = AvailabilityWindow {
            id,
            day_of_week: update.day_of_week.unwrap_or(current.day_of_week),
            start_time,
            end_time,
            is_active: update.is_active.unwrap_or(current.is_active),
        };
        let saved = self.availability.save_window(window).await?;
        info!(window_id = %id, is_active = saved.is_active, "availability window updated");
        Ok(saved)
    }

    /// Windows are never deleted, only deactivated.
    pub async fn set_window_active(&self, id: Uuid, is_active: bool) -> Result<AvailabilityWindow> {
        self.update_window(
            id,
            WindowUpdate {
                is_active: Some(is_active),
                ..WindowUpdate::default()
            },
        )
        .await
    }
}
