//! Route handlers. Each one translates the request, calls the gateway and
//! records metrics; no booking rule lives here.

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use domains::{
    AppError, Appointment, AppointmentFilter, AppointmentStatus, AppointmentType, AvailabilityWindow, DayOfWeek,
    Proposal, Session, Slot, TimeOfDay,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use services::gateway::parse_optional_date;
use services::{BookingRequest, NotificationOutcome, ProposalRequest, StatusChange, TypeUpdate, WindowUpdate};
use uuid::Uuid;

use super::extract::{Body, Caller, IdPath};
use super::AppState;
use crate::error::ApiError;

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotQuery {
    pub date: Option<String>,
    pub appointment_type_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandledRequest {
    pub handled_internally: bool,
}

/// `status` is a comma-separated list of status names.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentQuery {
    pub from: Option<String>,
    pub to: Option<String>,
    pub status: Option<String>,
    pub handled_internally: Option<bool>,
}

impl AppointmentQuery {
    fn into_filter(self) -> domains::Result<AppointmentFilter> {
        let statuses = self
            .status
            .filter(|raw| !raw.trim().is_empty())
            .map(|raw| {
                raw.split(',')
                    .map(|name| name.trim().parse::<AppointmentStatus>())
                    .collect::<domains::Result<Vec<_>>>()
            })
            .transpose()?;
        Ok(AppointmentFilter {
            from: parse_optional_date(self.from.as_deref())?,
            to: parse_optional_date(self.to.as_deref())?,
            statuses,
            handled_internally: self.handled_internally,
            patient_id: None,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    pub day: Option<DayOfWeek>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWindow {
    pub day_of_week: DayOfWeek,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewType {
    pub name: String,
    pub duration_minutes: u32,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangeView {
    pub appointment: Appointment,
    pub notification: &'static str,
    pub degraded: bool,
}

impl From<StatusChange> for StatusChangeView {
    fn from(change: StatusChange) -> Self {
        let degraded = change.is_degraded();
        let notification = match change.notification {
            NotificationOutcome::NotRequired => "not_required",
            NotificationOutcome::Sent(_) => "sent",
            NotificationOutcome::Failed { .. } => "failed",
        };
        Self {
            appointment: change.appointment,
            notification,
            degraded,
        }
    }
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn metrics(State(state): State<AppState>) -> ApiResult<Response> {
    let body = state.metrics.encode()?;
    Ok((
        [(header::CONTENT_TYPE, "application/openmetrics-text; version=1.0.0; charset=utf-8")],
        body,
    )
        .into_response())
}

pub async fn list_appointment_types(
    State(state): State<AppState>,
    Caller(ctx): Caller,
) -> ApiResult<Json<Vec<AppointmentType>>> {
    Ok(Json(state.gateway.list_appointment_types(&ctx).await?))
}

pub async fn list_slots(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Query(query): Query<SlotQuery>,
) -> ApiResult<Json<Vec<Slot>>> {
    let date = query.date.ok_or_else(|| AppError::invalid("date is required"))?;
    let type_id = query
        .appointment_type_id
        .ok_or_else(|| AppError::invalid("appointmentTypeId is required"))?;
    let type_id: Uuid = type_id
        .parse()
        .map_err(|_| AppError::invalid(format!("'{type_id}' is not a valid id")))?;
    Ok(Json(state.gateway.list_slots(&ctx, &date, type_id).await?))
}

pub async fn create_appointment(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Body(request): Body<BookingRequest>,
) -> ApiResult<(StatusCode, Json<Appointment>)> {
    let created = state.gateway.create_appointment(&ctx, request).await;
    state.metrics.record_booking(&created);
    Ok((StatusCode::CREATED, Json(created?)))
}

pub async fn my_appointments(
    State(state): State<AppState>,
    Caller(ctx): Caller,
) -> ApiResult<Json<Vec<Appointment>>> {
    Ok(Json(state.gateway.my_appointments(&ctx).await?))
}

pub async fn login(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Body(request): Body<LoginRequest>,
) -> ApiResult<Json<Session>> {
    Ok(Json(state.gateway.login(&ctx, &request.email, &request.password).await?))
}

pub async fn list_appointments(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Query(query): Query<AppointmentQuery>,
) -> ApiResult<Json<Vec<Appointment>>> {
    let filter = query.into_filter()?;
    Ok(Json(state.gateway.list_appointments(&ctx, filter).await?))
}

pub async fn open_work_count(State(state): State<AppState>, Caller(ctx): Caller) -> ApiResult<Json<serde_json::Value>> {
    let open = state.gateway.open_work_count(&ctx).await?;
    Ok(Json(json!({ "openWorkCount": open })))
}

pub async fn set_status(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    IdPath(id): IdPath,
    Body(request): Body<StatusRequest>,
) -> ApiResult<Json<StatusChangeView>> {
    let change = state.gateway.set_status(&ctx, id, &request.status).await?;
    state.metrics.record_status_change(&change);
    Ok(Json(change.into()))
}

pub async fn set_handled(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    IdPath(id): IdPath,
    Body(request): Body<HandledRequest>,
) -> ApiResult<Json<Appointment>> {
    Ok(Json(
        state
            .gateway
            .set_handled_internally(&ctx, id, request.handled_internally)
            .await?,
    ))
}

pub async fn propose_alternative(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    IdPath(id): IdPath,
    Body(request): Body<ProposalRequest>,
) -> ApiResult<(StatusCode, Json<Proposal>)> {
    let proposal = state.gateway.propose_alternative(&ctx, id, request).await?;
    Ok((StatusCode::CREATED, Json(proposal)))
}

pub async fn delete_appointment(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    IdPath(id): IdPath,
) -> ApiResult<StatusCode> {
    state.gateway.delete_appointment(&ctx, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_windows(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Query(query): Query<WindowQuery>,
) -> ApiResult<Json<Vec<AvailabilityWindow>>> {
    Ok(Json(state.gateway.list_windows(&ctx, query.day).await?))
}

pub async fn create_window(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Body(window): Body<NewWindow>,
) -> ApiResult<(StatusCode, Json<AvailabilityWindow>)> {
    let created = state
        .gateway
        .create_window(&ctx, window.day_of_week, window.start_time, window.end_time)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_window(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    IdPath(id): IdPath,
    Body(update): Body<WindowUpdate>,
) -> ApiResult<Json<AvailabilityWindow>> {
    Ok(Json(state.gateway.update_window(&ctx, id, update).await?))
}

pub async fn list_all_types(
    State(state): State<AppState>,
    Caller(ctx): Caller,
) -> ApiResult<Json<Vec<AppointmentType>>> {
    Ok(Json(state.gateway.list_all_types(&ctx).await?))
}

pub async fn create_type(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Body(new): Body<NewType>,
) -> ApiResult<(StatusCode, Json<AppointmentType>)> {
    let created = state
        .gateway
        .create_type(&ctx, &new.name, new.duration_minutes, new.description)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_type(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    IdPath(id): IdPath,
    Body(update): Body<TypeUpdate>,
) -> ApiResult<Json<AppointmentType>> {
    Ok(Json(state.gateway.update_type(&ctx, id, update).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appointment_query_parses_status_lists() {
        let filter = AppointmentQuery {
            from: Some("2026-10-19".into()),
            status: Some("PENDING, CONFIRMED".into()),
            handled_internally: Some(false),
            ..AppointmentQuery::default()
        }
        .into_filter()
        .unwrap();
        assert_eq!(
            filter.statuses,
            Some(vec![AppointmentStatus::Pending, AppointmentStatus::Confirmed])
        );
        assert_eq!(filter.from.map(|d| d.to_string()), Some("2026-10-19".to_string()));
        assert_eq!(filter.to, None);

        let err = AppointmentQuery {
            status: Some("PENDING,LATE".into()),
            ..AppointmentQuery::default()
        }
        .into_filter()
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }
}
