//! Mapping of the domain error taxonomy onto HTTP.

use domains::AppError;
use serde::Serialize;

/// Message shown instead of collaborator details.
pub const UNAVAILABLE_MESSAGE: &str = "a required service is temporarily unavailable";

pub fn status_code(err: &AppError) -> u16 {
    match err {
        AppError::InvalidInput(_) => 400,
        AppError::NotFound(..) => 404,
        AppError::Conflict(_) | AppError::InvalidTransition { .. } => 409,
        AppError::Throttled(_) => 429,
        AppError::Unauthorized(_) => 401,
        AppError::Forbidden(_) => 403,
        AppError::CollaboratorUnavailable(_) => 503,
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub kind: &'static str,
    pub message: String,
}

impl From<&AppError> for ErrorBody {
    fn from(err: &AppError) -> Self {
        let message = match err {
            AppError::CollaboratorUnavailable(_) => UNAVAILABLE_MESSAGE.to_string(),
            other => other.to_string(),
        };
        Self {
            error: ErrorDetail {
                kind: err.kind(),
                message,
            },
        }
    }
}

#[cfg(feature = "web-axum")]
mod axum_response {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::Json;
    use tracing::{error, warn};

    /// Handler-side wrapper so `?` works on `domains::Result`.
    #[derive(Debug)]
    pub struct ApiError(pub AppError);

    impl From<AppError> for ApiError {
        fn from(err: AppError) -> Self {
            Self(err)
        }
    }

    impl IntoResponse for ApiError {
        fn into_response(self) -> Response {
            let status = StatusCode::from_u16(status_code(&self.0)).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            match &self.0 {
                AppError::CollaboratorUnavailable(detail) => error!(%detail, "collaborator unavailable"),
                AppError::Throttled(limiter) => warn!(%limiter, "request throttled"),
                _ => {}
            }
            (status, Json(ErrorBody::from(&self.0))).into_response()
        }
    }
}

#[cfg(feature = "web-axum")]
pub use axum_response::ApiError;

#[cfg(test)]
mod tests {
    use super::*;
    use domains::AppointmentStatus;

    #[test]
    fn taxonomy_maps_to_http_statuses() {
        assert_eq!(status_code(&AppError::invalid("x")), 400);
        assert_eq!(status_code(&AppError::not_found("Appointment", "1")), 404);
        assert_eq!(status_code(&AppError::Conflict("x".into())), 409);
        assert_eq!(
            status_code(&AppError::InvalidTransition {
                from: AppointmentStatus::Completed,
                to: AppointmentStatus::Pending,
            }),
            409
        );
        assert_eq!(status_code(&AppError::Throttled("booking".into())), 429);
        assert_eq!(status_code(&AppError::Unauthorized("x".into())), 401);
        assert_eq!(status_code(&AppError::Forbidden("x".into())), 403);
        assert_eq!(status_code(&AppError::unavailable("db down")), 503);
    }

    #[test]
    fn collaborator_details_stay_private() {
        let body = serde_json::to_value(ErrorBody::from(&AppError::unavailable("postgres at 10.0.0.5 refused"))).unwrap();
        assert_eq!(body["error"]["kind"], "collaborator_unavailable");
        assert_eq!(body["error"]["message"], UNAVAILABLE_MESSAGE);
    }
}
