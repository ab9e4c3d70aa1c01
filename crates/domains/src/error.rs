//! # AppError
//!
//! Centralized error handling for the booking core.
//! Every port and service returns this type so the transport layer can map
//! each kind to a response without inspecting messages.

use thiserror::Error;

use crate::models::AppointmentStatus;

/// The primary error type for all booking operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Malformed date, time, duration or status value. Never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Referenced entity absent (e.g., Appointment, AppointmentType)
    #[error("{0} not found with ID {1}")]
    NotFound(String, String),

    /// Slot no longer free at insert time, or a duplicate unique key.
    /// Callers are expected to re-fetch slots and retry.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Status change refused by the strict transition graph.
    #[error("cannot move appointment from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    /// Rate limit exceeded; carries the name of the limiter that refused.
    #[error("too many requests: {0}")]
    Throttled(String),

    /// Missing or invalid credentials
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated, but the role does not allow the operation
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Data store, limiter backend or notification sender failure
    #[error("collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),
}

impl AppError {
    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::NotFound(entity.to_string(), id.to_string())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn unavailable(msg: impl ToString) -> Self {
        Self::CollaboratorUnavailable(msg.to_string())
    }

    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::NotFound(..) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Throttled(_) => "throttled",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::CollaboratorUnavailable(_) => "collaborator_unavailable",
        }
    }
}

/// A specialized Result type for booking logic.
pub type Result<T> = std::result::Result<T, AppError>;
