//! Notification payload assembly.

use domains::{Appointment, AppointmentType, NotificationPayload, Patient};

/// Which decision the patient is being told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Confirmed,
    Cancelled,
}

/// Result of the side effect attached to a status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    /// The transition carries no notification.
    NotRequired,
    Sent(NotificationKind),
    /// The status change stands; only the message was lost.
    Failed { kind: NotificationKind, reason: String },
}

pub fn build_payload(
    appointment: &Appointment,
    patient: &Patient,
    appointment_type: &AppointmentType,
    provider_name: &str,
) -> NotificationPayload {
    NotificationPayload {
        patient_name: patient.name.clone(),
        patient_email: patient.email.clone(),
        date: appointment.date.format("%A, %-d %B %Y").to_string(),
        time: appointment.start_time.to_string(),
        appointment_type_name: appointment_type.name.clone(),
        provider_name: provider_name.to_string(),
    }
}
