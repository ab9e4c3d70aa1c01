//! Sender that only records the notification in the trace log. Used when no
//! mail relay is configured.

use async_trait::async_trait;
use domains::{NotificationPayload, Notifier, Result};
use tracing::info;

#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_confirmed(&self, payload: &NotificationPayload) -> Result<()> {
        info!(
            to = %payload.patient_email,
            date = %payload.date,
            time = %payload.time,
            appointment_type = %payload.appointment_type_name,
            "appointment confirmed notice"
        );
        Ok(())
    }

    async fn send_cancelled(&self, payload: &NotificationPayload) -> Result<()> {
        info!(
            to = %payload.patient_email,
            date = %payload.date,
            time = %payload.time,
            appointment_type = %payload.appointment_type_name,
            "appointment cancelled notice"
        );
        Ok(())
    }
}
