//! Sender that hands rendered messages to an HTTP mail relay.
//!
//! The relay receives `POST {relay_url}` with a JSON [`MailMessage`]. Server
//! errors and transport failures are retried with exponential backoff; any
//! other non-success status fails at once.

use std::time::Duration;

use async_trait::async_trait;
use domains::{AppError, NotificationPayload, Notifier, Result};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text: String,
}

/// Renders the patient-facing message for a decision.
pub fn render_message(payload: &NotificationPayload, confirmed: bool, from: &str) -> MailMessage {
    let (subject, body) = if confirmed {
        (
            format!("Your appointment on {} is confirmed", payload.date),
            format!(
                "Dear {},\n\nyour {} with {} on {} at {} is confirmed.\n\nSee you then.",
                payload.patient_name, payload.appointment_type_name, payload.provider_name, payload.date, payload.time
            ),
        )
    } else {
        (
            format!("Your appointment on {} was cancelled", payload.date),
            format!(
                "Dear {},\n\nyour {} with {} on {} at {} has been cancelled.\n\n\
                 Please book a new time if you still need to be seen.",
                payload.patient_name, payload.appointment_type_name, payload.provider_name, payload.date, payload.time
            ),
        )
    };
    MailMessage {
        from: from.to_string(),
        to: payload.patient_email.clone(),
        subject,
        text: body,
    }
}

pub struct MailRelayNotifier {
    client: Client,
    relay_url: String,
    from_address: String,
    max_attempts: usize,
    base_backoff: Duration,
}

impl MailRelayNotifier {
    pub fn new(relay_url: impl Into<String>, from_address: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::unavailable(format!("mail client: {e}")))?;
        Ok(Self {
            client,
            relay_url: relay_url.into(),
            from_address: from_address.into(),
            max_attempts: 3,
            base_backoff: Duration::from_millis(200),
        })
    }

    pub fn with_retries(mut self, max_attempts: usize, base_backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.base_backoff = base_backoff;
        self
    }

    async fn deliver(&self, message: &MailMessage) -> Result<()> {
        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            match self.client.post(&self.relay_url).json(message).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(attempt, to = %message.to, "mail relayed");
                    return Ok(());
                }
                Ok(response) if response.status().is_server_error() => {
                    last_error = format!("relay answered {}", response.status());
                }
                Ok(response) => {
                    return Err(AppError::unavailable(format!("relay refused message: {}", response.status())));
                }
                Err(err) => {
                    last_error = err.to_string();
                }
            }
            warn!(attempt, error = %last_error, "mail relay attempt failed");
            if attempt < self.max_attempts {
                let shift = (attempt - 1).min(8) as u32;
                tokio::time::sleep(self.base_backoff.saturating_mul(1 << shift)).await;
            }
        }
        Err(AppError::unavailable(format!("mail relay: {last_error}")))
    }
}

#[async_trait]
impl Notifier for MailRelayNotifier {
    async fn send_confirmed(&self, payload: &NotificationPayload) -> Result<()> {
        self.deliver(&render_message(payload, true, &self.from_address)).await
    }

    async fn send_cancelled(&self, payload: &NotificationPayload) -> Result<()> {
        self.deliver(&render_message(payload, false, &self.from_address)).await
    }
}
