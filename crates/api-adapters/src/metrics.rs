//! Prometheus metrics for the booking core, exposed at `GET /metrics`.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use domains::{AppError, AppointmentStatus, RateLimit, Result};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;
use services::{LimiterName, NotificationOutcome, StatusChange};
use tracing::debug;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct LimiterLabels {
    pub limiter: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StatusLabels {
    pub status: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    pub method: String,
    pub status: String,
}

pub struct Metrics {
    registry: Registry,
    admissions: Family<LimiterLabels, Counter>,
    throttles: Family<LimiterLabels, Counter>,
    appointments_created: Counter,
    booking_conflicts: Counter,
    status_transitions: Family<StatusLabels, Counter>,
    notification_failures: Counter,
    http_requests: Family<RequestLabels, Counter>,
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("medibook");
        let admissions = Family::<LimiterLabels, Counter>::default();
        let throttles = Family::<LimiterLabels, Counter>::default();
        let appointments_created = Counter::default();
        let booking_conflicts = Counter::default();
        let status_transitions = Family::<StatusLabels, Counter>::default();
        let notification_failures = Counter::default();
        let http_requests = Family::<RequestLabels, Counter>::default();

        registry.register("rate_limit_admissions", "Requests admitted per limiter", admissions.clone());
        registry.register("rate_limit_throttles", "Requests throttled per limiter", throttles.clone());
        registry.register("appointments_created", "Appointments persisted", appointments_created.clone());
        registry.register(
            "booking_conflicts",
            "Bookings refused because the slot was taken",
            booking_conflicts.clone(),
        );
        registry.register(
            "status_transitions",
            "Status changes by target status",
            status_transitions.clone(),
        );
        registry.register(
            "notification_failures",
            "Status changes whose notification was not delivered",
            notification_failures.clone(),
        );
        registry.register("http_requests", "HTTP requests by method and status", http_requests.clone());

        Self {
            registry,
            admissions,
            throttles,
            appointments_created,
            booking_conflicts,
            status_transitions,
            notification_failures,
            http_requests,
        }
    }

    pub fn record_admission(&self, limiter: LimiterName, admitted: bool) {
        let labels = LimiterLabels {
            limiter: limiter.to_string(),
        };
        if admitted {
            self.admissions.get_or_create(&labels).inc();
        } else {
            self.throttles.get_or_create(&labels).inc();
        }
    }

    pub fn record_booking<T>(&self, outcome: &std::result::Result<T, AppError>) {
        match outcome {
            Ok(_) => {
                self.appointments_created.inc();
            }
            Err(AppError::Conflict(_)) => {
                self.booking_conflicts.inc();
            }
            Err(_) => {}
        }
    }

    pub fn record_status_change(&self, change: &StatusChange) {
        self.record_transition(change.appointment.status);
        if matches!(change.notification, NotificationOutcome::Failed { .. }) {
            self.notification_failures.inc();
        }
    }

    fn record_transition(&self, status: AppointmentStatus) {
        self.status_transitions
            .get_or_create(&StatusLabels {
                status: status.as_str().to_string(),
            })
            .inc();
    }

    pub fn record_request(&self, method: &str, status: u16) {
        self.http_requests
            .get_or_create(&RequestLabels {
                method: method.to_string(),
                status: status.to_string(),
            })
            .inc();
    }

    /// OpenMetrics text exposition.
    pub fn encode(&self) -> Result<String> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry).map_err(|e| AppError::unavailable(format!("metrics encoding: {e}")))?;
        Ok(buffer)
    }
}

/// Counts every decision of the wrapped limiter.
pub struct MeteredRateLimit {
    inner: Arc<dyn RateLimit>,
    name: LimiterName,
    metrics: Arc<Metrics>,
}

impl MeteredRateLimit {
    pub fn wrap(inner: Arc<dyn RateLimit>, name: LimiterName, metrics: Arc<Metrics>) -> Arc<dyn RateLimit> {
        Arc::new(Self { inner, name, metrics })
    }
}

#[async_trait]
impl RateLimit for MeteredRateLimit {
    async fn check(&self, identifier: &str) -> Result<bool> {
        let admitted = self.inner.check(identifier).await?;
        if !admitted {
            debug!(limiter = %self.name, identifier, "throttled");
        }
        self.metrics.record_admission(self.name, admitted);
        Ok(admitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domains::MockRateLimit;

    #[tokio::test]
    async fn metered_limiter_counts_both_outcomes() {
        let metrics = Arc::new(Metrics::new());
        let mut inner = MockRateLimit::new();
        let mut calls = 0;
        inner.expect_check().returning(move |_| {
            calls += 1;
            Ok(calls <= 2)
        });
        let limiter = MeteredRateLimit::wrap(Arc::new(inner), LimiterName::Booking, metrics.clone());

        for _ in 0..3 {
            limiter.check("203.0.113.7").await.unwrap();
        }

        let text = metrics.encode().unwrap();
        assert!(text.contains(r#"medibook_rate_limit_admissions_total{limiter="booking"} 2"#));
        assert!(text.contains(r#"medibook_rate_limit_throttles_total{limiter="booking"} 1"#));
    }

    #[test]
    fn bookings_split_into_created_and_conflicts() {
        let metrics = Metrics::new();
        metrics.record_booking(&Ok::<(), AppError>(()));
        metrics.record_booking::<()>(&Err(AppError::Conflict("taken".into())));
        metrics.record_booking::<()>(&Err(AppError::invalid("bad date")));

        let text = metrics.encode().unwrap();
        assert!(text.contains("medibook_appointments_created_total 1"));
        assert!(text.contains("medibook_booking_conflicts_total 1"));
    }
}
