//! # Rate Limiting
//!
//! Fixed-window request counters keyed by an identifier string.
//!
//! Each protected surface (general API traffic, booking submissions,
//! authentication attempts) has its own limiter with its own configuration
//! and counters. The in-process limiter keeps its counters in a `DashMap`;
//! the read-modify-write of one identifier happens under that entry's shard
//! lock, so concurrent checks for the same identifier never both take the
//! last admission.
//!
//! # Memory
//!
//! Expired entries are removed by `sweep`, driven by a background
//! [`SweeperHandle`] whose interval is much coarser than any window. Stopping
//! the handle is explicit; nothing here is process-global.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use domains::{AppError, Clock, RateLimit, Result};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Configuration of one limiter instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Length of one fixed window in milliseconds.
    pub window_ms: u64,
    /// Admissions allowed per identifier per window.
    pub max_requests: u32,
}

impl RateLimitConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(i64::try_from(self.window_ms).unwrap_or(i64::MAX))
    }
}

/// Counter for one identifier within its current window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitEntry {
    pub count: u32,
    pub reset_time: DateTime<Utc>,
}

impl RateLimitEntry {
    fn fresh(now: DateTime<Utc>, window: chrono::Duration) -> Self {
        Self {
            count: 1,
            reset_time: now + window,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.reset_time
    }
}

/// In-process fixed-window limiter.
pub struct FixedWindowLimiter {
    name: String,
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    entries: DashMap<String, RateLimitEntry>,
}

impl FixedWindowLimiter {
    pub fn new(name: impl Into<String>, config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            entries: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Counts one request for `identifier`; `false` means throttled, in which
    /// case nothing is mutated.
    pub fn admit(&self, identifier: &str) -> bool {
        let now = self.clock.now();
        let admitted = match self.entries.entry(identifier.to_owned()) {
            Entry::Vacant(vacant) => {
                vacant.insert(RateLimitEntry::fresh(now, self.config.window()));
                true
            }
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.is_expired(now) {
                    *entry = RateLimitEntry::fresh(now, self.config.window());
                    true
                } else if entry.count < self.config.max_requests {
                    entry.count += 1;
                    true
                } else {
                    false
                }
            }
        };

        if !admitted {
            debug!(limiter = %self.name, identifier, "request throttled");
        }
        admitted
    }

    /// Removes entries whose window has passed. Returns how many went.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = !entry.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    pub fn tracked(&self) -> usize {
        self.entries.len()
    }

    pub fn entry(&self, identifier: &str) -> Option<RateLimitEntry> {
        self.entries.get(identifier).map(|e| e.clone())
    }
}

#[async_trait]
impl RateLimit for FixedWindowLimiter {
    async fn check(&self, identifier: &str) -> Result<bool> {
        Ok(self.admit(identifier))
    }
}

/// Background cleanup of expired limiter entries.
pub struct SweeperHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Spawns the sweep loop on the current tokio runtime.
    pub fn spawn(limiters: Vec<Arc<FixedWindowLimiter>>, every: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let every = every.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        for limiter in &limiters {
                            let removed = limiter.sweep();
                            if removed > 0 {
                                debug!(limiter = limiter.name(), removed, "swept expired rate limit entries");
                            }
                        }
                    }
                }
            }
            debug!("rate limit sweeper stopped");
        });

        Self { cancel, task }
    }

    /// Stops the loop and waits for it to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            warn!(error = %err, "rate limit sweeper ended abnormally");
        }
    }
}

/// The protected surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimiterName {
    General,
    Booking,
    Auth,
}

impl LimiterName {
    pub const ALL: [LimiterName; 3] = [LimiterName::General, LimiterName::Booking, LimiterName::Auth];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Booking => "booking",
            Self::Auth => "auth",
        }
    }
}

impl fmt::Display for LimiterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LimiterName {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| AppError::invalid(format!("'{s}' is not a rate limiter")))
    }
}

/// One configuration per protected surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfigs {
    pub general: RateLimitConfig,
    pub booking: RateLimitConfig,
    pub auth: RateLimitConfig,
}

impl LimiterConfigs {
    pub fn get(&self, name: LimiterName) -> RateLimitConfig {
        match name {
            LimiterName::General => self.general,
            LimiterName::Booking => self.booking,
            LimiterName::Auth => self.auth,
        }
    }
}

/// The set of limiters the gateway consults.
#[derive(Clone)]
pub struct RateLimiters {
    general: Arc<dyn RateLimit>,
    booking: Arc<dyn RateLimit>,
    auth: Arc<dyn RateLimit>,
}

impl RateLimiters {
    pub fn new(general: Arc<dyn RateLimit>, booking: Arc<dyn RateLimit>, auth: Arc<dyn RateLimit>) -> Self {
        Self { general, booking, auth }
    }

    /// In-process limiters. The returned handles are what a sweeper needs.
    pub fn in_memory(configs: LimiterConfigs, clock: Arc<dyn Clock>) -> (Self, Vec<Arc<FixedWindowLimiter>>) {
        let [general, booking, auth] = LimiterName::ALL
            .map(|name| Arc::new(FixedWindowLimiter::new(name.as_str(), configs.get(name), clock.clone())));
        let handles = vec![general.clone(), booking.clone(), auth.clone()];
        (Self::new(general, booking, auth), handles)
    }

    pub fn get(&self, name: LimiterName) -> &Arc<dyn RateLimit> {
        match name {
            LimiterName::General => &self.general,
            LimiterName::Booking => &self.booking,
            LimiterName::Auth => &self.auth,
        }
    }

    /// `true` admits, `false` throttles.
    pub async fn check_rate(&self, identifier: &str, name: LimiterName) -> Result<bool> {
        self.get(name).check(identifier).await
    }

    /// Like `check_rate`, with throttling turned into `Throttled`.
    pub async fn admit(&self, identifier: &str, name: LimiterName) -> Result<()> {
        if self.check_rate(identifier, name).await? {
            Ok(())
        } else {
            Err(AppError::Throttled(name.to_string()))
        }
    }
}
