//! Layered application settings.
//!
//! Sources, later ones winning: built-in defaults, `config/default.toml`,
//! `config/{MEDIBOOK_ENV}.toml`, then `MEDIBOOK__SECTION__KEY` environment
//! variables. All files are optional.

use std::collections::HashMap;
use std::path::Path;

use config::builder::{ConfigBuilder, DefaultState};
use config::{Config, Environment, File};
use secrecy::SecretString;
use serde::Deserialize;
use services::{IdentifierPolicy, LimiterConfigs, LimiterName, RateLimitConfig, TransitionPolicy};

use crate::error::{ConfigError, Result};

pub const ENV_PREFIX: &str = "MEDIBOOK";

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub redis: RedisSettings,
    pub auth: AuthSettings,
    pub rate_limits: RateLimitSettings,
    #[serde(default)]
    pub identifier_policy: IdentifierPolicy,
    pub clinic: ClinicSettings,
    pub mail: MailSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl ServerSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DatabaseSettings {
    /// Absent means the in-memory store.
    pub url: Option<SecretString>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Default, Deserialize)]
pub struct RedisSettings {
    /// Absent means in-process rate limiting.
    pub url: Option<SecretString>,
}

#[derive(Debug, Deserialize)]
pub struct AuthSettings {
    /// Absent means opaque in-memory sessions.
    pub jwt_secret: Option<SecretString>,
    pub session_ttl_minutes: u32,
    pub allow_anonymous_booking: bool,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateLimitSettings {
    pub general: RateLimitConfig,
    pub booking: RateLimitConfig,
    pub auth: RateLimitConfig,
    pub sweep_interval_ms: u64,
}

impl RateLimitSettings {
    pub fn limiters(&self) -> LimiterConfigs {
        LimiterConfigs {
            general: self.general,
            booking: self.booking,
            auth: self.auth,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClinicSettings {
    pub provider_name: String,
    pub utc_offset_minutes: i32,
    pub strict_transitions: bool,
}

impl ClinicSettings {
    pub fn transition_policy(&self) -> TransitionPolicy {
        if self.strict_transitions {
            TransitionPolicy::Strict
        } else {
            TransitionPolicy::Permissive
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailSettings {
    /// Absent means notifications are only logged.
    pub relay_url: Option<String>,
    pub from_address: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    pub level: String,
    pub format: LogFormat,
}

impl Settings {
    /// Loads `.env`, then every source from `./config`.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let profile = std::env::var(format!("{ENV_PREFIX}_ENV")).ok();
        Self::from_sources(Path::new("config"), profile.as_deref(), None)
    }

    /// `env_vars` replaces the process environment when given.
    pub fn from_sources(
        config_dir: &Path,
        profile: Option<&str>,
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<Self> {
        let mut builder = defaults(Config::builder())?
            .add_source(File::from(config_dir.join("default.toml")).required(false));
        if let Some(profile) = profile {
            builder = builder.add_source(File::from(config_dir.join(format!("{profile}.toml"))).required(false));
        }
        let settings: Settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .source(env_vars),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        for name in LimiterName::ALL {
            let limit = self.rate_limits.limiters().get(name);
            if limit.window_ms == 0 || limit.max_requests == 0 {
                return Err(ConfigError::Invalid(format!(
                    "rate_limits.{name} needs a positive window_ms and max_requests"
                )));
            }
            if self.rate_limits.sweep_interval_ms < limit.window_ms {
                return Err(ConfigError::Invalid(format!(
                    "rate_limits.sweep_interval_ms must be at least the {name} window ({} ms)",
                    limit.window_ms
                )));
            }
        }
        if self.auth.session_ttl_minutes == 0 {
            return Err(ConfigError::Invalid("auth.session_ttl_minutes must be positive".into()));
        }
        if self.clinic.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(ConfigError::Invalid(
                "clinic.utc_offset_minutes must lie within one day".into(),
            ));
        }
        if self.clinic.provider_name.trim().is_empty() {
            return Err(ConfigError::Invalid("clinic.provider_name must not be empty".into()));
        }
        if self.mail.timeout_ms == 0 {
            return Err(ConfigError::Invalid("mail.timeout_ms must be positive".into()));
        }
        Ok(())
    }
}

fn defaults(builder: ConfigBuilder<DefaultState>) -> Result<ConfigBuilder<DefaultState>> {
    Ok(builder
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 8080)?
        .set_default("database.max_connections", 10)?
        .set_default("auth.session_ttl_minutes", 480)?
        .set_default("auth.allow_anonymous_booking", true)?
        .set_default("rate_limits.general.window_ms", 900_000)?
        .set_default("rate_limits.general.max_requests", 100)?
        .set_default("rate_limits.booking.window_ms", 3_600_000)?
        .set_default("rate_limits.booking.max_requests", 10)?
        .set_default("rate_limits.auth.window_ms", 900_000)?
        .set_default("rate_limits.auth.max_requests", 5)?
        .set_default("rate_limits.sweep_interval_ms", 3_600_000)?
        .set_default("clinic.provider_name", "Medibook Clinic")?
        .set_default("clinic.utc_offset_minutes", 0)?
        .set_default("clinic.strict_transitions", false)?
        .set_default("mail.from_address", "no-reply@medibook.local")?
        .set_default("mail.timeout_ms", 10_000)?
        .set_default("log.level", "info")?
        .set_default("log.format", "pretty")?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }

    fn no_files() -> &'static Path {
        Path::new("/nonexistent/medibook-config")
    }

    #[test]
    fn defaults_alone_are_valid() {
        let settings = Settings::from_sources(no_files(), None, env(&[])).unwrap();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.identifier_policy, IdentifierPolicy::SharedBucket);
        assert_eq!(settings.rate_limits.auth.max_requests, 5);
        assert_eq!(settings.clinic.transition_policy(), TransitionPolicy::Permissive);
        assert!(settings.database.url.is_none());
        assert_eq!(settings.log.format, LogFormat::Pretty);
    }

    #[test]
    fn environment_overrides_nested_keys() {
        let settings = Settings::from_sources(
            no_files(),
            None,
            env(&[
                ("MEDIBOOK__SERVER__PORT", "9090"),
                ("MEDIBOOK__RATE_LIMITS__BOOKING__MAX_REQUESTS", "3"),
                ("MEDIBOOK__IDENTIFIER_POLICY", "reject"),
                ("MEDIBOOK__CLINIC__STRICT_TRANSITIONS", "true"),
                ("MEDIBOOK__AUTH__JWT_SECRET", "s3cret-s3cret"),
                ("MEDIBOOK__LOG__FORMAT", "json"),
            ]),
        )
        .unwrap();
        assert_eq!(settings.server.port, 9090);
        assert_eq!(settings.rate_limits.booking.max_requests, 3);
        assert_eq!(settings.identifier_policy, IdentifierPolicy::Reject);
        assert_eq!(settings.clinic.transition_policy(), TransitionPolicy::Strict);
        assert_eq!(
            settings.auth.jwt_secret.as_ref().map(|s| s.expose_secret().to_string()),
            Some("s3cret-s3cret".to_string())
        );
        assert_eq!(settings.log.format, LogFormat::Json);
    }

    #[test]
    fn secrets_are_redacted_in_debug_output() {
        let settings = Settings::from_sources(
            no_files(),
            None,
            env(&[("MEDIBOOK__DATABASE__URL", "postgres://app:hunter2@db/medibook")]),
        )
        .unwrap();
        assert!(!format!("{settings:?}").contains("hunter2"));
    }

    #[test]
    fn zero_limits_are_rejected() {
        let err = Settings::from_sources(
            no_files(),
            None,
            env(&[("MEDIBOOK__RATE_LIMITS__AUTH__MAX_REQUESTS", "0")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn sweep_must_be_coarser_than_windows() {
        let err = Settings::from_sources(
            no_files(),
            None,
            env(&[("MEDIBOOK__RATE_LIMITS__SWEEP_INTERVAL_MS", "1000")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("sweep_interval_ms"));
    }
}
