//! medibook/crates/configs/src/lib.rs
//!
//! Typed settings for the server and the seed command.

pub mod error;
pub mod settings;

pub use error::{ConfigError, Result};
pub use settings::{
    AuthSettings, ClinicSettings, DatabaseSettings, LogFormat, LogSettings, MailSettings, RateLimitSettings,
    RedisSettings, ServerSettings, Settings, ENV_PREFIX,
};
