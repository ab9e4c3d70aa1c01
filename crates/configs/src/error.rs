use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid settings: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
