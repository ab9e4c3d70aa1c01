//! medibook/crates/auth-adapters/src/lib.rs
//!
//! Identity providers. Credentials are always Argon2; the session format
//! depends on the enabled features.

pub mod password;
pub mod session;

#[cfg(feature = "auth-jwt")]
pub mod jwt;

pub use password::{hash_password, verify_credentials, verify_password};
pub use session::SessionIdentityProvider;

#[cfg(feature = "auth-jwt")]
pub use jwt::JwtIdentityProvider;
