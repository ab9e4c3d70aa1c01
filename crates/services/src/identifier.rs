//! Client identifier extraction for rate limiting.
//!
//! Proxies are trusted: the first `X-Forwarded-For` hop wins, then
//! `X-Real-IP`. What happens when neither is present is an explicit policy.

use domains::{AppError, Result};
use serde::{Deserialize, Serialize};

/// Bucket shared by every client that could not be identified.
pub const UNKNOWN_CLIENT: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierPolicy {
    /// Unidentified clients share the `unknown` counter.
    #[default]
    SharedBucket,
    /// Unidentified clients are refused outright.
    Reject,
}

pub fn resolve_client_identifier(
    forwarded_for: Option<&str>,
    real_ip: Option<&str>,
    policy: IdentifierPolicy,
) -> Result<String> {
    let forwarded = forwarded_for
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty());
    let real = real_ip.map(str::trim).filter(|ip| !ip.is_empty());

    match (forwarded.or(real), policy) {
        (Some(identifier), _) => Ok(identifier.to_string()),
        (None, IdentifierPolicy::SharedBucket) => Ok(UNKNOWN_CLIENT.to_string()),
        (None, IdentifierPolicy::Reject) => Err(AppError::Forbidden("client could not be identified".into())),
    }
}
