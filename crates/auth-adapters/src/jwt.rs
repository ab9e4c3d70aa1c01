//! Stateless HS256 session tokens.
//!
//! Expiry is checked against the injected clock rather than the library's
//! own reading of system time.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use domains::{AccountRepo, AppError, Clock, IdentityProvider, Principal, Result, Role, Session};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::password::verify_credentials;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: Uuid,
    role: Role,
    iat: i64,
    exp: i64,
}

pub struct JwtIdentityProvider {
    accounts: Arc<dyn AccountRepo>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtIdentityProvider {
    pub fn new(accounts: Arc<dyn AccountRepo>, clock: Arc<dyn Clock>, secret: &[u8], ttl_minutes: u32) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        Self {
            accounts,
            clock,
            ttl: Duration::minutes(i64::from(ttl_minutes)),
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn login(&self, email: &str, password: &str) -> Result<Session> {
        let account = verify_credentials(self.accounts.as_ref(), email, password).await?;
        let now = self.clock.now();
        let expires_at = now + self.ttl;
        let claims = Claims {
            sub: account.id,
            role: account.role,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AppError::unavailable(format!("token signing: {e}")))?;

        Ok(Session {
            token,
            principal: Principal {
                user_id: account.id,
                role: account.role,
            },
            expires_at,
        })
    }

    fn authenticate(&self, token: &str) -> Result<Principal> {
        let claims = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| {
                debug!(error = %e, "token rejected");
                AppError::Unauthorized("invalid session token".into())
            })?
            .claims;
        if claims.exp <= self.clock.now().timestamp() {
            return Err(AppError::Unauthorized("session expired".into()));
        }
        Ok(Principal {
            user_id: claims.sub,
            role: claims.role,
        })
    }
}
