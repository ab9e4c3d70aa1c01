//! Opaque-token sessions held in process memory. Tokens die with the
//! process; use the JWT provider when sessions must outlive restarts or be
//! shared between instances.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use dashmap::DashMap;
use domains::{AccountRepo, AppError, Clock, IdentityProvider, Principal, Result, Session};
use uuid::Uuid;

use crate::password::verify_credentials;

pub struct SessionIdentityProvider {
    accounts: Arc<dyn AccountRepo>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    sessions: DashMap<String, Session>,
}

impl SessionIdentityProvider {
    pub fn new(accounts: Arc<dyn AccountRepo>, clock: Arc<dyn Clock>, ttl_minutes: u32) -> Self {
        Self {
            accounts,
            clock,
            ttl: Duration::minutes(i64::from(ttl_minutes)),
            sessions: DashMap::new(),
        }
    }

    /// Drops every expired session; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.expires_at > now);
        before - self.sessions.len()
    }
}

#[async_trait]
impl IdentityProvider for SessionIdentityProvider {
    async fn login(&self, email: &str, password: &str) -> Result<Session> {
        let account = verify_credentials(self.accounts.as_ref(), email, password).await?;
        let session = Session {
            token: Uuid::new_v4().simple().to_string(),
            principal: Principal {
                user_id: account.id,
                role: account.role,
            },
            expires_at: self.clock.now() + self.ttl,
        };
        self.sessions.insert(session.token.clone(), session.clone());
        Ok(session)
    }

    fn authenticate(&self, token: &str) -> Result<Principal> {
        let now = self.clock.now();
        let session = self
            .sessions
            .get(token)
            .map(|s| s.clone())
            .ok_or_else(|| AppError::Unauthorized("unknown session".into()))?;
        if session.expires_at <= now {
            self.sessions.remove(token);
            return Err(AppError::Unauthorized("session expired".into()));
        }
        Ok(session.principal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::password::hash_password;
    use chrono::{TimeZone, Utc};
    use domains::{ManualClock, Role, UserAccount};
    use storage_adapters::MemoryStore;

    #[tokio::test]
    async fn sessions_expire_on_the_injected_clock() {
        let store = Arc::new(MemoryStore::new());
        let admin_id = Uuid::new_v4();
        store
            .save_account(UserAccount {
                id: admin_id,
                email: "admin@clinic.test".into(),
                password_hash: hash_password("s3cret").unwrap(),
                role: Role::Admin,
            })
            .await
            .unwrap();
        let clock = Arc::new(ManualClock::at(Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap()));
        let provider = SessionIdentityProvider::new(store, clock.clone(), 30);

        let session = provider.login("admin@clinic.test", "s3cret").await.unwrap();
        let principal = provider.authenticate(&session.token).unwrap();
        assert_eq!(principal.user_id, admin_id);
        assert!(principal.is_admin());

        clock.advance(std::time::Duration::from_secs(31 * 60));
        assert!(matches!(
            provider.authenticate(&session.token),
            Err(AppError::Unauthorized(_))
        ));
        assert_eq!(provider.purge_expired(), 0);
    }
}
