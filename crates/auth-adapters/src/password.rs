//! Argon2 credential handling shared by every identity provider.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use domains::{AccountRepo, AppError, Result, UserAccount};
use tracing::debug;

/// PHC-formatted Argon2id hash with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String> {
    if password.is_empty() {
        return Err(AppError::invalid("password must not be empty"));
    }
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::unavailable(format!("password hashing: {e}")))
}

/// Malformed hashes never verify.
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(p) => p,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Looks the account up and checks the password. Unknown email and wrong
/// password are indistinguishable to the caller.
pub async fn verify_credentials(accounts: &dyn AccountRepo, email: &str, password: &str) -> Result<UserAccount> {
    let refused = || AppError::Unauthorized("invalid email or password".into());
    let account = accounts
        .find_account_by_email(email.trim())
        .await?
        .ok_or_else(refused)?;
    if !verify_password(password, &account.password_hash) {
        debug!(account_id = %account.id, "password mismatch");
        return Err(refused());
    }
    Ok(account)
}
