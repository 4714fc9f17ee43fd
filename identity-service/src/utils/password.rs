//! Password staging for accounts and claim challenges.
//!
//! Hashes are stored as PHC strings next to an algorithm tag. Only argon2id
//! is produced here; checking a login against a stored hash belongs to the
//! authenticating caller.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHasher, SaltString},
    Argon2,
};

use crate::config::PasswordPolicy;
use crate::services::error::IdentityError;

pub const PASSWORD_ALGO_ARGON2ID: &str = "argon2id";

/// Plaintext password. Debug output is redacted.
#[derive(Clone)]
pub struct Password(String);

impl Password {
    pub fn new(password: String) -> Self {
        Self(password)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password(***)")
    }
}

/// Reject passwords outside the configured length window (counted in chars).
pub fn check_password_policy(password: &Password, policy: &PasswordPolicy) -> Result<(), IdentityError> {
    let len = password.as_str().chars().count();
    if len < policy.min_length {
        return Err(IdentityError::PasswordPolicy(format!(
            "password must be at least {} characters",
            policy.min_length
        )));
    }
    if len > policy.max_length {
        return Err(IdentityError::PasswordPolicy(format!(
            "password must be at most {} characters",
            policy.max_length
        )));
    }
    Ok(())
}

/// Hash with argon2id and a fresh salt. Returns the PHC string to store
/// alongside [`PASSWORD_ALGO_ARGON2ID`].
pub fn hash_password(password: &Password) -> Result<String, IdentityError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_str().as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| IdentityError::Internal(anyhow::anyhow!("failed to hash password: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use argon2::password_hash::PasswordHash;

    #[test]
    fn test_hash_is_argon2id_phc() {
        let password = Password::new("correct horse battery".to_string());
        let hash = hash_password(&password).unwrap();

        let parsed = PasswordHash::new(&hash).unwrap();
        assert_eq!(parsed.algorithm.as_str(), PASSWORD_ALGO_ARGON2ID);
        assert!(parsed.salt.is_some());
    }

    #[test]
    fn test_salts_differ() {
        let password = Password::new("same password twice".to_string());
        assert_ne!(hash_password(&password).unwrap(), hash_password(&password).unwrap());
    }

    #[test]
    fn test_policy_bounds() {
        let policy = PasswordPolicy {
            min_length: 4,
            max_length: 6,
        };
        assert!(check_password_policy(&Password::new("abc".into()), &policy).is_err());
        assert!(check_password_policy(&Password::new("abcd".into()), &policy).is_ok());
        assert!(check_password_policy(&Password::new("abcdef".into()), &policy).is_ok());
        assert!(check_password_policy(&Password::new("abcdefg".into()), &policy).is_err());
    }

    #[test]
    fn test_debug_redacts() {
        let password = Password::new("hunter2".to_string());
        assert_eq!(format!("{:?}", password), "Password(***)");
    }
}
