use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use serde::Deserialize;
use std::fmt;
use std::sync::OnceLock;

/// Newtype for password to prevent accidental logging
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct Password(String);

impl Password {
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

/// Newtype for an encoded argon2 hash (PHC string)
#[derive(Debug, Clone)]
pub struct PasswordHashString(String);

impl PasswordHashString {
    pub fn new(hash: String) -> Self {
        Self(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Hash a password with Argon2id and a fresh random salt.
pub fn hash_password(password: &Password) -> Result<PasswordHashString, anyhow::Error> {
    let salt = SaltString::generate(&mut OsRng);

    let password_hash = Argon2::default()
        .hash_password(password.as_str().as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
        .to_string();

    Ok(PasswordHashString::new(password_hash))
}

/// Verify a password against a stored hash.
///
/// `Ok(false)` is a mismatch; `Err` means the stored hash is unreadable.
pub fn verify_password(
    password: &Password,
    password_hash: &PasswordHashString,
) -> Result<bool, anyhow::Error> {
    let parsed_hash = PasswordHash::new(password_hash.as_str())
        .map_err(|e| anyhow::anyhow!("Invalid password hash format: {}", e))?;

    Ok(Argon2::default()
        .verify_password(password.as_str().as_bytes(), &parsed_hash)
        .is_ok())
}

/// Run a full verification against a throwaway hash, for sign-in attempts
/// on an account that does not exist. Always `false`.
pub fn verify_dummy_password(password: &Password) -> bool {
    static DUMMY_HASH: OnceLock<Option<PasswordHashString>> = OnceLock::new();
    let hash = DUMMY_HASH
        .get_or_init(|| hash_password(&Password::new("unknown-account-placeholder-1")).ok());
    if let Some(hash) = hash {
        let _ = verify_password(password, hash);
    }
    false
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("Password must be at least {min_length} characters")]
    TooShort { min_length: usize },
    #[error("Password must be at most {max_length} characters")]
    TooLong { max_length: usize },
    #[error("Password must contain at least one letter and one number")]
    MissingCharacterClass,
}

/// Minimum password requirements applied on every password write.
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub min_length: usize,
}

impl PasswordPolicy {
    const MAX_LENGTH: usize = 128;

    pub fn new(min_length: usize) -> Self {
        Self { min_length }
    }

    pub fn check(&self, password: &Password) -> Result<(), PolicyError> {
        let value = password.as_str();
        let length = value.chars().count();
        if length < self.min_length {
            return Err(PolicyError::TooShort {
                min_length: self.min_length,
            });
        }
        if length > Self::MAX_LENGTH {
            return Err(PolicyError::TooLong {
                max_length: Self::MAX_LENGTH,
            });
        }
        if !value.chars().any(char::is_alphabetic) || !value.chars().any(|c| c.is_ascii_digit()) {
            return Err(PolicyError::MissingCharacterClass);
        }
        Ok(())
    }
}
