//! TOTP second factor and single-use backup codes.

use chrono::Utc;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use totp_rs::{Algorithm, Secret, TOTP};
use uuid::Uuid;

use super::{CredentialStore, ServiceError, TokenBlacklist};
use crate::config::MfaConfig;
use crate::models::User;

const DIGITS: usize = 6;
const STEP_SECONDS: u64 = 30;
/// Accept the previous and next step to absorb clock drift.
const SKEW_STEPS: i64 = 1;
/// Long enough to cover every step accepted around the current one.
const USED_CODE_TTL_SECONDS: i64 = 90;
/// Window for second-factor attempts outside the sign-in challenge.
const ATTEMPT_WINDOW_SECONDS: i64 = 900;

const BACKUP_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const BACKUP_CODE_LEN: usize = 12;
const BACKUP_CODE_GROUP: usize = 4;

/// Which factor satisfied a verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecondFactor {
    Totp,
    BackupCode,
}

impl SecondFactor {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecondFactor::Totp => "totp",
            SecondFactor::BackupCode => "backup_code",
        }
    }
}

/// Fresh enrollment material returned to the user once.
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub secret: String,
    pub otpauth_url: String,
}

fn attempts_key(user_id: Uuid) -> String {
    format!("mfa_attempts:user:{}", user_id)
}

#[derive(Clone)]
pub struct MfaService {
    store: Arc<dyn CredentialStore>,
    cache: Arc<dyn TokenBlacklist>,
    config: MfaConfig,
}

impl MfaService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        cache: Arc<dyn TokenBlacklist>,
        config: MfaConfig,
    ) -> Self {
        Self {
            store,
            cache,
            config,
        }
    }

    pub fn max_verify_attempts(&self) -> u32 {
        self.config.max_verify_attempts
    }

    /// Count one attempt at a signed-in user's second factor (disable,
    /// backup code regeneration). Fails once the window's budget is spent.
    pub async fn begin_attempt(&self, user_id: Uuid) -> Result<(), ServiceError> {
        let attempts = self
            .cache
            .increment(&attempts_key(user_id), ATTEMPT_WINDOW_SECONDS)
            .await
            .map_err(ServiceError::Internal)?;
        if attempts > i64::from(self.config.max_verify_attempts) {
            tracing::warn!(user_id = %user_id, "Second-factor attempt budget exhausted");
            return Err(ServiceError::MfaAttemptsExceeded);
        }
        Ok(())
    }

    /// Forget counted attempts after a successful verification.
    pub async fn reset_attempts(&self, user_id: Uuid) -> Result<(), ServiceError> {
        self.cache
            .delete_cache(&attempts_key(user_id))
            .await
            .map_err(ServiceError::Internal)
    }

    /// Generate a new base32 secret and its provisioning URL.
    pub fn enroll(&self, account: &str) -> Result<Enrollment, ServiceError> {
        let secret = Secret::generate_secret().to_encoded().to_string();
        let totp = self.totp(&secret, account)?;
        Ok(Enrollment {
            otpauth_url: totp.get_url(),
            secret,
        })
    }

    /// Check a TOTP code, rejecting one already accepted for this user.
    pub async fn verify_totp(
        &self,
        user_id: Uuid,
        secret: &str,
        code: &str,
    ) -> Result<bool, ServiceError> {
        let code = code.trim();
        if !is_totp_code(code) {
            return Ok(false);
        }

        let totp = self.totp(secret, "verify")?;
        let now = Utc::now().timestamp();

        for offset in -SKEW_STEPS..=SKEW_STEPS {
            let at = now + offset * STEP_SECONDS as i64;
            if at < 0 {
                continue;
            }
            let expected = totp.generate(at as u64);
            if !bool::from(expected.as_bytes().ct_eq(code.as_bytes())) {
                continue;
            }

            let step = at as u64 / STEP_SECONDS;
            let first_use = self
                .cache
                .set_cache_if_absent(
                    &format!("totp_used:{}:{}", user_id, step),
                    "1",
                    USED_CODE_TTL_SECONDS,
                )
                .await
                .map_err(ServiceError::Internal)?;
            if !first_use {
                tracing::warn!(user_id = %user_id, "Replayed TOTP code rejected");
            }
            return Ok(first_use);
        }

        Ok(false)
    }

    /// Verify either factor for an MFA-enabled user. A matched backup code is
    /// removed from the store atomically and from `user.backup_code_hashes`.
    pub async fn verify_second_factor(
        &self,
        user: &mut User,
        code: &str,
    ) -> Result<Option<SecondFactor>, ServiceError> {
        let secret = user
            .mfa_secret
            .clone()
            .ok_or(ServiceError::MfaNotEnabled)?;

        if is_totp_code(code.trim()) {
            let ok = self.verify_totp(user.user_id, &secret, code).await?;
            return Ok(ok.then_some(SecondFactor::Totp));
        }

        if !is_backup_code(code) {
            return Ok(None);
        }
        let consumed = self
            .store
            .consume_backup_code(user.tenant_id, user.user_id, &hash_backup_code(code))
            .await?;
        if !consumed {
            return Ok(None);
        }
        consume_backup_code(&mut user.backup_code_hashes, code);
        tracing::info!(
            user_id = %user.user_id,
            remaining = user.backup_code_hashes.len(),
            "Backup code used"
        );
        Ok(Some(SecondFactor::BackupCode))
    }

    /// Generate the configured number of backup codes. Returns the plaintext
    /// codes for display and their hashes for storage.
    pub fn generate_backup_codes(&self) -> (Vec<String>, Vec<String>) {
        let mut rng = rand::thread_rng();
        (0..self.config.backup_code_count)
            .map(|_| {
                let raw: String = (0..BACKUP_CODE_LEN)
                    .map(|_| {
                        let idx = rng.gen_range(0..BACKUP_CODE_ALPHABET.len());
                        BACKUP_CODE_ALPHABET[idx] as char
                    })
                    .collect();
                let hash = hash_backup_code(&raw);
                (format_backup_code(&raw), hash)
            })
            .unzip()
    }

    fn totp(&self, secret: &str, account: &str) -> Result<TOTP, ServiceError> {
        let secret_bytes = Secret::Encoded(secret.to_string())
            .to_bytes()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Invalid TOTP secret: {:?}", e)))?;

        TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            1,
            STEP_SECONDS,
            secret_bytes,
            Some(self.config.issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("TOTP init error: {}", e)))
    }
}

fn is_totp_code(code: &str) -> bool {
    code.len() == DIGITS && code.bytes().all(|b| b.is_ascii_digit())
}

fn is_backup_code(code: &str) -> bool {
    normalize_backup_code(code).len() == BACKUP_CODE_LEN
}

/// Uppercase and drop separators so `abcd-efgh-jkmn` matches `ABCDEFGHJKMN`.
pub fn normalize_backup_code(code: &str) -> String {
    code.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

pub fn hash_backup_code(code: &str) -> String {
    hex::encode(Sha256::digest(normalize_backup_code(code).as_bytes()))
}

fn format_backup_code(raw: &str) -> String {
    raw.as_bytes()
        .chunks(BACKUP_CODE_GROUP)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join("-")
}

/// Remove the matching hash, if any. Returns whether a code was consumed.
pub fn consume_backup_code(hashes: &mut Vec<String>, code: &str) -> bool {
    if !is_backup_code(code) {
        return false;
    }
    let candidate = hash_backup_code(code);
    let found = hashes
        .iter()
        .position(|h| bool::from(h.as_bytes().ct_eq(candidate.as_bytes())));
    match found {
        Some(idx) => {
            hashes.swap_remove(idx);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tenant;
    use crate::services::{MockBlacklist, MockCredentialStore, TenantRegistration};

    fn service() -> MfaService {
        service_with(Arc::new(MockCredentialStore::new()))
    }

    fn service_with(store: Arc<dyn CredentialStore>) -> MfaService {
        MfaService::new(
            store,
            Arc::new(MockBlacklist::new()),
            MfaConfig {
                issuer: "Identity".to_string(),
                backup_code_count: 10,
                max_verify_attempts: 5,
            },
        )
    }

    fn current_code(svc: &MfaService, secret: &str) -> String {
        svc.totp(secret, "verify")
            .unwrap()
            .generate(Utc::now().timestamp() as u64)
    }

    #[test]
    fn test_enroll_produces_otpauth_url() {
        let enrollment = service().enroll("alice@example.com").unwrap();
        assert!(enrollment.otpauth_url.starts_with("otpauth://totp/"));
        assert!(enrollment.otpauth_url.contains(&enrollment.secret));
    }

    #[tokio::test]
    async fn test_totp_code_accepted_once() {
        let svc = service();
        let secret = svc.enroll("alice@example.com").unwrap().secret;
        let user_id = Uuid::new_v4();
        let code = current_code(&svc, &secret);

        assert!(svc.verify_totp(user_id, &secret, &code).await.unwrap());
        assert!(!svc.verify_totp(user_id, &secret, &code).await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_totp_code_rejected() {
        let svc = service();
        let secret = svc.enroll("alice@example.com").unwrap().secret;
        let code = current_code(&svc, &secret);
        let wrong = if code == "000000" { "111111" } else { "000000" };
        assert!(!svc
            .verify_totp(Uuid::new_v4(), &secret, wrong)
            .await
            .unwrap());
        assert!(!svc
            .verify_totp(Uuid::new_v4(), &secret, "12ab56")
            .await
            .unwrap());
    }

    #[test]
    fn test_backup_codes_format() {
        let (codes, hashes) = service().generate_backup_codes();
        assert_eq!(codes.len(), 10);
        assert_eq!(hashes.len(), 10);
        for code in &codes {
            assert_eq!(code.len(), 14);
            assert_eq!(code.matches('-').count(), 2);
        }
    }

    #[test]
    fn test_backup_code_single_use_and_case_insensitive() {
        let (codes, mut hashes) = service().generate_backup_codes();
        let lowered = codes[3].to_lowercase().replace('-', "");

        assert!(consume_backup_code(&mut hashes, &lowered));
        assert_eq!(hashes.len(), 9);
        assert!(!consume_backup_code(&mut hashes, &codes[3]));
    }

    #[tokio::test]
    async fn test_second_factor_accepts_backup_code_once() {
        let store = Arc::new(MockCredentialStore::new());
        let svc = service_with(store.clone());
        let (codes, hashes) = svc.generate_backup_codes();
        let tenant = Tenant::new("acme".to_string(), "Acme".to_string());
        let mut user = User::new(tenant.tenant_id, "a@b.io", "hash".to_string(), None);
        user.mfa_secret = Some(svc.enroll("a@b.io").unwrap().secret);
        user.mfa_enabled = true;
        user.backup_code_hashes = hashes;
        store
            .register_tenant(&TenantRegistration {
                tenant,
                roles: Vec::new(),
                owner: user.clone(),
                owner_role_ids: Vec::new(),
            })
            .await
            .unwrap();

        // Two stale copies of the same user race on one code.
        let mut other = user.clone();
        let factor = svc.verify_second_factor(&mut user, &codes[0]).await.unwrap();
        assert_eq!(factor, Some(SecondFactor::BackupCode));
        assert_eq!(user.backup_code_hashes.len(), 9);
        assert_eq!(
            svc.verify_second_factor(&mut other, &codes[0]).await.unwrap(),
            None
        );

        let stored = store
            .find_user(user.tenant_id, user.user_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.backup_code_hashes.len(), 9);
    }

    #[tokio::test]
    async fn test_attempt_budget_resets_after_success() {
        let svc = service();
        let user_id = Uuid::new_v4();
        for _ in 0..5 {
            svc.begin_attempt(user_id).await.unwrap();
        }
        assert!(matches!(
            svc.begin_attempt(user_id).await,
            Err(ServiceError::MfaAttemptsExceeded)
        ));

        svc.reset_attempts(user_id).await.unwrap();
        assert!(svc.begin_attempt(user_id).await.is_ok());
    }
}
