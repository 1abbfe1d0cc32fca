use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs;
use utoipa::ToSchema;
use uuid::Uuid;

use super::ServiceError;
use crate::config::{JwtAlgorithm, JwtConfig};

/// Distinguishes the three token kinds so one can never stand in for another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
    Mfa,
}

trait TypedClaims {
    fn token_type(&self) -> TokenType;
}

/// Claims for access tokens (short-lived)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (user ID)
    pub sub: Uuid,
    /// Tenant ID
    pub tid: Uuid,
    /// Session the token was issued under
    pub sid: Uuid,
    pub email: String,
    /// JWT ID (for blacklisting)
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub typ: TokenType,
}

/// Claims for refresh tokens. Expiry matches the owning session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    pub sub: Uuid,
    pub tid: Uuid,
    pub sid: Uuid,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub typ: TokenType,
}

/// Claims for the interim token handed out when a password check passed but
/// a second factor is still required.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MfaChallengeClaims {
    pub sub: Uuid,
    pub tid: Uuid,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub typ: TokenType,
}

impl TypedClaims for AccessTokenClaims {
    fn token_type(&self) -> TokenType {
        self.typ
    }
}

impl TypedClaims for RefreshTokenClaims {
    fn token_type(&self) -> TokenType {
        self.typ
    }
}

impl TypedClaims for MfaChallengeClaims {
    fn token_type(&self) -> TokenType {
        self.typ
    }
}

/// Token response returned to client
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

impl TokenResponse {
    pub fn new(access_token: String, refresh_token: String, expires_in: i64) -> Self {
        Self {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in,
        }
    }
}

/// JWT service for token generation and validation
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    issuer: String,
    access_token_expiry_minutes: i64,
    refresh_token_expiry_days: i64,
    mfa_token_expiry_minutes: i64,
}

impl JwtService {
    /// Build keys from the configured algorithm: a shared secret for HS256 or
    /// PEM files for RS256.
    pub fn new(config: &JwtConfig) -> Result<Self, anyhow::Error> {
        let (encoding_key, decoding_key, algorithm) = match config.algorithm {
            JwtAlgorithm::HS256 => {
                let secret = config
                    .secret
                    .as_deref()
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| anyhow::anyhow!("JWT secret is required for HS256"))?;
                (
                    EncodingKey::from_secret(secret.as_bytes()),
                    DecodingKey::from_secret(secret.as_bytes()),
                    Algorithm::HS256,
                )
            }
            JwtAlgorithm::RS256 => {
                let private_key_pem = read_key(config.private_key_path.as_deref(), "private")?;
                let public_key_pem = read_key(config.public_key_path.as_deref(), "public")?;
                (
                    EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
                        .map_err(|e| anyhow::anyhow!("Failed to parse private key: {}", e))?,
                    DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
                        .map_err(|e| anyhow::anyhow!("Failed to parse public key: {}", e))?,
                    Algorithm::RS256,
                )
            }
        };

        tracing::info!(algorithm = ?algorithm, "JWT service initialized");

        Ok(Self {
            encoding_key,
            decoding_key,
            algorithm,
            issuer: config.issuer.clone(),
            access_token_expiry_minutes: config.access_token_expiry_minutes,
            refresh_token_expiry_days: config.refresh_token_expiry_days,
            mfa_token_expiry_minutes: config.mfa_token_expiry_minutes,
        })
    }

    /// Generate an access token bound to a session. The token never outlives
    /// `session_expiry`.
    pub fn generate_access_token(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        session_id: Uuid,
        email: &str,
        session_expiry: DateTime<Utc>,
    ) -> Result<String, anyhow::Error> {
        let now = Utc::now();
        let claims = AccessTokenClaims {
            sub: user_id,
            tid: tenant_id,
            sid: session_id,
            email: email.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: self.access_token_expiry(now, session_expiry).timestamp(),
            iss: self.issuer.clone(),
            typ: TokenType::Access,
        };
        self.sign(&claims)
    }

    /// Generate a refresh token expiring together with its session.
    pub fn generate_refresh_token(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        session_id: Uuid,
        expiry: DateTime<Utc>,
    ) -> Result<String, anyhow::Error> {
        let claims = RefreshTokenClaims {
            sub: user_id,
            tid: tenant_id,
            sid: session_id,
            jti: Uuid::new_v4().to_string(),
            iat: Utc::now().timestamp(),
            exp: expiry.timestamp(),
            iss: self.issuer.clone(),
            typ: TokenType::Refresh,
        };
        self.sign(&claims)
    }

    /// Generate an MFA challenge token. Returns the token and its claims.
    pub fn generate_mfa_token(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<(String, MfaChallengeClaims), anyhow::Error> {
        let now = Utc::now();
        let claims = MfaChallengeClaims {
            sub: user_id,
            tid: tenant_id,
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::minutes(self.mfa_token_expiry_minutes)).timestamp(),
            iss: self.issuer.clone(),
            typ: TokenType::Mfa,
        };
        let token = self.sign(&claims)?;
        Ok((token, claims))
    }

    pub fn validate_access_token(&self, token: &str) -> Result<AccessTokenClaims, ServiceError> {
        self.validate(token, TokenType::Access)
    }

    pub fn validate_refresh_token(&self, token: &str) -> Result<RefreshTokenClaims, ServiceError> {
        self.validate(token, TokenType::Refresh)
    }

    pub fn validate_mfa_token(&self, token: &str) -> Result<MfaChallengeClaims, ServiceError> {
        self.validate(token, TokenType::Mfa)
    }

    /// Get access token expiry in seconds (for client info)
    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_expiry_minutes * 60
    }

    /// Seconds an access token issued now for this session stays valid.
    pub fn access_token_expires_in(&self, session_expiry: DateTime<Utc>) -> i64 {
        let now = Utc::now();
        (self.access_token_expiry(now, session_expiry) - now)
            .num_seconds()
            .max(0)
    }

    fn access_token_expiry(&self, now: DateTime<Utc>, session_expiry: DateTime<Utc>) -> DateTime<Utc> {
        (now + Duration::minutes(self.access_token_expiry_minutes)).min(session_expiry)
    }

    pub fn refresh_token_expiry_days(&self) -> i64 {
        self.refresh_token_expiry_days
    }

    pub fn mfa_token_expiry_seconds(&self) -> i64 {
        self.mfa_token_expiry_minutes * 60
    }

    fn sign<T: Serialize>(&self, claims: &T) -> Result<String, anyhow::Error> {
        encode(&Header::new(self.algorithm), claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode token: {}", e))
    }

    fn validate<T>(&self, token: &str, expected: TokenType) -> Result<T, ServiceError>
    where
        T: DeserializeOwned + TypedClaims,
    {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 5;
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        let claims = decode::<T>(token, &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => ServiceError::TokenExpired,
                _ => {
                    tracing::debug!(error = %e, "Token rejected");
                    ServiceError::InvalidToken
                }
            })?
            .claims;

        if claims.token_type() != expected {
            tracing::warn!(
                expected = ?expected,
                actual = ?claims.token_type(),
                "Token presented with wrong type"
            );
            return Err(ServiceError::InvalidToken);
        }

        Ok(claims)
    }
}

fn read_key(path: Option<&str>, kind: &str) -> Result<String, anyhow::Error> {
    let path = path.ok_or_else(|| anyhow::anyhow!("JWT {} key path is not configured", kind))?;
    fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {} key from {}: {}", kind, path, e))
}
