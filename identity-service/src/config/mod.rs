use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub security: SecurityConfig,
    pub mfa: MfaConfig,
    pub invitations: InvitationConfig,
    pub swagger: SwaggerConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub enum JwtAlgorithm {
    HS256,
    RS256,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub algorithm: JwtAlgorithm,
    /// Shared secret for HS256.
    pub secret: Option<String>,
    /// PEM paths for RS256.
    pub private_key_path: Option<String>,
    pub public_key_path: Option<String>,
    pub issuer: String,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
    pub mfa_token_expiry_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub admin_api_key: String,
    pub max_failed_logins: u32,
    pub lockout_minutes: i64,
    pub password_min_length: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MfaConfig {
    /// Issuer label shown by authenticator apps.
    pub issuer: String,
    pub backup_code_count: usize,
    pub max_verify_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvitationConfig {
    pub expiry_hours: i64,
    /// Base URL of the acceptance page; the token is appended as `?token=`.
    pub accept_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwaggerConfig {
    pub enabled: SwaggerMode,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SwaggerMode {
    Public,
    Disabled,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub register_attempts: u32,
    pub register_window_seconds: u64,
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
}

impl IdentityConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let environment: Environment = env::var("ENVIRONMENT")
            .unwrap_or_else(|_| "dev".to_string())
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = IdentityConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("identity-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
            },
            redis: RedisConfig {
                url: get_env("REDIS_URL", Some("redis://127.0.0.1:6379"), is_prod)?,
            },
            jwt: JwtConfig {
                algorithm: parse_env("JWT_ALGORITHM", "HS256", is_prod)?,
                secret: env::var("JWT_SECRET").ok(),
                private_key_path: env::var("JWT_PRIVATE_KEY_PATH").ok(),
                public_key_path: env::var("JWT_PUBLIC_KEY_PATH").ok(),
                issuer: get_env("JWT_ISSUER", Some("identity-service"), is_prod)?,
                access_token_expiry_minutes: parse_env(
                    "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                    "15",
                    is_prod,
                )?,
                refresh_token_expiry_days: parse_env(
                    "JWT_REFRESH_TOKEN_EXPIRY_DAYS",
                    "7",
                    is_prod,
                )?,
                mfa_token_expiry_minutes: parse_env("JWT_MFA_TOKEN_EXPIRY_MINUTES", "5", is_prod)?,
            },
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
                admin_api_key: get_env("ADMIN_API_KEY", None, true)?,
                max_failed_logins: parse_env("MAX_FAILED_LOGINS", "5", is_prod)?,
                lockout_minutes: parse_env("LOCKOUT_MINUTES", "15", is_prod)?,
                password_min_length: parse_env("PASSWORD_MIN_LENGTH", "8", is_prod)?,
            },
            mfa: MfaConfig {
                issuer: get_env("MFA_ISSUER", Some("Identity"), is_prod)?,
                backup_code_count: parse_env("MFA_BACKUP_CODE_COUNT", "10", is_prod)?,
                max_verify_attempts: parse_env("MFA_MAX_VERIFY_ATTEMPTS", "5", is_prod)?,
            },
            invitations: InvitationConfig {
                expiry_hours: parse_env("INVITATION_EXPIRY_HOURS", "168", is_prod)?,
                accept_url: get_env(
                    "INVITATION_ACCEPT_URL",
                    Some("http://localhost:3000/invitations/accept"),
                    is_prod,
                )?,
            },
            swagger: SwaggerConfig {
                enabled: parse_env("ENABLE_SWAGGER", "public", is_prod)?,
            },
            rate_limit: RateLimitConfig {
                login_attempts: parse_env("RATE_LIMIT_LOGIN_ATTEMPTS", "10", is_prod)?,
                login_window_seconds: parse_env("RATE_LIMIT_LOGIN_WINDOW_SECONDS", "300", is_prod)?,
                register_attempts: parse_env("RATE_LIMIT_REGISTER_ATTEMPTS", "3", is_prod)?,
                register_window_seconds: parse_env(
                    "RATE_LIMIT_REGISTER_WINDOW_SECONDS",
                    "3600",
                    is_prod,
                )?,
                global_ip_limit: parse_env("RATE_LIMIT_GLOBAL_IP_LIMIT", "200", is_prod)?,
                global_ip_window_seconds: parse_env(
                    "RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS",
                    "60",
                    is_prod,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(config_error("PORT must be greater than 0"));
        }

        if self.jwt.access_token_expiry_minutes <= 0 {
            return Err(config_error("JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be positive"));
        }

        if self.jwt.refresh_token_expiry_days <= 0 {
            return Err(config_error("JWT_REFRESH_TOKEN_EXPIRY_DAYS must be positive"));
        }

        if self.jwt.mfa_token_expiry_minutes <= 0 {
            return Err(config_error("JWT_MFA_TOKEN_EXPIRY_MINUTES must be positive"));
        }

        match self.jwt.algorithm {
            JwtAlgorithm::HS256 => {
                let secret = self.jwt.secret.as_deref().unwrap_or_default();
                if secret.is_empty() {
                    return Err(config_error("JWT_SECRET is required for HS256"));
                }
                if self.environment == Environment::Prod && secret.len() < 32 {
                    return Err(config_error("JWT_SECRET must be at least 32 bytes in production"));
                }
            }
            JwtAlgorithm::RS256 => {
                if self.jwt.private_key_path.is_none() || self.jwt.public_key_path.is_none() {
                    return Err(config_error(
                        "JWT_PRIVATE_KEY_PATH and JWT_PUBLIC_KEY_PATH are required for RS256",
                    ));
                }
            }
        }

        if self.security.max_failed_logins == 0 || self.security.lockout_minutes <= 0 {
            return Err(config_error("Account lockout settings must be positive"));
        }

        if self.mfa.max_verify_attempts == 0 {
            return Err(config_error("MFA_MAX_VERIFY_ATTEMPTS must be positive"));
        }

        if self.mfa.backup_code_count == 0 {
            return Err(config_error("MFA_BACKUP_CODE_COUNT must be positive"));
        }

        if self.invitations.expiry_hours <= 0 {
            return Err(config_error("INVITATION_EXPIRY_HOURS must be positive"));
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(config_error("Wildcard CORS origin not allowed in production"));
            }

            if self.swagger.enabled == SwaggerMode::Public {
                tracing::warn!("Swagger UI is publicly accessible in production");
            }
        }

        Ok(())
    }
}

fn config_error(msg: &str) -> AppError {
    AppError::ConfigError(anyhow::anyhow!(msg.to_string()))
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = get_env(key, Some(default), is_prod)?;
    raw.trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("Invalid {}: {}", key, e)))
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl FromStr for SwaggerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(SwaggerMode::Public),
            "disabled" => Ok(SwaggerMode::Disabled),
            _ => Err(format!("Invalid swagger mode: {}", s)),
        }
    }
}

impl FromStr for JwtAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "HS256" => Ok(JwtAlgorithm::HS256),
            "RS256" => Ok(JwtAlgorithm::RS256),
            _ => Err(format!("Unsupported JWT algorithm: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev_config() -> IdentityConfig {
        IdentityConfig {
            common: core_config::Config::default(),
            environment: Environment::Dev,
            service_name: "identity-service".to_string(),
            service_version: "0.0.0".to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            database: DatabaseConfig {
                url: "postgres://localhost/identity".to_string(),
                max_connections: 5,
                min_connections: 1,
            },
            redis: RedisConfig {
                url: "redis://localhost".to_string(),
            },
            jwt: JwtConfig {
                algorithm: JwtAlgorithm::HS256,
                secret: Some("dev-secret".to_string()),
                private_key_path: None,
                public_key_path: None,
                issuer: "identity".to_string(),
                access_token_expiry_minutes: 15,
                refresh_token_expiry_days: 7,
                mfa_token_expiry_minutes: 5,
            },
            security: SecurityConfig {
                allowed_origins: vec!["http://localhost:3000".to_string()],
                admin_api_key: "admin".to_string(),
                max_failed_logins: 5,
                lockout_minutes: 15,
                password_min_length: 8,
            },
            mfa: MfaConfig {
                issuer: "Identity".to_string(),
                backup_code_count: 10,
                max_verify_attempts: 5,
            },
            invitations: InvitationConfig {
                expiry_hours: 168,
                accept_url: "http://localhost:3000/invitations/accept".to_string(),
            },
            swagger: SwaggerConfig {
                enabled: SwaggerMode::Public,
            },
            rate_limit: RateLimitConfig {
                login_attempts: 10,
                login_window_seconds: 300,
                register_attempts: 3,
                register_window_seconds: 3600,
                global_ip_limit: 200,
                global_ip_window_seconds: 60,
            },
        }
    }

    #[test]
    fn test_validate_rejects_zero_mfa_limits() {
        assert!(dev_config().validate().is_ok());

        let mut config = dev_config();
        config.mfa.max_verify_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = dev_config();
        config.mfa.backup_code_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_short_prod_secret() {
        let mut config = dev_config();
        config.environment = Environment::Prod;
        assert!(config.validate().is_err());

        config.jwt.secret = Some("x".repeat(32));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Prod);
        assert_eq!("rs256".parse::<JwtAlgorithm>().unwrap(), JwtAlgorithm::RS256);
        assert_eq!("disabled".parse::<SwaggerMode>().unwrap(), SwaggerMode::Disabled);
        assert!("staging".parse::<Environment>().is_err());
        assert!("ES256".parse::<JwtAlgorithm>().is_err());
    }

    #[test]
    fn test_get_env_requires_value_in_prod() {
        let key = "IDENTITY_TEST_SURELY_UNSET_KEY";
        assert!(get_env(key, Some("fallback"), true).is_err());
        assert_eq!(get_env(key, Some("fallback"), false).unwrap(), "fallback");
        assert!(get_env(key, None, false).is_err());
    }

    #[test]
    fn test_parse_env_reports_bad_numbers() {
        let key = "IDENTITY_TEST_UNSET_NUMBER";
        let parsed: u32 = parse_env(key, "42", false).unwrap();
        assert_eq!(parsed, 42);
        let bad: Result<u32, _> = parse_env(key, "forty-two", false);
        assert!(bad.is_err());
    }
}
