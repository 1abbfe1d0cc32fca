//! Services layer: authentication, sessions, second factor, permission
//! resolution, audit and the storage seams they sit on.

mod audit;
mod auth;
pub mod error;
mod jwt;
mod permissions;
pub mod redis;
mod sessions;
pub mod store;
mod totp;

pub use audit::AuditRecorder;
pub use auth::AuthService;
pub use error::ServiceError;
pub use jwt::{
    AccessTokenClaims, JwtService, MfaChallengeClaims, RefreshTokenClaims, TokenResponse,
    TokenType,
};
pub use permissions::PermissionResolver;
pub use self::redis::{MockBlacklist, RedisService, TokenBlacklist};
pub use sessions::{Rotation, SessionRegistry};
pub use store::{
    CredentialStore, Database, MockCredentialStore, Page, RoleGrant, TenantRegistration,
    UserFilter,
};
pub use totp::{consume_backup_code, Enrollment, MfaService, SecondFactor};
