pub mod admin;
pub mod auth;
pub mod authz;

pub use admin::admin_auth_middleware;
pub use auth::{auth_middleware, AuthUser};
pub use authz::require_permission;
