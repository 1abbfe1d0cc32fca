//! HTTP handlers for identity-service.

pub mod admin;
pub mod audit;
pub mod auth;
pub mod authz;
pub mod invitation;
pub mod me;
pub mod metrics;
pub mod mfa;
pub mod role;
pub mod tenant;
pub mod user;
