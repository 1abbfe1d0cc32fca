pub mod mfa;
pub mod registration;
pub mod session;

pub use mfa::verify_mfa;
pub use registration::register;
pub use session::{introspect, login, logout, refresh};
