pub mod client;
pub mod password;
pub mod token;
pub mod validation;

pub use client::ClientInfo;
pub use password::{
    hash_password, verify_dummy_password, verify_password, Password, PasswordHashString,
    PasswordPolicy,
};
pub use token::{generate_random_token, hash_token};
pub use validation::ValidatedJson;
