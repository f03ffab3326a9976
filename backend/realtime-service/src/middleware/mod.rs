pub mod auth;
pub mod error_handling;
pub mod guards;

pub use auth::{IdentityVerifier, JwtAuth, UserId};
pub use guards::User;
