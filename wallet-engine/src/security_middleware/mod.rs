pub mod auth;

pub use auth::{issue_token, AuthenticatedUser, Claims, JwtAuth, Role};
