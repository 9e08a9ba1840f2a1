//! 中间件

pub mod auth;

pub use auth::{auth_middleware, Authenticator, NoAuth, PresharedKey};
