//! HTTP 请求处理器

pub mod check;
pub mod dsl;
pub mod health;
