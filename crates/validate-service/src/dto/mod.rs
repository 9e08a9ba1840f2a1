//! 数据传输对象

pub mod request;
pub mod response;

pub use request::{CheckItemDto, CheckRequest, RegisterDslRequest, ValidationDto, VariableDto};
pub use response::{CheckResponse, HealthResponse};
