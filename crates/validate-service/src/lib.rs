//! 规则校验服务（HTTP）
//!
//! 对外提供规则注册与批量校验的 REST API。
//!
//! ## 核心功能
//!
//! - **规则注册**：`POST /v1/dsl` 原子注册一组校验定义，`GET /v1/dsl` 查看已注册定义
//! - **规则试运行**：`POST /v1/dsl/test` 编译并运行测试用例，不提交
//! - **批量校验**：`POST /v1/check` 按条目返回校验结论与诊断
//!
//! ## 模块结构
//!
//! - `dto`: 请求和响应的数据传输对象
//! - `error`: 错误类型定义
//! - `handlers`: HTTP 请求处理器
//! - `middleware`: 认证中间件
//! - `routes`: 路由与中间件栈
//! - `state`: 应用状态

pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

pub use error::{ApiError, Result};
pub use routes::build_router;
pub use state::AppState;
