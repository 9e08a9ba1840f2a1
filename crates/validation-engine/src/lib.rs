//! 校验规则引擎
//!
//! 提供规则注册与批量校验能力：
//! - 注册时一次性编译全部表达式，任一失败则整体拒绝
//! - 已编译规则以不可变快照形式共享，读路径无锁
//! - 批量校验按分片并行求值，结果顺序与请求一致

pub mod adapter;
pub mod error;
pub mod models;
pub mod registration;
pub mod store;
pub mod validation;

pub use adapter::{CompiledExpression, CompiledValidation, ExpressionAdapter, ParsedDefinition};
pub use error::{EngineError, RejectedError, Result};
pub use models::{
    Accepted, Diagnostic, DiagnosticError, ErrorKind, RegistrationRequest, TestCase, TestReport,
    TestResult, ValidationDefinition, ValidationItem, VariableDecl, Verdict,
};
pub use registration::RegistrationService;
pub use store::{RuleSetStore, StoreStats};
pub use validation::{CancelOnDrop, ValidationService};
