//! 可嵌入的布尔表达式库
//!
//! 支持 CEL 兼容的表达式子集：字面量、比较与逻辑运算、算术、
//! `size` / `contains` / `startsWith` / `endsWith` / `matches` 以及类型转换函数。
//!
//! 编译分为两步：解析（带长度与嵌套上限）和静态类型检查；求值在
//! [`EvalContext`] 给定的截止时间、步数预算与取消标志下进行。
//!
//! ```
//! use std::collections::HashMap;
//! use ve_cel::{Env, EvalContext, Type, Value};
//!
//! let env = Env::new().variable("price", Type::Int);
//! let program = env.compile("price > 0").unwrap();
//!
//! let mut vars = HashMap::new();
//! vars.insert("price".to_string(), Value::Int(-100));
//! assert!(!program.evaluate(&vars, &EvalContext::new()).unwrap());
//! ```

pub mod ast;
mod checker;
mod env;
pub mod error;
mod eval;
mod parse;
mod program;
pub mod types;
pub mod value;

pub use ast::Ast;
pub use env::Env;
pub use error::{CompileError, CompileErrorKind, EvalError, EvalErrorKind};
pub use eval::{CancelFlag, EvalContext};
pub use parse::Limits;
pub use program::{Activation, Program};
pub use types::{Type, UnknownTypeError};
pub use value::Value;
