//! 编译产物
//!
//! `Program` 是经过类型检查、函数解析与正则预编译后的可执行形式，
//! 不可变，可在线程间共享。

use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;

use regex::{Regex, RegexBuilder};

use crate::ast::BinaryOp;
use crate::error::EvalError;
use crate::eval::{EvalContext, Evaluator};
use crate::types::Type;
use crate::value::Value;

/// 正则编译后的大小上限
pub(crate) const REGEX_SIZE_LIMIT: usize = 1 << 20;

pub(crate) fn compile_regex(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TextFn {
    Contains,
    StartsWith,
    EndsWith,
}

#[derive(Debug)]
pub(crate) enum Pattern {
    Compiled(Regex),
    Dynamic(Box<Node>),
}

/// 可执行节点
#[derive(Debug)]
pub(crate) enum Node {
    Const(Value),
    Var { name: String, ty: Type },
    List(Vec<Node>),
    Not(Box<Node>),
    Neg(Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Compare(BinaryOp, Box<Node>, Box<Node>),
    In(Box<Node>, Box<Node>),
    Arith(BinaryOp, Box<Node>, Box<Node>),
    Conditional(Box<Node>, Box<Node>, Box<Node>),
    Index(Box<Node>, Box<Node>),
    Size(Box<Node>),
    Text(TextFn, Box<Node>, Box<Node>),
    Matches(Box<Node>, Pattern),
    Convert(Type, Box<Node>),
}

/// 变量绑定来源
pub trait Activation {
    fn resolve(&self, name: &str) -> Option<&Value>;
}

impl<S: BuildHasher> Activation for HashMap<String, Value, S> {
    fn resolve(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

impl Activation for BTreeMap<String, Value> {
    fn resolve(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

/// 编译后的布尔谓词
#[derive(Debug)]
pub struct Program {
    pub(crate) source: String,
    pub(crate) root: Node,
    pub(crate) references: BTreeMap<String, Type>,
}

impl Program {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// 表达式引用到的变量名（有序）
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.references.keys().map(String::as_str)
    }

    pub fn references_variable(&self, name: &str) -> bool {
        self.references.contains_key(name)
    }

    /// 在给定绑定上求值
    ///
    /// 变量缺失返回 RuntimeError，运行时类型与声明不符返回 TypeMismatch；
    /// 超出 `ctx` 的时间或步数预算返回 Timeout，被取消返回 Cancelled。
    pub fn evaluate<A: Activation + ?Sized>(
        &self,
        activation: &A,
        ctx: &EvalContext,
    ) -> Result<bool, EvalError> {
        ctx.check()?;
        let mut evaluator = Evaluator::new(activation, ctx);
        match evaluator.eval(&self.root)?.as_ref() {
            Value::Bool(b) => Ok(*b),
            other => Err(EvalError::type_mismatch(format!(
                "expression produced {}, expected bool",
                other.type_name()
            ))),
        }
    }
}
