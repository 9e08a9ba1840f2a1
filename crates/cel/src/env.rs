//! 编译环境：变量声明与编译期上限

use std::collections::BTreeMap;

use crate::ast::Ast;
use crate::checker;
use crate::error::CompileError;
use crate::parse::{self, Limits};
use crate::program::Program;
use crate::types::Type;

/// 编译环境
#[derive(Debug, Clone, Default)]
pub struct Env {
    declarations: BTreeMap<String, Type>,
    limits: Limits,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// 声明变量（构建器形式）
    pub fn variable(mut self, name: impl Into<String>, ty: Type) -> Self {
        self.declare(name, ty);
        self
    }

    /// 声明变量，返回被覆盖的旧类型
    pub fn declare(&mut self, name: impl Into<String>, ty: Type) -> Option<Type> {
        self.declarations.insert(name.into(), ty)
    }

    pub fn lookup(&self, name: &str) -> Option<&Type> {
        self.declarations.get(name)
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn parse(&self, source: &str) -> Result<Ast, CompileError> {
        parse::parse(source, &self.limits)
    }

    pub fn check(&self, ast: &Ast) -> Result<Program, CompileError> {
        checker::check(self, ast)
    }

    /// 解析并检查
    pub fn compile(&self, source: &str) -> Result<Program, CompileError> {
        let ast = self.parse(source)?;
        self.check(&ast)
    }
}
