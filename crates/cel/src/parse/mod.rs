//! 表达式解析
//!
//! 解析前先做长度与嵌套深度预检查，解析后再检查语法树高度，
//! 保证递归下降与后续的类型检查、求值都不会耗尽栈空间。

mod grammar;

use crate::ast::Ast;
use crate::error::CompileError;

/// 编译期资源上限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// 表达式源码最大字节数
    pub max_expression_length: usize,
    /// 括号、方括号与 `?:` 的最大嵌套层数
    pub max_nesting_depth: usize,
    /// 语法树最大高度
    pub max_ast_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_expression_length: 2048,
            max_nesting_depth: 64,
            max_ast_depth: 256,
        }
    }
}

/// 解析表达式
pub fn parse(source: &str, limits: &Limits) -> Result<Ast, CompileError> {
    if source.trim().is_empty() {
        return Err(CompileError::syntax("expression is empty"));
    }
    if source.len() > limits.max_expression_length {
        return Err(CompileError::syntax(format!(
            "expression length {} exceeds limit of {}",
            source.len(),
            limits.max_expression_length
        )));
    }

    let nesting = nesting_depth(source);
    if nesting > limits.max_nesting_depth {
        return Err(CompileError::syntax(format!(
            "expression nesting depth {} exceeds limit of {}",
            nesting, limits.max_nesting_depth
        )));
    }

    let root = grammar::parse_expression(source)?;

    let depth = root.depth();
    if depth > limits.max_ast_depth {
        return Err(CompileError::syntax(format!(
            "expression tree depth {} exceeds limit of {}",
            depth, limits.max_ast_depth
        )));
    }

    Ok(Ast {
        source: source.to_string(),
        root,
    })
}

/// 不解析语法，只按字符扫描嵌套层数（跳过字符串字面量）
pub(crate) fn nesting_depth(source: &str) -> usize {
    let mut depth = 0usize;
    let mut max = 0usize;
    let mut quote: Option<char> = None;
    let mut chars = source.chars();

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            if c == '\\' {
                chars.next();
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' | '[' | '?' => {
                depth += 1;
                max = max.max(depth);
            }
            ')' | ']' | ':' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    max
}
