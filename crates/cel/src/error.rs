//! 表达式编译与求值错误

use serde::Serialize;
use thiserror::Error;

/// 编译错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompileErrorKind {
    #[serde(rename = "SyntaxError")]
    Syntax,
    #[serde(rename = "TypeError")]
    Type,
    UnknownIdentifier,
}

impl CompileErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompileErrorKind::Syntax => "SyntaxError",
            CompileErrorKind::Type => "TypeError",
            CompileErrorKind::UnknownIdentifier => "UnknownIdentifier",
        }
    }
}

/// 表达式编译错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}: {message}", kind.as_str())]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub message: String,
}

impl CompileError {
    pub fn syntax(message: impl Into<String>) -> Self {
        Self {
            kind: CompileErrorKind::Syntax,
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self {
            kind: CompileErrorKind::Type,
            message: message.into(),
        }
    }

    pub fn unknown_identifier(name: &str) -> Self {
        Self {
            kind: CompileErrorKind::UnknownIdentifier,
            message: format!("undeclared reference to '{}'", name),
        }
    }
}

/// 求值错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EvalErrorKind {
    TypeMismatch,
    #[serde(rename = "RuntimeError")]
    Runtime,
    Timeout,
    Cancelled,
}

impl EvalErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvalErrorKind::TypeMismatch => "TypeMismatch",
            EvalErrorKind::Runtime => "RuntimeError",
            EvalErrorKind::Timeout => "Timeout",
            EvalErrorKind::Cancelled => "Cancelled",
        }
    }
}

/// 表达式求值错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}: {message}", kind.as_str())]
pub struct EvalError {
    pub kind: EvalErrorKind,
    pub message: String,
}

impl EvalError {
    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self {
            kind: EvalErrorKind::TypeMismatch,
            message: message.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self {
            kind: EvalErrorKind::Runtime,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: EvalErrorKind::Timeout,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: EvalErrorKind::Cancelled,
            message: "evaluation cancelled".to_string(),
        }
    }

    /// `&&` / `||` 可以吸收的错误；超时与取消始终向上传播
    pub fn is_absorbable(&self) -> bool {
        matches!(
            self.kind,
            EvalErrorKind::TypeMismatch | EvalErrorKind::Runtime
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CompileError::unknown_identifier("price");
        assert_eq!(
            err.to_string(),
            "UnknownIdentifier: undeclared reference to 'price'"
        );

        let err = EvalError::runtime("division by zero");
        assert_eq!(err.to_string(), "RuntimeError: division by zero");
    }

    #[test]
    fn test_absorbable_kinds() {
        assert!(EvalError::type_mismatch("x").is_absorbable());
        assert!(EvalError::runtime("x").is_absorbable());
        assert!(!EvalError::timeout("x").is_absorbable());
        assert!(!EvalError::cancelled().is_absorbable());
    }

    #[test]
    fn test_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&CompileErrorKind::Type).unwrap(),
            "\"TypeError\""
        );
        assert_eq!(
            serde_json::to_string(&EvalErrorKind::Runtime).unwrap(),
            "\"RuntimeError\""
        );
    }
}
