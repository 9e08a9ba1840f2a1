//! 规则引擎错误类型

use thiserror::Error;
use ve_cel::CompileError;

/// 注册被拒绝的原因
///
/// 注册是原子的：返回任一错误时存储保持不变。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectedError {
    #[error("校验 ID 重复: {0}")]
    DuplicateId(String),

    #[error("校验 '{id}' 的表达式 '{expression}' 引用了未声明的变量: {}", .names.join(", "))]
    UnknownVariable {
        id: String,
        expression: String,
        names: Vec<String>,
    },

    #[error("校验 '{id}' 的表达式 '{expression}' 编译失败: {source}")]
    CompileFailed {
        id: String,
        expression: String,
        #[source]
        source: CompileError,
    },

    #[error("规则定义无效: {0}")]
    InvalidSchema(String),

    #[error("超出限制: {0}")]
    LimitExceeded(String),
}

impl RejectedError {
    /// 对外暴露的错误码
    pub fn code(&self) -> &'static str {
        match self {
            RejectedError::DuplicateId(_) => "DUPLICATE_ID",
            RejectedError::UnknownVariable { .. } => "UNKNOWN_VARIABLE",
            RejectedError::CompileFailed { .. } => "COMPILE_FAILED",
            RejectedError::InvalidSchema(_) => "INVALID_SCHEMA",
            RejectedError::LimitExceeded(_) => "LIMIT_EXCEEDED",
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Rejected(#[from] RejectedError),

    #[error("批量校验条目过多: {size} 超过上限 {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    #[error("读取规则文件失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("规则文件解析失败: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("校验任务执行失败: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_codes() {
        assert_eq!(RejectedError::DuplicateId("a".into()).code(), "DUPLICATE_ID");
        assert_eq!(
            RejectedError::LimitExceeded("too many".into()).code(),
            "LIMIT_EXCEEDED"
        );
    }

    #[test]
    fn test_unknown_variable_message_lists_names() {
        let err = RejectedError::UnknownVariable {
            id: "item".into(),
            expression: "a + b > 0".into(),
            names: vec!["a".into(), "b".into()],
        };
        assert!(err.to_string().contains("a, b"));
    }

    #[test]
    fn test_compile_failed_keeps_source() {
        use std::error::Error as _;

        let err = RejectedError::CompileFailed {
            id: "item".into(),
            expression: "price >".into(),
            source: CompileError::syntax("unexpected end of input"),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("SyntaxError"));
    }
}
