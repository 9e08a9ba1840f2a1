//! 规则注册与校验的领域模型
//!
//! 字段名与线上 JSON 保持一致：表达式列表为 `cels`，测试用例为 `testCases`。

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use ve_cel::{EvalError, EvalErrorKind};

/// 变量声明
///
/// 类型保持为字符串，未知类型在注册时以 InvalidSchema 拒绝。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

impl VariableDecl {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// 测试用例：期望全部表达式的与运算结果为 `expected`
///
/// `variables` 既可以是 `{name: value}` 映射，也可以是 `[{name, value}]` 列表。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    #[serde(default, deserialize_with = "variables_map_or_list")]
    pub variables: HashMap<String, Value>,
    pub expected: bool,
}

fn variables_map_or_list<'de, D>(deserializer: D) -> Result<HashMap<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Named {
        name: String,
        value: Value,
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Map(HashMap<String, Value>),
        List(Vec<Named>),
    }

    Ok(match Repr::deserialize(deserializer)? {
        Repr::Map(map) => map,
        Repr::List(list) => list.into_iter().map(|v| (v.name, v.value)).collect(),
    })
}

/// 单个校验定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationDefinition {
    pub id: String,
    #[serde(rename = "cels")]
    pub expressions: Vec<String>,
    pub variables: Vec<VariableDecl>,
    #[serde(
        default,
        rename = "testCases",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub test_cases: Vec<TestCase>,
}

impl ValidationDefinition {
    pub fn new(
        id: impl Into<String>,
        expressions: Vec<&str>,
        variables: Vec<VariableDecl>,
    ) -> Self {
        Self {
            id: id.into(),
            expressions: expressions.into_iter().map(String::from).collect(),
            variables,
            test_cases: Vec::new(),
        }
    }
}

/// 注册请求
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub validations: Vec<ValidationDefinition>,
}

/// 注册成功
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accepted {
    pub registered: Vec<String>,
    pub generation: u64,
}

/// 单个校验条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationItem {
    pub id: String,
    #[serde(default)]
    pub variables: HashMap<String, Value>,
}

impl ValidationItem {
    pub fn new<K, I>(id: impl Into<String>, variables: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self {
            id: id.into(),
            variables: variables
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        }
    }
}

/// 诊断错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    TypeMismatch,
    RuntimeError,
    Timeout,
    Cancelled,
}

impl ErrorKind {
    /// 指标标签
    pub fn as_label(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::TypeMismatch => "type_mismatch",
            ErrorKind::RuntimeError => "runtime",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl From<EvalErrorKind> for ErrorKind {
    fn from(kind: EvalErrorKind) -> Self {
        match kind {
            EvalErrorKind::TypeMismatch => ErrorKind::TypeMismatch,
            EvalErrorKind::Runtime => ErrorKind::RuntimeError,
            EvalErrorKind::Timeout => ErrorKind::Timeout,
            EvalErrorKind::Cancelled => ErrorKind::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticError {
    pub kind: ErrorKind,
    pub message: String,
}

/// 单个表达式的诊断
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// NotFound 时为空
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<DiagnosticError>,
}

impl Diagnostic {
    pub fn from_outcome(expression: &str, outcome: Result<bool, EvalError>) -> Self {
        match outcome {
            Ok(passed) => Self {
                expression: Some(expression.to_string()),
                passed,
                error: None,
            },
            Err(err) => Self {
                expression: Some(expression.to_string()),
                passed: false,
                error: Some(DiagnosticError {
                    kind: err.kind.into(),
                    message: err.message,
                }),
            },
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// 单个校验条目的结论
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub id: String,
    pub passed: bool,
    pub message: String,
    pub diagnostics: Vec<Diagnostic>,
}

impl Verdict {
    /// passed 为全部诊断的与运算
    pub fn from_diagnostics(id: impl Into<String>, diagnostics: Vec<Diagnostic>) -> Self {
        let failed: Vec<&str> = diagnostics
            .iter()
            .filter(|d| !d.passed)
            .filter_map(|d| d.expression.as_deref())
            .collect();
        let message = if failed.is_empty() {
            String::new()
        } else {
            format!("failed validations: {}", failed.join(", "))
        };
        Self {
            id: id.into(),
            passed: diagnostics.iter().all(|d| d.passed),
            message,
            diagnostics,
        }
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        let id = id.into();
        let message = format!("validation '{}' is not registered", id);
        Self {
            id,
            passed: false,
            message: message.clone(),
            diagnostics: vec![Diagnostic {
                expression: None,
                passed: false,
                error: Some(DiagnosticError {
                    kind: ErrorKind::NotFound,
                    message,
                }),
            }],
        }
    }

    /// 指标标签
    pub fn result_label(&self) -> &'static str {
        if self.passed {
            "passed"
        } else if self
            .diagnostics
            .iter()
            .any(|d| d.error_kind() == Some(ErrorKind::NotFound))
        {
            "not_found"
        } else {
            "failed"
        }
    }
}

/// 单个校验定义的测试结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub id: String,
    #[serde(rename = "failedTestCases")]
    pub failed_test_cases: Vec<String>,
    #[serde(rename = "testCaseNotFound")]
    pub test_case_not_found: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    pub validations: Vec<TestResult>,
}

impl TestReport {
    pub fn all_passed(&self) -> bool {
        self.validations.iter().all(|v| v.failed_test_cases.is_empty())
    }
}
