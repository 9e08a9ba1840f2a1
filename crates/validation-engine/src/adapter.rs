//! 表达式适配层
//!
//! 将注册请求中的变量声明转换为编译环境，编译表达式，
//! 并把请求中的 JSON 取值按声明类型转换为求值所需的值。

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use ve_cel::{
    Activation, Ast, CancelFlag, CompileError, Env, EvalContext, EvalError, Limits, Program,
    Type, Value,
};
use ve_shared::config::EngineConfig;

use crate::error::RejectedError;
use crate::models::{ValidationDefinition, VariableDecl};

/// 编译后的单个表达式
#[derive(Debug)]
pub struct CompiledExpression {
    pub source: String,
    pub program: Program,
}

/// 编译后的校验定义
///
/// 提交到存储后不可变，generation 与 registered_at 由存储在提交时写入。
#[derive(Debug)]
pub struct CompiledValidation {
    pub definition: ValidationDefinition,
    pub schema: BTreeMap<String, Type>,
    pub expressions: Vec<CompiledExpression>,
    pub generation: u64,
    pub registered_at: DateTime<Utc>,
}

impl CompiledValidation {
    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn variable_type(&self, name: &str) -> Option<&Type> {
        self.schema.get(name)
    }
}

/// 已解析、尚未类型检查的校验定义
pub struct ParsedDefinition<'a> {
    definition: &'a ValidationDefinition,
    env: Env,
    schema: BTreeMap<String, Type>,
    asts: Vec<Result<Ast, CompileError>>,
}

/// 表达式适配器
#[derive(Debug, Clone)]
pub struct ExpressionAdapter {
    limits: Limits,
    eval_timeout: Duration,
    max_eval_steps: u64,
    max_value_bytes: usize,
}

impl Default for ExpressionAdapter {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl ExpressionAdapter {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            limits: Limits {
                max_expression_length: config.max_expression_length,
                max_nesting_depth: config.max_nesting_depth,
                ..Limits::default()
            },
            eval_timeout: Duration::from_millis(config.eval_timeout_ms),
            max_eval_steps: config.max_eval_steps,
            max_value_bytes: config.max_value_bytes,
        }
    }

    /// 由变量声明构建编译环境
    ///
    /// 变量名为空、重复或类型未知时拒绝。
    pub fn schema(
        &self,
        id: &str,
        variables: &[VariableDecl],
    ) -> Result<(Env, BTreeMap<String, Type>), RejectedError> {
        let mut env = Env::new().with_limits(self.limits);
        let mut schema = BTreeMap::new();

        for decl in variables {
            if decl.name.trim().is_empty() {
                return Err(RejectedError::InvalidSchema(format!(
                    "校验 '{}' 存在空变量名",
                    id
                )));
            }
            let ty: Type = decl.type_name.parse().map_err(|e| {
                RejectedError::InvalidSchema(format!("校验 '{}' 变量 '{}': {}", id, decl.name, e))
            })?;
            if schema.insert(decl.name.clone(), ty.clone()).is_some() {
                return Err(RejectedError::InvalidSchema(format!(
                    "校验 '{}' 重复声明变量 '{}'",
                    id, decl.name
                )));
            }
            env.declare(decl.name.clone(), ty);
        }

        Ok((env, schema))
    }

    /// 语法树中未在环境里声明的标识符
    fn unresolved(&self, env: &Env, ast: &Ast) -> Vec<String> {
        ast.unresolved_identifiers(|name| env.lookup(name).is_some())
            .into_iter()
            .collect()
    }

    /// 构建编译环境并解析全部表达式
    ///
    /// 语法错误先保留在结果中，留到类型检查阶段再报告。
    pub fn parse_definition<'a>(
        &self,
        definition: &'a ValidationDefinition,
    ) -> Result<ParsedDefinition<'a>, RejectedError> {
        let (env, schema) = self.schema(&definition.id, &definition.variables)?;
        let asts = definition
            .expressions
            .iter()
            .map(|expr| env.parse(expr))
            .collect();

        Ok(ParsedDefinition {
            definition,
            env,
            schema,
            asts,
        })
    }

    /// 第一个引用未声明变量的表达式作为 UnknownVariable 拒绝
    pub fn resolve(&self, parsed: &ParsedDefinition<'_>) -> Result<(), RejectedError> {
        let definition = parsed.definition;
        for (expression, ast) in definition.expressions.iter().zip(&parsed.asts) {
            let Ok(ast) = ast else { continue };
            let names = self.unresolved(&parsed.env, ast);
            if !names.is_empty() {
                return Err(RejectedError::UnknownVariable {
                    id: definition.id.clone(),
                    expression: expression.clone(),
                    names,
                });
            }
        }
        Ok(())
    }

    /// 类型检查，语法或类型错误作为 CompileFailed 拒绝
    pub fn check_definition(
        &self,
        parsed: ParsedDefinition<'_>,
    ) -> Result<CompiledValidation, RejectedError> {
        let ParsedDefinition {
            definition,
            env,
            schema,
            asts,
        } = parsed;

        let expressions = definition
            .expressions
            .iter()
            .zip(asts)
            .map(|(expression, ast)| {
                let program = ast
                    .and_then(|ast| env.check(&ast))
                    .map_err(|source| RejectedError::CompileFailed {
                        id: definition.id.clone(),
                        expression: expression.clone(),
                        source,
                    })?;
                Ok(CompiledExpression {
                    source: expression.clone(),
                    program,
                })
            })
            .collect::<Result<Vec<_>, RejectedError>>()?;

        Ok(CompiledValidation {
            definition: definition.clone(),
            schema,
            expressions,
            generation: 0,
            registered_at: Utc::now(),
        })
    }

    /// 编译单个校验定义：解析、未声明变量检查、类型检查
    pub fn compile_definition(
        &self,
        definition: &ValidationDefinition,
    ) -> Result<CompiledValidation, RejectedError> {
        let parsed = self.parse_definition(definition)?;
        self.resolve(&parsed)?;
        self.check_definition(parsed)
    }

    /// 单个表达式的求值上下文，时间预算从此刻开始计算
    pub fn context(&self, cancel: &CancelFlag) -> EvalContext {
        EvalContext::new()
            .with_timeout(self.eval_timeout)
            .with_max_steps(self.max_eval_steps)
            .with_max_value_bytes(self.max_value_bytes)
            .with_cancel(cancel.clone())
    }

    pub fn evaluate<A: Activation + ?Sized>(
        &self,
        expression: &CompiledExpression,
        bindings: &A,
        ctx: &EvalContext,
    ) -> Result<bool, EvalError> {
        expression.program.evaluate(bindings, ctx)
    }

    /// 按声明类型转换 JSON 取值
    ///
    /// 整数只接受 JSON 整数，double 接受任意数字，bytes 需为标准 base64 字符串。
    pub fn coerce(name: &str, value: &Json, ty: &Type) -> Result<Value, EvalError> {
        let mismatch = || {
            EvalError::type_mismatch(format!(
                "variable '{}' expects {}, got {}",
                name,
                ty,
                json_kind(value)
            ))
        };

        match ty {
            Type::Int => value.as_i64().map(Value::Int).ok_or_else(mismatch),
            Type::Uint => value.as_u64().map(Value::Uint).ok_or_else(mismatch),
            Type::Double => value.as_f64().map(Value::Double).ok_or_else(mismatch),
            Type::Bool => value.as_bool().map(Value::Bool).ok_or_else(mismatch),
            Type::String => value
                .as_str()
                .map(|s| Value::String(s.to_string()))
                .ok_or_else(mismatch),
            Type::Bytes => {
                let encoded = value.as_str().ok_or_else(mismatch)?;
                STANDARD.decode(encoded).map(Value::Bytes).map_err(|e| {
                    EvalError::type_mismatch(format!(
                        "variable '{}' is not valid base64: {}",
                        name, e
                    ))
                })
            }
            Type::List(elem) => {
                let items = value.as_array().ok_or_else(mismatch)?;
                items
                    .iter()
                    .map(|item| Self::coerce(name, item, elem))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::List)
            }
        }
    }
}

fn json_kind(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(n) if n.is_u64() || n.is_i64() => "integer",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

/// 表达式引用到的变量集合
pub fn referenced_variables(expression: &CompiledExpression) -> HashSet<&str> {
    expression.program.references().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use ve_cel::{CompileErrorKind, EvalErrorKind};

    fn definition(expressions: Vec<&str>, variables: Vec<(&str, &str)>) -> ValidationDefinition {
        ValidationDefinition::new(
            "item",
            expressions,
            variables
                .into_iter()
                .map(|(n, t)| VariableDecl::new(n, t))
                .collect(),
        )
    }

    #[test]
    fn test_compile_definition() {
        let adapter = ExpressionAdapter::default();
        let compiled = adapter
            .compile_definition(&definition(
                vec!["price > 0", "size(image) < 360"],
                vec![("price", "int"), ("image", "string")],
            ))
            .unwrap();

        assert_eq!(compiled.id(), "item");
        assert_eq!(compiled.expressions.len(), 2);
        assert_eq!(compiled.variable_type("price"), Some(&Type::Int));
        assert!(referenced_variables(&compiled.expressions[1]).contains("image"));
    }

    #[test]
    fn test_unknown_type_is_invalid_schema() {
        let adapter = ExpressionAdapter::default();
        let err = adapter
            .compile_definition(&definition(vec!["x > 0"], vec![("x", "decimal")]))
            .unwrap_err();
        assert!(matches!(err, RejectedError::InvalidSchema(_)));
    }

    #[test]
    fn test_duplicate_variable_is_invalid_schema() {
        let adapter = ExpressionAdapter::default();
        let err = adapter
            .compile_definition(&definition(vec!["x > 0"], vec![("x", "int"), ("x", "uint")]))
            .unwrap_err();
        assert!(matches!(err, RejectedError::InvalidSchema(_)));
    }

    #[test]
    fn test_undeclared_identifier_is_unknown_variable() {
        let adapter = ExpressionAdapter::default();
        let err = adapter
            .compile_definition(&definition(vec!["price > limit"], vec![("price", "int")]))
            .unwrap_err();
        match err {
            RejectedError::UnknownVariable { names, .. } => assert_eq!(names, vec!["limit"]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_type_error_is_compile_failed() {
        let adapter = ExpressionAdapter::default();
        let err = adapter
            .compile_definition(&definition(vec!["name + 1 > 0"], vec![("name", "string")]))
            .unwrap_err();
        match err {
            RejectedError::CompileFailed { source, .. } => {
                assert_eq!(source.kind, CompileErrorKind::Type)
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_expression_length_limit_from_config() {
        let adapter = ExpressionAdapter::new(&EngineConfig {
            max_expression_length: 8,
            ..Default::default()
        });
        let err = adapter
            .compile_definition(&definition(vec!["price > 1000000"], vec![("price", "int")]))
            .unwrap_err();
        assert!(matches!(err, RejectedError::CompileFailed { .. }));
    }

    #[test]
    fn test_coerce_strict_types() {
        assert_eq!(
            ExpressionAdapter::coerce("n", &json!(42), &Type::Int).unwrap(),
            Value::Int(42)
        );
        assert_eq!(
            ExpressionAdapter::coerce("n", &json!(42), &Type::Double).unwrap(),
            Value::Double(42.0)
        );
        assert_eq!(
            ExpressionAdapter::coerce("b", &json!("aGk="), &Type::Bytes).unwrap(),
            Value::Bytes(b"hi".to_vec())
        );

        let err = ExpressionAdapter::coerce("n", &json!(1.5), &Type::Int).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::TypeMismatch);
        let err = ExpressionAdapter::coerce("n", &json!(-1), &Type::Uint).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::TypeMismatch);
        let err = ExpressionAdapter::coerce("s", &json!(7), &Type::String).unwrap_err();
        assert!(err.message.contains("expects string"));
        let err = ExpressionAdapter::coerce("b", &json!("%%%"), &Type::Bytes).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::TypeMismatch);
    }

    #[test]
    fn test_evaluate_with_context() {
        let adapter = ExpressionAdapter::default();
        let compiled = adapter
            .compile_definition(&definition(vec!["price > 0"], vec![("price", "int")]))
            .unwrap();

        let mut bindings = HashMap::new();
        bindings.insert("price".to_string(), Value::Int(5));
        let ctx = adapter.context(&CancelFlag::new());
        assert_eq!(
            adapter.evaluate(&compiled.expressions[0], &bindings, &ctx),
            Ok(true)
        );

        let cancel = CancelFlag::new();
        cancel.cancel();
        let ctx = adapter.context(&cancel);
        let err = adapter
            .evaluate(&compiled.expressions[0], &bindings, &ctx)
            .unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::Cancelled);
    }
}
