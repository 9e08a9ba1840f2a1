//! 规则注册服务
//!
//! 注册分两阶段：先在暂存区编译请求中的全部校验定义，
//! 全部成功后再通过一次 `put_all` 提交。任何一步失败，存储都保持不变。

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, instrument, warn};
use ve_cel::CancelFlag;
use ve_shared::config::EngineConfig;
use ve_shared::observability::metrics;

use crate::adapter::{CompiledValidation, ExpressionAdapter};
use crate::error::{RejectedError, Result};
use crate::models::{Accepted, RegistrationRequest, TestReport, TestResult};
use crate::store::RuleSetStore;
use crate::validation::evaluate_compiled;

/// 注册阶段的上限
#[derive(Debug, Clone, Copy)]
struct RegistrationLimits {
    max_validations: usize,
    max_expressions: usize,
    max_expression_length: usize,
}

/// 规则注册服务
#[derive(Clone)]
pub struct RegistrationService {
    store: RuleSetStore,
    adapter: Arc<ExpressionAdapter>,
    limits: RegistrationLimits,
}

impl RegistrationService {
    pub fn new(store: RuleSetStore, adapter: Arc<ExpressionAdapter>, config: &EngineConfig) -> Self {
        Self {
            store,
            adapter,
            limits: RegistrationLimits {
                max_validations: config.max_validations_per_request,
                max_expressions: config.max_expressions_per_validation,
                max_expression_length: config.max_expression_length,
            },
        }
    }

    /// 注册一组校验定义
    #[instrument(skip(self, request), fields(validations = request.validations.len()))]
    pub fn register(&self, request: RegistrationRequest) -> std::result::Result<Accepted, RejectedError> {
        let compiled = match self.compile_all(&request) {
            Ok(compiled) => compiled,
            Err(e) => {
                warn!("注册被拒绝: {}", e);
                metrics::record_registration(e.code(), 0);
                return Err(e);
            }
        };

        let registered: Vec<String> = compiled.iter().map(|c| c.id().to_string()).collect();
        let generation = self.store.put_all(compiled);

        metrics::record_registration("accepted", registered.len());
        metrics::set_store_size(self.store.len());
        info!(
            "注册完成: {} 个校验定义, generation={}",
            registered.len(),
            generation
        );

        Ok(Accepted {
            registered,
            generation,
        })
    }

    /// 在暂存区编译全部校验定义，不修改存储
    pub fn compile_all(
        &self,
        request: &RegistrationRequest,
    ) -> std::result::Result<Vec<CompiledValidation>, RejectedError> {
        self.check_shape(request)?;

        let mut seen = HashSet::with_capacity(request.validations.len());
        for def in &request.validations {
            if !seen.insert(def.id.as_str()) {
                return Err(RejectedError::DuplicateId(def.id.clone()));
            }
        }

        // 先检查全部定义中的未声明变量，再做类型检查
        let parsed = request
            .validations
            .iter()
            .map(|def| self.adapter.parse_definition(def))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for definition in &parsed {
            self.adapter.resolve(definition)?;
        }

        parsed
            .into_iter()
            .map(|definition| self.adapter.check_definition(definition))
            .collect()
    }

    fn check_shape(&self, request: &RegistrationRequest) -> std::result::Result<(), RejectedError> {
        if request.validations.is_empty() {
            return Err(RejectedError::InvalidSchema(
                "validations 不能为空".to_string(),
            ));
        }
        if request.validations.len() > self.limits.max_validations {
            return Err(RejectedError::LimitExceeded(format!(
                "校验定义数量 {} 超过上限 {}",
                request.validations.len(),
                self.limits.max_validations
            )));
        }

        for def in &request.validations {
            if def.id.trim().is_empty() {
                return Err(RejectedError::InvalidSchema("校验 ID 不能为空".to_string()));
            }
            if def.expressions.is_empty() {
                return Err(RejectedError::InvalidSchema(format!(
                    "校验 '{}' 至少需要一个表达式",
                    def.id
                )));
            }
            if def.expressions.len() > self.limits.max_expressions {
                return Err(RejectedError::LimitExceeded(format!(
                    "校验 '{}' 的表达式数量 {} 超过上限 {}",
                    def.id,
                    def.expressions.len(),
                    self.limits.max_expressions
                )));
            }
            if let Some(expr) = def
                .expressions
                .iter()
                .find(|e| e.len() > self.limits.max_expression_length)
            {
                return Err(RejectedError::LimitExceeded(format!(
                    "校验 '{}' 的表达式长度 {} 超过上限 {}",
                    def.id,
                    expr.len(),
                    self.limits.max_expression_length
                )));
            }
            if let Some(var) = def
                .variables
                .iter()
                .find(|v| v.name.trim().is_empty() || v.type_name.trim().is_empty())
            {
                return Err(RejectedError::InvalidSchema(format!(
                    "校验 '{}' 的变量声明不完整: name='{}', type='{}'",
                    def.id, var.name, var.type_name
                )));
            }
        }

        Ok(())
    }

    /// 当前已注册的校验定义，按 ID 排序
    pub fn read(&self) -> RegistrationRequest {
        RegistrationRequest {
            validations: self
                .store
                .list()
                .iter()
                .map(|entry| entry.definition.clone())
                .collect(),
        }
    }

    /// 编译并运行请求中携带的测试用例，不提交到存储
    #[instrument(skip(self, request), fields(validations = request.validations.len()))]
    pub fn test(&self, request: RegistrationRequest) -> std::result::Result<TestReport, RejectedError> {
        let compiled = self.compile_all(&request)?;
        let cancel = CancelFlag::new();

        let validations = compiled
            .iter()
            .map(|entry| {
                let cases = &entry.definition.test_cases;
                let failed_test_cases = cases
                    .iter()
                    .filter(|case| {
                        let verdict =
                            evaluate_compiled(&self.adapter, entry, &case.variables, &cancel);
                        verdict.passed != case.expected
                    })
                    .map(|case| case.name.clone())
                    .collect();

                TestResult {
                    id: entry.id().to_string(),
                    failed_test_cases,
                    test_case_not_found: cases.is_empty(),
                }
            })
            .collect();

        Ok(TestReport { validations })
    }

    /// 从 JSON 文件加载并注册
    #[instrument(skip(self))]
    pub fn load_file(&self, path: &Path) -> Result<Accepted> {
        let content = std::fs::read_to_string(path)?;
        let request: RegistrationRequest = serde_json::from_str(&content)?;
        let accepted = self.register(request)?;

        info!("规则文件已加载: {}", path.display());
        Ok(accepted)
    }
}
