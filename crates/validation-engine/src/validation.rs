//! 校验服务
//!
//! 每个条目独立求值：未注册的 ID、类型不符的取值、求值错误都只影响对应条目或表达式，
//! 不会中断整个批次。批次按分片在阻塞线程池上并行执行，结果保持请求顺序。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde_json::Value as Json;
use tracing::{debug, instrument};
use ve_cel::{CancelFlag, EvalError};
use ve_shared::config::EngineConfig;
use ve_shared::observability::metrics;

use crate::adapter::{CompiledValidation, ExpressionAdapter};
use crate::error::{EngineError, Result};
use crate::models::{Diagnostic, ValidationItem, Verdict};
use crate::store::RuleSetStore;

/// 分片的最小条目数，避免小批次被拆得过碎
const MIN_CHUNK_SIZE: usize = 8;

/// Drop 时触发取消
///
/// 由请求处理函数持有；客户端断开导致处理 future 被丢弃时，
/// 仍在阻塞线程池上执行的求值会在下一次检查点以 Cancelled 结束。
#[derive(Debug, Default)]
pub struct CancelOnDrop(CancelFlag);

impl CancelOnDrop {
    pub fn new() -> Self {
        Self(CancelFlag::new())
    }

    pub fn flag(&self) -> CancelFlag {
        self.0.clone()
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// 校验服务
#[derive(Clone)]
pub struct ValidationService {
    store: RuleSetStore,
    adapter: Arc<ExpressionAdapter>,
    max_batch_size: usize,
    parallelism: usize,
}

impl ValidationService {
    pub fn new(store: RuleSetStore, adapter: Arc<ExpressionAdapter>, config: &EngineConfig) -> Self {
        let parallelism = match config.parallelism {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            n => n,
        };

        Self {
            store,
            adapter,
            max_batch_size: config.max_batch_size,
            parallelism,
        }
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// 同步校验单个条目
    pub fn validate_item(&self, item: &ValidationItem, cancel: &CancelFlag) -> Verdict {
        let entry = self.store.get(&item.id);
        verdict_for(&self.adapter, entry.as_deref(), item, cancel)
    }

    /// 批量校验
    ///
    /// 所有条目从同一个存储快照中查找规则。
    #[instrument(skip(self, items, cancel), fields(items = items.len()))]
    pub async fn validate(
        &self,
        items: Vec<ValidationItem>,
        cancel: CancelFlag,
    ) -> Result<Vec<Verdict>> {
        let total = items.len();
        if total > self.max_batch_size {
            return Err(EngineError::BatchTooLarge {
                size: total,
                limit: self.max_batch_size,
            });
        }
        if total == 0 {
            return Ok(Vec::new());
        }

        let start = Instant::now();

        let entries = {
            let ids: Vec<&str> = items.iter().map(|item| item.id.as_str()).collect();
            self.store.get_many(&ids)
        };

        let chunk_size = total.div_ceil(self.parallelism).max(MIN_CHUNK_SIZE);
        let mut pairs = items.into_iter().zip(entries);
        let mut chunks = Vec::new();
        loop {
            let chunk: Vec<_> = pairs.by_ref().take(chunk_size).collect();
            if chunk.is_empty() {
                break;
            }
            chunks.push(chunk);
        }
        debug!("批量校验: {} 个条目, {} 个分片", total, chunks.len());

        let tasks = chunks.into_iter().map(|chunk| {
            let adapter = self.adapter.clone();
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || {
                chunk
                    .iter()
                    .map(|(item, entry)| verdict_for(&adapter, entry.as_deref(), item, &cancel))
                    .collect::<Vec<_>>()
            })
        });

        let mut verdicts = Vec::with_capacity(total);
        for result in join_all(tasks).await {
            let chunk = result.map_err(|e| EngineError::Internal(e.to_string()))?;
            verdicts.extend(chunk);
        }

        metrics::record_validation_batch(total, start.elapsed().as_secs_f64());
        Ok(verdicts)
    }
}

fn verdict_for(
    adapter: &ExpressionAdapter,
    entry: Option<&CompiledValidation>,
    item: &ValidationItem,
    cancel: &CancelFlag,
) -> Verdict {
    let verdict = match entry {
        Some(entry) => evaluate_compiled(adapter, entry, &item.variables, cancel),
        None => Verdict::not_found(&item.id),
    };

    metrics::record_validation_item(verdict.result_label());
    for diagnostic in &verdict.diagnostics {
        let outcome = match diagnostic.error_kind() {
            Some(kind) => kind.as_label(),
            None if diagnostic.passed => "passed",
            None => "failed",
        };
        metrics::record_expression_evaluation(outcome);
    }

    verdict
}

/// 在给定取值上求值一个已编译的校验定义
///
/// - 绑定了未声明的变量：全部表达式 TypeMismatch
/// - 取值无法转换为声明类型：引用该变量的表达式 TypeMismatch
/// - 引用的变量没有取值：由求值返回 RuntimeError
/// - 每个表达式有独立的时间预算，超时不影响后续表达式
pub(crate) fn evaluate_compiled(
    adapter: &ExpressionAdapter,
    entry: &CompiledValidation,
    variables: &HashMap<String, Json>,
    cancel: &CancelFlag,
) -> Verdict {
    let mut bindings = HashMap::with_capacity(variables.len());
    let mut undeclared = Vec::new();
    let mut invalid: HashMap<&str, EvalError> = HashMap::new();

    for (name, raw) in variables {
        match entry.variable_type(name) {
            None => undeclared.push(name.as_str()),
            Some(ty) => match ExpressionAdapter::coerce(name, raw, ty) {
                Ok(value) => {
                    bindings.insert(name.clone(), value);
                }
                Err(e) => {
                    invalid.insert(name.as_str(), e);
                }
            },
        }
    }
    undeclared.sort_unstable();

    let diagnostics = entry
        .expressions
        .iter()
        .map(|expr| {
            let outcome = if !undeclared.is_empty() {
                Err(EvalError::type_mismatch(format!(
                    "undeclared variables bound: {}",
                    undeclared.join(", ")
                )))
            } else if let Some(err) = expr.program.references().find_map(|n| invalid.get(n)) {
                Err(err.clone())
            } else {
                // 每个表达式独立计时
                let ctx = adapter.context(cancel);
                adapter.evaluate(expr, &bindings, &ctx)
            };
            Diagnostic::from_outcome(&expr.source, outcome)
        })
        .collect();

    Verdict::from_diagnostics(entry.id(), diagnostics)
}
