//! 规则存储管理
//!
//! 已编译的校验定义保存在一个不可变快照中，通过 ArcSwap 原子替换。
//! 读路径只做一次原子加载，不持有锁；写路径由互斥锁串行化，
//! 每次提交复制一份快照并整体替换，读者要么看到提交前的状态，要么看到提交后的状态。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, instrument};

use crate::adapter::CompiledValidation;

type Snapshot = HashMap<String, Arc<CompiledValidation>>;

/// 规则存储
#[derive(Clone)]
pub struct RuleSetStore {
    entries: Arc<ArcSwap<Snapshot>>,
    write_lock: Arc<Mutex<()>>,
    generation: Arc<AtomicU64>,
}

impl Default for RuleSetStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleSetStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(ArcSwap::from_pointee(HashMap::new())),
            write_lock: Arc::new(Mutex::new(())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }

    /// 最近一次提交的代数，初始为 0
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// 提交单个校验定义
    pub fn put(&self, entry: CompiledValidation) -> u64 {
        self.put_all(vec![entry])
    }

    /// 原子地提交一批校验定义
    ///
    /// 同 ID 的旧定义被整体替换，其他定义保持不变。返回本次提交的代数。
    #[instrument(skip(self, entries), fields(count = entries.len()))]
    pub fn put_all(&self, entries: Vec<CompiledValidation>) -> u64 {
        let _guard = self.write_lock.lock();

        let generation = self.generation.load(Ordering::Acquire) + 1;
        let now = Utc::now();

        let mut next: Snapshot = HashMap::clone(&self.entries.load());
        for mut entry in entries {
            entry.generation = generation;
            entry.registered_at = now;
            let id = entry.id().to_string();
            if next.insert(id.clone(), Arc::new(entry)).is_some() {
                debug!("替换已有校验定义: {}", id);
            }
        }

        self.entries.store(Arc::new(next));
        self.generation.store(generation, Ordering::Release);

        info!("规则已提交: generation={}", generation);
        generation
    }

    pub fn get(&self, id: &str) -> Option<Arc<CompiledValidation>> {
        self.entries.load().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.load().contains_key(id)
    }

    /// 从同一个快照中批量查找，保证一次校验请求看到一致的规则集
    pub fn get_many<S: AsRef<str>>(&self, ids: &[S]) -> Vec<Option<Arc<CompiledValidation>>> {
        let snapshot = self.entries.load();
        ids.iter()
            .map(|id| snapshot.get(id.as_ref()).cloned())
            .collect()
    }

    /// 全部校验定义，按 ID 排序
    pub fn list(&self) -> Vec<Arc<CompiledValidation>> {
        let snapshot = self.entries.load();
        let mut all: Vec<_> = snapshot.values().cloned().collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }

    pub fn stats(&self) -> StoreStats {
        let snapshot = self.entries.load();
        StoreStats {
            validations: snapshot.len(),
            expressions: snapshot.values().map(|e| e.expressions.len()).sum(),
            generation: self.generation(),
        }
    }
}

/// 存储统计信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub validations: usize,
    pub expressions: usize,
    pub generation: u64,
}
