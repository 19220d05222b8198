//! 规则树存储管理
//!
//! 使用 DashMap 提供线程安全的规则树缓存，支持按名称加载、更新、删除和批量操作。
//! 编译后的规则树以 `Arc<RuleTree>` 只读共享。

use crate::attributes::AttributeResolver;
use crate::compiler::RuleTreeCompiler;
use crate::config::EngineConfig;
use crate::error::{Result, RuleError};
use crate::executor::RuleExecutor;
use crate::models::{EvaluationReport, RuleTree};
use crate::record::Record;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// 规则树存储
#[derive(Clone)]
pub struct RuleTreeStore {
    /// 编译后的规则树缓存
    trees: Arc<DashMap<String, Arc<RuleTree>>>,
    /// 规则树编译器
    compiler: Arc<parking_lot::Mutex<RuleTreeCompiler>>,
}

impl RuleTreeStore {
    pub fn new(resolver: Arc<dyn AttributeResolver>) -> Self {
        Self::with_compiler(RuleTreeCompiler::new(resolver))
    }

    pub fn from_config(resolver: Arc<dyn AttributeResolver>, config: &EngineConfig) -> Self {
        Self::with_compiler(RuleTreeCompiler::from_config(resolver, config))
    }

    pub fn with_compiler(compiler: RuleTreeCompiler) -> Self {
        Self {
            trees: Arc::new(DashMap::new()),
            compiler: Arc::new(parking_lot::Mutex::new(compiler)),
        }
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    /// 注册自定义操作符，只影响之后编译的规则树
    pub fn register_custom_operator<F>(&self, name: &str, operator: F) -> Result<()>
    where
        F: Fn(&str, &str, &str, &str) -> String + Send + Sync + 'static,
    {
        self.compiler.lock().register_custom_operator(name, operator)
    }

    /// 编译并加载规则树，同名规则树被替换
    #[instrument(skip(self, markup))]
    pub fn load(&self, name: &str, markup: &str) -> Result<Arc<RuleTree>> {
        let tree = {
            let mut compiler = self.compiler.lock();
            Arc::new(compiler.compile(markup)?)
        };

        self.trees.insert(name.to_string(), tree.clone());

        info!("规则树已加载: {}", name);
        Ok(tree)
    }

    /// 更新已存在的规则树
    #[instrument(skip(self, markup))]
    pub fn update(&self, name: &str, markup: &str) -> Result<Arc<RuleTree>> {
        if !self.trees.contains_key(name) {
            warn!("更新不存在的规则树: {}", name);
            return Err(RuleError::TreeNotFound(name.to_string()));
        }

        self.load(name, markup)
    }

    #[instrument(skip(self))]
    pub fn delete(&self, name: &str) -> Result<()> {
        if self.trees.remove(name).is_some() {
            info!("规则树已删除: {}", name);
            Ok(())
        } else {
            warn!("删除不存在的规则树: {}", name);
            Err(RuleError::TreeNotFound(name.to_string()))
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<RuleTree>> {
        self.trees.get(name).map(|t| t.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.trees.contains_key(name)
    }

    pub fn list_ids(&self) -> Vec<String> {
        self.trees.iter().map(|t| t.key().clone()).collect()
    }

    /// 批量加载，单个失败不影响其他，返回成功加载的名称
    #[instrument(skip(self, sources))]
    pub fn load_batch(&self, sources: Vec<(String, String)>) -> Vec<String> {
        let mut loaded = Vec::with_capacity(sources.len());
        let mut errors = Vec::new();

        for (name, markup) in sources {
            match self.load(&name, &markup) {
                Ok(_) => loaded.push(name),
                Err(e) => errors.push((name, e)),
            }
        }

        if !errors.is_empty() {
            warn!("批量加载部分失败: {:?}", errors);
        }

        info!("批量加载完成: {} 成功, {} 失败", loaded.len(), errors.len());
        loaded
    }

    #[instrument(skip(self))]
    pub fn clear(&self) {
        let count = self.trees.len();
        self.trees.clear();
        info!("已清空 {} 棵规则树", count);
    }

    /// 用指定规则树评估记录对
    pub fn evaluate(
        &self,
        name: &str,
        executor: &RuleExecutor,
        new: &mut Record,
        old: &mut Record,
    ) -> Result<EvaluationReport> {
        let tree = self
            .get(name)
            .ok_or_else(|| RuleError::TreeNotFound(name.to_string()))?;
        executor.evaluate(&tree, new, old)
    }

    pub fn stats(&self) -> RuleTreeStoreStats {
        let trees_count = self.trees.len();
        let (total_rule_sets, total_rules) = self
            .trees
            .iter()
            .map(|t| (t.rule_set_count(), t.rule_count()))
            .fold((0, 0), |(sets, rules), (s, r)| (sets + s, rules + r));

        RuleTreeStoreStats {
            trees_count,
            total_rule_sets,
            total_rules,
            avg_rules_per_tree: if trees_count > 0 {
                total_rules as f64 / trees_count as f64
            } else {
                0.0
            },
        }
    }
}

/// 规则树存储统计信息
#[derive(Debug, Clone)]
pub struct RuleTreeStoreStats {
    pub trees_count: usize,
    /// 所有规则树的规则集总数（含根节点）
    pub total_rule_sets: usize,
    pub total_rules: usize,
    pub avg_rules_per_tree: f64,
}
