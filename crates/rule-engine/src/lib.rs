//! 业务规则引擎
//!
//! 提供可复用的规则校验能力，支持：
//! - 嵌套规则标记编译为规则树
//! - 属性表达式解析与七种规则操作
//! - AND/OR 短路求值与 warning/severe 校验结果
//! - 断言型规则回写新/旧记录
//! - 规则树导出与并发缓存

pub mod attributes;
pub mod coerce;
pub mod compiler;
pub mod config;
pub mod custom_ops;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod export;
pub mod expression;
mod markup;
pub mod models;
pub mod observability;
pub mod operators;
pub mod record;
pub mod store;

pub use attributes::{AttributeCatalog, AttributeRef, AttributeResolver};
pub use compiler::RuleTreeCompiler;
pub use config::{EngineConfig, ObservabilityConfig};
pub use custom_ops::CustomOperatorRegistry;
pub use error::{CoercionError, Result, RuleError};
pub use evaluator::{EvaluationEnv, RecordPair, RuleEvaluator, RuleOutcome};
pub use executor::RuleExecutor;
pub use export::{OperandDescriptor, RuleDescriptor, RuleSetDescriptor, TreeDescriptor};
pub use expression::ExpressionParser;
pub use models::{
    AttributeLink, EvaluationReport, RecordSelector, Rule, RuleKind, RuleSet, RuleSetFailure,
    RuleTree, ValueSource,
};
pub use operators::{Combinator, NodeType, OperatorKind, Severity};
pub use record::{Group, Record, Row};
pub use store::{RuleTreeStore, RuleTreeStoreStats};
