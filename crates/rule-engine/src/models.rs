//! 规则引擎领域模型

use crate::attributes::AttributeRef;
use crate::custom_ops::CustomOperatorRegistry;
use crate::operators::{
    ArithmeticOp, Combinator, Comparison, DateComparison, NodeType, OperatorKind, Severity,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// 规则或操作数指向的记录
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordSelector {
    #[default]
    New,
    Old,
    None,
}

impl RecordSelector {
    /// 表达式中的记录前缀
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::New => "N.",
            Self::Old => "O.",
            Self::None => "",
        }
    }
}

/// 指向某条记录中某个属性的链接
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeLink {
    pub attr: AttributeRef,
    pub record: RecordSelector,
}

impl AttributeLink {
    pub fn new(attr: AttributeRef, record: RecordSelector) -> Self {
        Self { attr, record }
    }
}

/// 操作数来源：字面量或属性链接
///
/// 属性链接在每次评估时重新解析，从不跨记录对缓存。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValueSource {
    Literal { value: String },
    Attribute(AttributeLink),
}

impl ValueSource {
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal {
            value: value.into(),
        }
    }

    pub fn attribute(attr: AttributeRef, record: RecordSelector) -> Self {
        Self::Attribute(AttributeLink::new(attr, record))
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Self::Literal { .. })
    }
}

/// 数值区间边界
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NumericBound {
    Literal { value: f64 },
    /// 评估时取属性第 0 行的值再加上偏移
    Attribute { link: AttributeLink, offset: f64 },
}

/// 日期区间边界
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DateBound {
    Literal { value: NaiveDate },
    Today,
    Attribute(AttributeLink),
}

/// 规则种类
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleKind {
    Populated,
    Domain {
        members: Vec<ValueSource>,
        search_all_rows: bool,
    },
    ArithmeticLimit {
        comparison: Comparison,
        min: NumericBound,
        max: NumericBound,
    },
    DateLimit {
        comparison: DateComparison,
        min: DateBound,
        max: DateBound,
        today: bool,
    },
    Assignment {
        value: ValueSource,
        default_only: bool,
    },
    Arithmetic {
        op: ArithmeticOp,
        operands: Vec<ValueSource>,
    },
    CustomOp {
        name: String,
        args: Vec<ValueSource>,
    },
}

impl RuleKind {
    pub fn kind(&self) -> OperatorKind {
        match self {
            Self::Populated => OperatorKind::Populated,
            Self::Domain { .. } => OperatorKind::Domain,
            Self::ArithmeticLimit { .. } => OperatorKind::ArithmeticLimit,
            Self::DateLimit { .. } => OperatorKind::DateLimit,
            Self::Assignment { .. } => OperatorKind::Assignment,
            Self::Arithmetic { .. } => OperatorKind::Arithmetic,
            Self::CustomOp { .. } => OperatorKind::CustomOp,
        }
    }
}

/// 由一条表达式解析出的规则，构建后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub rule_id: u32,
    pub desc_id: Option<String>,
    /// 原始表达式
    pub expression: String,
    /// 规范化后的操作符词
    pub operator: String,
    pub target: AttributeRef,
    pub record: RecordSelector,
    pub not_operator: bool,
    /// 表达式中书写的操作数列表
    pub operands: Vec<ValueSource>,
    pub kind: RuleKind,
}

impl Rule {
    /// 评估型（只读）规则返回 true，断言型（写入）规则返回 false
    pub fn is_passive(&self) -> bool {
        self.kind.kind().is_passive()
    }
}

/// 规则集（规则树节点）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub rule_set_id: u32,
    pub parent_id: Option<u32>,
    pub node_type: NodeType,
    pub description: String,
    pub combinator: Combinator,
    pub evaluative_rules: Vec<Rule>,
    pub assertive_rules: Vec<Rule>,
    pub children: Vec<RuleSet>,
    /// 只在 validate 节点上设置
    pub severity: Option<Severity>,
    pub custom_failure_msg: Option<String>,
    pub custom_id: Option<String>,
}

impl RuleSet {
    pub fn new(
        rule_set_id: u32,
        parent_id: Option<u32>,
        node_type: NodeType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            rule_set_id,
            parent_id,
            node_type,
            description: description.into(),
            combinator: Combinator::And,
            evaluative_rules: Vec::new(),
            assertive_rules: Vec::new(),
            children: Vec::new(),
            severity: None,
            custom_failure_msg: None,
            custom_id: None,
        }
    }

    /// 根节点
    pub fn root() -> Self {
        Self::new(1, None, NodeType::Root, "Root")
    }

    /// 按种类归入评估型或断言型列表
    pub fn add_rule(&mut self, rule: Rule) {
        if rule.is_passive() {
            self.evaluative_rules.push(rule);
        } else {
            self.assertive_rules.push(rule);
        }
    }

    /// 节点自身的全部规则（评估型在前）
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.evaluative_rules.iter().chain(self.assertive_rules.iter())
    }

    pub fn is_validate(&self) -> bool {
        self.node_type == NodeType::Validate
    }
}

/// 编译后的规则树
///
/// 构建时按先序建立索引：规则集 id 与规则 id 都可直接定位，不必每次遍历整棵树。
#[derive(Debug, Clone)]
pub struct RuleTree {
    root: RuleSet,
    /// 各规则集相对根节点的子节点下标路径，先序排列
    paths: Vec<Vec<usize>>,
    /// 规则集 id -> `paths` 下标
    rule_sets: HashMap<u32, usize>,
    /// 规则 id -> 所属规则集的 `paths` 下标
    rules: HashMap<u32, usize>,
    operators: Arc<CustomOperatorRegistry>,
    /// 编译版本号（用于缓存失效）
    pub compile_version: u64,
}

impl RuleTree {
    pub fn new(root: RuleSet, operators: Arc<CustomOperatorRegistry>, compile_version: u64) -> Self {
        let mut tree = Self {
            root,
            paths: Vec::new(),
            rule_sets: HashMap::new(),
            rules: HashMap::new(),
            operators,
            compile_version,
        };
        let mut paths = Vec::new();
        Self::index(&tree.root, &mut Vec::new(), &mut paths);
        for (position, path) in paths.iter().enumerate() {
            let node = Self::node_at(&tree.root, path);
            tree.rule_sets.insert(node.rule_set_id, position);
            for rule in node.rules() {
                tree.rules.insert(rule.rule_id, position);
            }
        }
        tree.paths = paths;
        tree
    }

    fn index(node: &RuleSet, path: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
        out.push(path.clone());
        for (i, child) in node.children.iter().enumerate() {
            path.push(i);
            Self::index(child, path, out);
            path.pop();
        }
    }

    fn node_at<'a>(root: &'a RuleSet, path: &[usize]) -> &'a RuleSet {
        path.iter().fold(root, |node, &i| &node.children[i])
    }

    pub fn root(&self) -> &RuleSet {
        &self.root
    }

    /// 全部规则集，先序排列（即 id 递增顺序）
    pub fn all(&self) -> Vec<&RuleSet> {
        self.paths
            .iter()
            .map(|path| Self::node_at(&self.root, path))
            .collect()
    }

    pub fn find(&self, rule_set_id: u32) -> Option<&RuleSet> {
        self.rule_sets
            .get(&rule_set_id)
            .map(|&position| Self::node_at(&self.root, &self.paths[position]))
    }

    pub fn find_rule(&self, rule_id: u32) -> Option<&Rule> {
        let position = *self.rules.get(&rule_id)?;
        Self::node_at(&self.root, &self.paths[position])
            .rules()
            .find(|rule| rule.rule_id == rule_id)
    }

    pub fn rule_set_count(&self) -> usize {
        self.paths.len()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn operators(&self) -> &CustomOperatorRegistry {
        &self.operators
    }

    /// 替换自定义操作符实现（如热更新），规则结构不变
    pub fn rebind_operators(&mut self, operators: Arc<CustomOperatorRegistry>) {
        self.operators = operators;
    }
}

/// 单个 validate 规则集的校验失败
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleSetFailure {
    pub rule_set_id: u32,
    pub severity: Severity,
    pub description: String,
    pub custom_id: Option<String>,
    pub message: Option<String>,
    /// 失败规则的诊断信息
    pub diagnostics: Vec<String>,
}

/// 评估结果
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    /// 没有 severe 级别失败即为通过
    pub passed: bool,
    pub failures: Vec<RuleSetFailure>,
    /// 实际执行过的规则 id（按执行顺序）
    pub fired_rule_ids: Vec<u32>,
    pub visited_rule_set_ids: Vec<u32>,
    pub evaluation_trace: Vec<String>,
    pub evaluation_time_ms: i64,
}

impl EvaluationReport {
    pub fn new() -> Self {
        Self {
            passed: true,
            failures: Vec::new(),
            fired_rule_ids: Vec::new(),
            visited_rule_set_ids: Vec::new(),
            evaluation_trace: Vec::new(),
            evaluation_time_ms: 0,
        }
    }

    pub fn failed_rule_set_ids(&self) -> Vec<u32> {
        self.failures.iter().map(|f| f.rule_set_id).collect()
    }

    pub fn severe_failures(&self) -> impl Iterator<Item = &RuleSetFailure> {
        self.failures
            .iter()
            .filter(|f| f.severity == Severity::Severe)
    }

    /// warning 级别失败的规则集 id
    pub fn warnings(&self) -> Vec<u32> {
        self.failures
            .iter()
            .filter(|f| f.severity == Severity::Warning)
            .map(|f| f.rule_set_id)
            .collect()
    }
}

impl Default for EvaluationReport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(rule_id: u32, kind: RuleKind) -> Rule {
        Rule {
            rule_id,
            desc_id: None,
            expression: String::new(),
            operator: String::new(),
            target: AttributeRef::new("AccountType", 1, 10),
            record: RecordSelector::New,
            not_operator: false,
            operands: Vec::new(),
            kind,
        }
    }

    #[test]
    fn test_add_rule_routes_by_kind() {
        let mut rs = RuleSet::root();
        rs.add_rule(rule(1, RuleKind::Populated));
        rs.add_rule(rule(
            2,
            RuleKind::Assignment {
                value: ValueSource::literal("0.00"),
                default_only: false,
            },
        ));

        assert_eq!(rs.evaluative_rules.len(), 1);
        assert_eq!(rs.assertive_rules.len(), 1);
        assert_eq!(rs.rules().map(|r| r.rule_id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_tree_lookup() {
        let mut root = RuleSet::root();
        let mut flow = RuleSet::new(2, Some(1), NodeType::Flow, "flow");
        let mut leaf = RuleSet::new(3, Some(2), NodeType::Validate, "leaf");
        leaf.add_rule(rule(7, RuleKind::Populated));
        flow.children.push(leaf);
        root.children.push(flow);
        root.children.push(RuleSet::new(4, Some(1), NodeType::Flow, "sibling"));

        let tree = RuleTree::new(root, Arc::new(CustomOperatorRegistry::new()), 1);

        let ids: Vec<u32> = tree.all().iter().map(|rs| rs.rule_set_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(tree.find(3).unwrap().description, "leaf");
        assert!(tree.find(9).is_none());
        assert_eq!(tree.find_rule(7).unwrap().target.name, "AccountType");
        assert_eq!(tree.rule_set_count(), 4);
        assert_eq!(tree.rule_count(), 1);
    }

    #[test]
    fn test_tree_index_covers_every_node() {
        let mut root = RuleSet::root();
        root.add_rule(rule(1, RuleKind::Populated));
        let mut outer = RuleSet::new(2, Some(1), NodeType::Flow, "outer");
        let mut inner = RuleSet::new(3, Some(2), NodeType::Flow, "inner");
        let mut deepest = RuleSet::new(4, Some(3), NodeType::Validate, "deepest");
        deepest.add_rule(rule(3, RuleKind::Populated));
        inner.children.push(deepest);
        outer.add_rule(rule(2, RuleKind::Populated));
        outer.children.push(inner);
        root.children.push(outer);
        let mut last = RuleSet::new(5, Some(1), NodeType::Validate, "last");
        last.add_rule(rule(4, RuleKind::Populated));
        root.children.push(last);

        let tree = RuleTree::new(root, Arc::new(CustomOperatorRegistry::new()), 1);

        for id in 1..=5 {
            assert_eq!(tree.find(id).unwrap().rule_set_id, id);
        }
        assert_eq!(tree.find(4).unwrap().description, "deepest");
        assert_eq!(tree.find_rule(3).unwrap().rule_id, 3);
        assert_eq!(tree.find_rule(4).unwrap().rule_id, 4);
        assert!(tree.find_rule(5).is_none());
        assert_eq!(tree.rule_count(), 4);

        // 克隆后的索引仍指向克隆体自身
        let cloned = tree.clone();
        assert_eq!(cloned.find(5).unwrap().description, "last");
        assert_eq!(cloned.all().len(), 5);
    }

    #[test]
    fn test_report_helpers() {
        let mut report = EvaluationReport::new();
        report.failures.push(RuleSetFailure {
            rule_set_id: 3,
            severity: Severity::Warning,
            description: String::new(),
            custom_id: None,
            message: None,
            diagnostics: Vec::new(),
        });
        report.failures.push(RuleSetFailure {
            rule_set_id: 5,
            severity: Severity::Severe,
            description: String::new(),
            custom_id: Some("E-5".into()),
            message: None,
            diagnostics: Vec::new(),
        });

        assert_eq!(report.failed_rule_set_ids(), vec![3, 5]);
        assert_eq!(report.warnings(), vec![3]);
        assert_eq!(report.severe_failures().count(), 1);
    }

    #[test]
    fn test_value_source_serialization() {
        let source = ValueSource::literal("Checking");
        let json = serde_json::to_value(&source).unwrap();
        assert_eq!(json["type"], "literal");
        assert_eq!(json["value"], "Checking");
    }
}
