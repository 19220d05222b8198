//! 规则树编译器
//!
//! 将嵌套的规则标记递归下降编译成内存中的 [`RuleTree`]：
//! - `if`：流程节点，条件为真时才进入子节点
//! - `validate`：校验节点，携带 `err` 严重级别、失败消息与自定义 id
//! - `criteria`：节点条件，`op` 决定组合逻辑，内含若干 `eval` 表达式
//!
//! 其他标签视为透明容器，其子元素按当前节点处理。

use crate::attributes::AttributeResolver;
use crate::coerce::DEFAULT_DATE_FORMAT;
use crate::config::EngineConfig;
use crate::custom_ops::CustomOperatorRegistry;
use crate::error::{Result, RuleError};
use crate::expression::{DEFAULT_EPSILON, ExpressionParser};
use crate::markup::{self, MarkupElement};
use crate::models::{RuleSet, RuleTree};
use crate::operators::{Combinator, NodeType, Severity};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// 默认最大嵌套深度
pub const DEFAULT_MAX_DEPTH: usize = 64;

const TAG_IF: &str = "if";
const TAG_VALIDATE: &str = "validate";
const TAG_CRITERIA: &str = "criteria";
const TAG_EVAL: &str = "eval";
const TAG_FAILURE_MESSAGE: &str = "failure_message";
const TAG_CUSTOM_ID: &str = "customId";

/// 规则树编译器
pub struct RuleTreeCompiler {
    resolver: Arc<dyn AttributeResolver>,
    operators: CustomOperatorRegistry,
    epsilon: f64,
    date_format: String,
    max_depth: usize,
    compile_version: u64,
}

impl RuleTreeCompiler {
    pub fn new(resolver: Arc<dyn AttributeResolver>) -> Self {
        Self {
            resolver,
            operators: CustomOperatorRegistry::new(),
            epsilon: DEFAULT_EPSILON,
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            max_depth: DEFAULT_MAX_DEPTH,
            compile_version: 0,
        }
    }

    pub fn from_config(resolver: Arc<dyn AttributeResolver>, config: &EngineConfig) -> Self {
        Self {
            epsilon: config.numeric_epsilon,
            date_format: config.date_format.clone(),
            max_depth: config.max_depth,
            ..Self::new(resolver)
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// 注册自定义操作符，必须在编译使用它的规则之前完成
    pub fn register_custom_operator<F>(&mut self, name: &str, operator: F) -> Result<()>
    where
        F: Fn(&str, &str, &str, &str) -> String + Send + Sync + 'static,
    {
        self.operators.register(name, operator)
    }

    pub fn operators(&self) -> &CustomOperatorRegistry {
        &self.operators
    }

    /// 编译规则标记
    #[instrument(skip(self, markup), fields(len = markup.len()))]
    pub fn compile(&mut self, markup: &str) -> Result<RuleTree> {
        if markup.trim().is_empty() {
            return Err(RuleError::EmptyMarkup);
        }

        let document = markup::parse_markup(markup, self.max_depth)?;
        if document.children.is_empty() {
            return Err(RuleError::EmptyMarkup);
        }

        let parser = ExpressionParser::new(self.resolver.as_ref(), &self.operators)
            .with_epsilon(self.epsilon)
            .with_date_format(self.date_format.clone());

        let mut session = CompileSession {
            parser,
            next_rule_set_id: 2,
            next_rule_id: 1,
        };

        let mut root = RuleSet::root();
        session.build_children(&document, &mut root)?;

        self.compile_version += 1;
        let tree = RuleTree::new(root, Arc::new(self.operators.clone()), self.compile_version);

        info!(
            rule_sets = tree.rule_set_count(),
            rules = tree.rule_count(),
            compile_version = tree.compile_version,
            "规则树编译完成"
        );
        Ok(tree)
    }
}

/// 单次编译的 id 计数状态
struct CompileSession<'a> {
    parser: ExpressionParser<'a>,
    next_rule_set_id: u32,
    next_rule_id: u32,
}

impl CompileSession<'_> {
    fn build_children(&mut self, element: &MarkupElement, node: &mut RuleSet) -> Result<()> {
        for child in &element.children {
            self.build_element(child, node)?;
        }
        Ok(())
    }

    fn build_element(&mut self, element: &MarkupElement, node: &mut RuleSet) -> Result<()> {
        if element.is(TAG_IF) {
            let child = self.build_rule_set(element, node, NodeType::Flow)?;
            node.children.push(child);
        } else if element.is(TAG_VALIDATE) {
            let child = self.build_rule_set(element, node, NodeType::Validate)?;
            node.children.push(child);
        } else if element.is(TAG_CRITERIA) {
            if let Some(op) = element.attribute("op") {
                match Combinator::parse(op) {
                    Some(combinator) => node.combinator = combinator,
                    None => warn!(op, rule_set_id = node.rule_set_id, "无法识别的组合逻辑，保持原值"),
                }
            }
            for eval in &element.children {
                if eval.is(TAG_EVAL) {
                    self.build_rule(eval, node)?;
                } else {
                    warn!(tag = %eval.name, "criteria 下忽略非 eval 标签");
                }
            }
        } else if element.is(TAG_EVAL) {
            self.build_rule(element, node)?;
        } else if element.is(TAG_FAILURE_MESSAGE) {
            if node.is_validate() {
                node.custom_failure_msg = Some(element.unescaped_text());
            } else {
                warn!(rule_set_id = node.rule_set_id, "failure_message 只能用于 validate 节点");
            }
        } else if element.is(TAG_CUSTOM_ID) {
            if node.is_validate() {
                node.custom_id = Some(element.unescaped_text());
            } else {
                warn!(rule_set_id = node.rule_set_id, "customId 只能用于 validate 节点");
            }
        } else {
            // 透明容器
            self.build_children(element, node)?;
        }
        Ok(())
    }

    fn build_rule_set(
        &mut self,
        element: &MarkupElement,
        parent: &RuleSet,
        node_type: NodeType,
    ) -> Result<RuleSet> {
        let id = self.next_rule_set_id;
        self.next_rule_set_id += 1;

        let description = element.attribute("description").unwrap_or_default();
        let mut rule_set = RuleSet::new(id, Some(parent.rule_set_id), node_type, description);

        if node_type == NodeType::Validate {
            if let Some(err) = element.attribute("err") {
                match Severity::parse(err) {
                    Some(severity) => rule_set.severity = Some(severity),
                    None => warn!(err, rule_set_id = id, "无法识别的严重级别"),
                }
            }
        }

        self.build_children(element, &mut rule_set)?;
        Ok(rule_set)
    }

    fn build_rule(&mut self, element: &MarkupElement, node: &mut RuleSet) -> Result<()> {
        let expression = element.raw_text();
        if expression.is_empty() {
            return Err(RuleError::invalid_expression("", "eval 正文为空"));
        }

        let rule_id = self.next_rule_id;
        self.next_rule_id += 1;

        let desc_id = element.attribute("id").map(str::to_string);
        let rule = self.parser.parse_with_id(expression, rule_id, desc_id)?;
        node.add_rule(rule);
        Ok(())
    }
}
