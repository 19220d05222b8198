//! 规则树导出
//!
//! 把编译后的规则树转成可序列化的描述结构，供外部工具检查、
//! 输出 JSON 或重新渲染为规则标记。渲染出的标记重新编译后
//! 得到相同的描述（规则集 id、规则 id、种类、操作数与严重级别一致）。

use crate::error::{Result, RuleError};
use crate::models::{RecordSelector, Rule, RuleSet, RuleTree, ValueSource};
use crate::operators::{Combinator, NodeType, OperatorKind, Severity};
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use serde::{Deserialize, Serialize};

/// 操作数描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperandDescriptor {
    Literal {
        value: String,
    },
    Attribute {
        name: String,
        attribute_id: u32,
        record: RecordSelector,
    },
}

impl From<&ValueSource> for OperandDescriptor {
    fn from(source: &ValueSource) -> Self {
        match source {
            ValueSource::Literal { value } => Self::Literal {
                value: value.clone(),
            },
            ValueSource::Attribute(link) => Self::Attribute {
                name: link.attr.name.clone(),
                attribute_id: link.attr.attribute_id,
                record: link.record,
            },
        }
    }
}

/// 规则描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDescriptor {
    pub rule_id: u32,
    pub desc_id: Option<String>,
    pub expression: String,
    pub operator: String,
    pub kind: OperatorKind,
    pub target_name: String,
    pub target_id: u32,
    pub record: RecordSelector,
    pub not_operator: bool,
    pub passive: bool,
    pub operands: Vec<OperandDescriptor>,
}

impl From<&Rule> for RuleDescriptor {
    fn from(rule: &Rule) -> Self {
        Self {
            rule_id: rule.rule_id,
            desc_id: rule.desc_id.clone(),
            expression: rule.expression.clone(),
            operator: rule.operator.clone(),
            kind: rule.kind.kind(),
            target_name: rule.target.name.clone(),
            target_id: rule.target.attribute_id,
            record: rule.record,
            not_operator: rule.not_operator,
            passive: rule.is_passive(),
            operands: rule.operands.iter().map(OperandDescriptor::from).collect(),
        }
    }
}

/// 规则集描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSetDescriptor {
    pub rule_set_id: u32,
    pub parent_id: Option<u32>,
    pub node_type: NodeType,
    pub description: String,
    pub custom_id: Option<String>,
    pub failure_message: Option<String>,
    pub severity: Option<Severity>,
    pub combinator: Combinator,
    pub evaluative_rules: Vec<RuleDescriptor>,
    pub assertive_rules: Vec<RuleDescriptor>,
    pub children: Vec<RuleSetDescriptor>,
}

impl From<&RuleSet> for RuleSetDescriptor {
    fn from(rule_set: &RuleSet) -> Self {
        Self {
            rule_set_id: rule_set.rule_set_id,
            parent_id: rule_set.parent_id,
            node_type: rule_set.node_type,
            description: rule_set.description.clone(),
            custom_id: rule_set.custom_id.clone(),
            failure_message: rule_set.custom_failure_msg.clone(),
            severity: rule_set.severity,
            combinator: rule_set.combinator,
            evaluative_rules: rule_set.evaluative_rules.iter().map(RuleDescriptor::from).collect(),
            assertive_rules: rule_set.assertive_rules.iter().map(RuleDescriptor::from).collect(),
            children: rule_set.children.iter().map(RuleSetDescriptor::from).collect(),
        }
    }
}

impl RuleSetDescriptor {
    /// 节点自身的规则，按 id 排序
    fn rules_by_id(&self) -> Vec<&RuleDescriptor> {
        let mut rules: Vec<&RuleDescriptor> = self
            .evaluative_rules
            .iter()
            .chain(self.assertive_rules.iter())
            .collect();
        rules.sort_by_key(|r| r.rule_id);
        rules
    }

    /// 子树中最小的规则 id
    fn first_rule_id(&self) -> Option<u32> {
        self.evaluative_rules
            .iter()
            .chain(self.assertive_rules.iter())
            .map(|r| r.rule_id)
            .chain(self.children.iter().filter_map(|c| c.first_rule_id()))
            .min()
    }
}

/// 规则树描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeDescriptor {
    pub compile_version: u64,
    pub custom_operators: Vec<String>,
    pub root: RuleSetDescriptor,
}

impl RuleTree {
    /// 导出规则树描述
    pub fn export(&self) -> TreeDescriptor {
        TreeDescriptor {
            compile_version: self.compile_version,
            custom_operators: self.operators().names().map(str::to_string).collect(),
            root: RuleSetDescriptor::from(self.root()),
        }
    }
}

impl TreeDescriptor {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// 渲染为规则标记
    pub fn to_markup(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        write_rule_set(&mut writer, &self.root)?;
        String::from_utf8(writer.into_inner()).map_err(|e| RuleError::MarkupError(e.to_string()))
    }
}

type MarkupWriter = Writer<Vec<u8>>;

fn write(writer: &mut MarkupWriter, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|e| RuleError::MarkupError(e.to_string()))
}

fn write_rule_set(writer: &mut MarkupWriter, node: &RuleSetDescriptor) -> Result<()> {
    let tag = node.node_type.tag();
    let mut start = BytesStart::new(tag);
    if node.node_type != NodeType::Root && !node.description.is_empty() {
        start.push_attribute(("description", node.description.as_str()));
    }
    let severity = node.severity.map(|s| s.to_string());
    if let Some(severity) = &severity {
        start.push_attribute(("err", severity.as_str()));
    }
    write(writer, Event::Start(start))?;

    if node.node_type == NodeType::Validate {
        if let Some(message) = &node.failure_message {
            write_text_element(writer, "failure_message", message)?;
        }
        if let Some(custom_id) = &node.custom_id {
            write_text_element(writer, "customId", custom_id)?;
        }
    }

    // 按原始文档顺序交错输出规则与子节点，保持规则 id 不变
    let rules = node.rules_by_id();
    let mut pending = rules.as_slice();
    let mut wrote_criteria = false;
    for child in &node.children {
        if let Some(first) = child.first_rule_id() {
            let split = pending.iter().position(|r| r.rule_id > first).unwrap_or(pending.len());
            if split > 0 {
                write_criteria(writer, node.combinator, &pending[..split])?;
                wrote_criteria = true;
            }
            pending = &pending[split..];
        }
        write_rule_set(writer, child)?;
    }
    if !pending.is_empty() || (!wrote_criteria && node.combinator != Combinator::And) {
        write_criteria(writer, node.combinator, pending)?;
    }

    write(writer, Event::End(BytesEnd::new(tag)))
}

fn write_criteria(
    writer: &mut MarkupWriter,
    combinator: Combinator,
    rules: &[&RuleDescriptor],
) -> Result<()> {
    let op = combinator.to_string();
    let mut start = BytesStart::new("criteria");
    start.push_attribute(("op", op.as_str()));

    if rules.is_empty() {
        return write(writer, Event::Empty(start));
    }

    write(writer, Event::Start(start))?;
    for rule in rules {
        let mut eval = BytesStart::new("eval");
        if let Some(desc_id) = &rule.desc_id {
            eval.push_attribute(("id", desc_id.as_str()));
        }
        write(writer, Event::Start(eval))?;
        // 表达式保留原始转义（如 &#44;）
        write(writer, Event::Text(BytesText::from_escaped(rule.expression.as_str())))?;
        write(writer, Event::End(BytesEnd::new("eval")))?;
    }
    write(writer, Event::End(BytesEnd::new("criteria")))
}

fn write_text_element(writer: &mut MarkupWriter, tag: &str, text: &str) -> Result<()> {
    write(writer, Event::Start(BytesStart::new(tag)))?;
    write(writer, Event::Text(BytesText::new(text)))?;
    write(writer, Event::End(BytesEnd::new(tag)))
}
