//! 规则操作符定义
//!
//! 包含组合逻辑、严重级别、比较符以及表达式操作符的有序词法表。
//! 词法表的顺序即匹配顺序：多词操作符必须排在其单词子串之前。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 规则集内评估型规则的组合逻辑
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Combinator {
    #[default]
    And,
    Or,
}

impl Combinator {
    /// 大小写不敏感解析，无法识别时返回 None
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "AND" => Some(Self::And),
            "OR" => Some(Self::Or),
            _ => None,
        }
    }
}

impl fmt::Display for Combinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
        }
    }
}

/// 校验失败的严重级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Severe,
}

impl Severity {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "warning" => Some(Self::Warning),
            "severe" => Some(Self::Severe),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Severe => write!(f, "severe"),
        }
    }
}

/// 规则集节点来源：由哪个标签产生决定节点语义
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Root,
    Flow,
    Validate,
}

impl NodeType {
    /// 对应的标记标签名
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Root => "rules",
            Self::Flow => "if",
            Self::Validate => "validate",
        }
    }
}

/// 数值区间比较符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
}

/// 日期区间比较符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateComparison {
    Before,
    After,
}

/// 派生赋值的算术运算
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticOp {
    Sum,
    Diff,
    Prod,
    Quot,
}

impl ArithmeticOp {
    pub fn apply(&self, lhs: f64, rhs: f64) -> f64 {
        match self {
            Self::Sum => lhs + rhs,
            Self::Diff => lhs - rhs,
            Self::Prod => lhs * rhs,
            Self::Quot => lhs / rhs,
        }
    }
}

impl fmt::Display for ArithmeticOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Sum => "sum",
            Self::Diff => "diff",
            Self::Prod => "prod",
            Self::Quot => "quot",
        };
        write!(f, "{}", s)
    }
}

/// 规则种类判别值（导出用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorKind {
    Populated,
    Domain,
    ArithmeticLimit,
    DateLimit,
    Assignment,
    Arithmetic,
    CustomOp,
}

impl OperatorKind {
    /// 评估型（只读）规则
    pub fn is_passive(&self) -> bool {
        matches!(
            self,
            Self::Populated | Self::Domain | Self::ArithmeticLimit | Self::DateLimit
        )
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Populated => "populated",
            Self::Domain => "domain",
            Self::ArithmeticLimit => "arithmetic_limit",
            Self::DateLimit => "date_limit",
            Self::Assignment => "assignment",
            Self::Arithmetic => "arithmetic",
            Self::CustomOp => "custom_op",
        };
        write!(f, "{}", s)
    }
}

/// 基础操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasicOperator {
    NotPopulated,
    Populated,
    NotEqual,
    Equal,
    NotIn,
    In,
    ExistsAs,
    Default,
    AssignSum,
    AssignDiff,
    AssignProd,
    AssignQuot,
    Assign,
}

impl BasicOperator {
    fn negated(&self) -> bool {
        matches!(self, Self::NotPopulated | Self::NotEqual | Self::NotIn)
    }
}

pub const LIMIT_TOKENS: [(&str, Comparison, bool); 10] = [
    ("NOT LT", Comparison::Lt, true),
    ("NOT GT", Comparison::Gt, true),
    ("NOT LE", Comparison::Le, true),
    ("NOT GE", Comparison::Ge, true),
    ("NOT EQ", Comparison::Eq, true),
    ("LT", Comparison::Lt, false),
    ("GT", Comparison::Gt, false),
    ("LE", Comparison::Le, false),
    ("GE", Comparison::Ge, false),
    ("EQ", Comparison::Eq, false),
];

pub const DATE_TOKENS: [(&str, DateComparison, bool); 4] = [
    ("IS NOT BEFORE", DateComparison::Before, true),
    ("IS NOT AFTER", DateComparison::After, true),
    ("IS BEFORE", DateComparison::Before, false),
    ("IS AFTER", DateComparison::After, false),
];

pub const BASIC_TOKENS: [(&str, BasicOperator); 13] = [
    ("NOT POPULATED", BasicOperator::NotPopulated),
    ("POPULATED", BasicOperator::Populated),
    ("!=", BasicOperator::NotEqual),
    ("==", BasicOperator::Equal),
    ("NOT IN", BasicOperator::NotIn),
    ("IN", BasicOperator::In),
    ("EXISTS AS", BasicOperator::ExistsAs),
    ("DEFAULT", BasicOperator::Default),
    ("ASSIGN_SUM", BasicOperator::AssignSum),
    ("ASSIGN_DIFF", BasicOperator::AssignDiff),
    ("ASSIGN_PROD", BasicOperator::AssignProd),
    ("ASSIGN_QUOT", BasicOperator::AssignQuot),
    ("ASSIGN", BasicOperator::Assign),
];

/// 操作符分类结果
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorToken {
    Custom(String),
    Limit(Comparison),
    Date(DateComparison),
    Basic(BasicOperator),
}

/// 分类命中的操作符
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedOperator {
    pub token: OperatorToken,
    /// 规范化后的命中词（如 "NOT IN"、"GT" 或自定义名）
    pub text: String,
    pub negated: bool,
}

/// 所有内置操作符词
pub fn builtin_tokens() -> impl Iterator<Item = &'static str> {
    LIMIT_TOKENS
        .iter()
        .map(|(t, _, _)| *t)
        .chain(DATE_TOKENS.iter().map(|(t, _, _)| *t))
        .chain(BASIC_TOKENS.iter().map(|(t, _)| *t))
}

/// 名称是否被内置操作符占用（整词或多词操作符中的任一单词）
pub fn is_reserved(name: &str) -> bool {
    let name = name.trim().to_ascii_uppercase();
    builtin_tokens().any(|token| token == name || token.split_whitespace().any(|w| w == name))
}

/// 按固定顺序对操作符片段分类
///
/// 顺序：自定义操作符（注册顺序）→ 数值区间 → 日期区间 → 基础操作符。
/// 匹配按整词进行，避免 `DEFAULT` 命中 `LT` 这类子串误判。
pub fn classify<'a>(
    segment: &str,
    custom_names: impl IntoIterator<Item = &'a str>,
) -> Option<MatchedOperator> {
    let upper = segment.to_ascii_uppercase();
    let words: Vec<&str> = upper.split_whitespace().collect();
    if words.is_empty() {
        return None;
    }

    for name in custom_names {
        if let Some(pos) = find_words(&words, name) {
            return Some(matched(
                OperatorToken::Custom(name.to_string()),
                name,
                false,
                &words,
                pos,
            ));
        }
    }

    for (text, comparison, negated) in LIMIT_TOKENS {
        if let Some(pos) = find_words(&words, text) {
            return Some(matched(
                OperatorToken::Limit(comparison),
                text,
                negated,
                &words,
                pos,
            ));
        }
    }

    for (text, comparison, negated) in DATE_TOKENS {
        if let Some(pos) = find_words(&words, text) {
            return Some(matched(
                OperatorToken::Date(comparison),
                text,
                negated,
                &words,
                pos,
            ));
        }
    }

    for (text, op) in BASIC_TOKENS {
        if let Some(pos) = find_words(&words, text) {
            return Some(matched(
                OperatorToken::Basic(op),
                text,
                op.negated(),
                &words,
                pos,
            ));
        }
    }

    None
}

fn matched(
    token: OperatorToken,
    text: &str,
    negated: bool,
    words: &[&str],
    pos: usize,
) -> MatchedOperator {
    let len = text.split_whitespace().count();
    // 命中词之外残留的 NOT 同样表示取反
    let stray_not = words
        .iter()
        .enumerate()
        .any(|(i, w)| (i < pos || i >= pos + len) && *w == "NOT");

    MatchedOperator {
        token,
        text: text.to_string(),
        negated: negated || stray_not,
    }
}

/// 在词序列中查找连续的目标词组，返回起始下标
fn find_words(words: &[&str], needle: &str) -> Option<usize> {
    let needle: Vec<&str> = needle.split_whitespace().collect();
    if needle.is_empty() || needle.len() > words.len() {
        return None;
    }
    words
        .windows(needle.len())
        .position(|window| window == needle.as_slice())
}
