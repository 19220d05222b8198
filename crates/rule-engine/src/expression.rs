//! 规则表达式解析器
//!
//! 将一条表达式解析为 [`Rule`]，语法：
//!
//! ```text
//! ["NOT"] "(" ["O."|"N."] 属性名 ")" 操作符 ["(" 操作数 {"," 操作数} ")"]
//! ```
//!
//! 单引号包裹的操作数是字面量（字面量内的逗号写作 `&#44;`），裸数字同样是字面量，
//! 其他操作数按属性引用解析。

use crate::attributes::AttributeResolver;
use crate::coerce::{self, DEFAULT_DATE_FORMAT};
use crate::custom_ops::{CustomOperatorRegistry, MAX_CUSTOM_ARGS};
use crate::error::{Result, RuleError};
use crate::models::{
    AttributeLink, DateBound, NumericBound, RecordSelector, Rule, RuleKind, ValueSource,
};
use crate::operators::{self, BasicOperator, Comparison, DateComparison, OperatorToken};
use chrono::NaiveDate;
use regex::Regex;
use std::sync::LazyLock;

/// 默认数值边界偏移
pub const DEFAULT_EPSILON: f64 = 0.001;

const TODAY: &str = "TODAY";

static EXPRESSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*(?i:(NOT)\s+)?\(([^()]*)\)\s*([^(]*?)\s*(?:\((.*)\))?\s*$")
        .expect("表达式正则有效")
});

/// 表达式解析器
pub struct ExpressionParser<'a> {
    resolver: &'a dyn AttributeResolver,
    operators: &'a CustomOperatorRegistry,
    epsilon: f64,
    date_format: String,
}

impl<'a> ExpressionParser<'a> {
    pub fn new(resolver: &'a dyn AttributeResolver, operators: &'a CustomOperatorRegistry) -> Self {
        Self {
            resolver,
            operators,
            epsilon: DEFAULT_EPSILON,
            date_format: DEFAULT_DATE_FORMAT.to_string(),
        }
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_date_format(mut self, date_format: impl Into<String>) -> Self {
        self.date_format = date_format.into();
        self
    }

    pub fn parse(&self, expression: &str, rule_id: u32) -> Result<Rule> {
        self.parse_with_id(expression, rule_id, None)
    }

    /// 解析表达式，`desc_id` 为规则的可读标识
    pub fn parse_with_id(
        &self,
        expression: &str,
        rule_id: u32,
        desc_id: Option<String>,
    ) -> Result<Rule> {
        let caps = EXPRESSION_PATTERN.captures(expression).ok_or_else(|| {
            RuleError::invalid_expression(expression, "格式应为 (属性) 操作符 (操作数, ...)")
        })?;

        let leading_not = caps.get(1).is_some();
        let target = self.resolve_reference(&caps[2])?;

        let segment = caps.get(3).map_or("", |m| m.as_str()).trim();
        if segment.is_empty() {
            return Err(RuleError::invalid_expression(expression, "缺少操作符"));
        }

        let matched = operators::classify(segment, self.operators.names()).ok_or_else(|| {
            RuleError::invalid_expression(expression, format!("未知操作符 '{}'", segment))
        })?;

        let raw_operands = caps
            .get(4)
            .map(|m| split_operands(m.as_str()))
            .unwrap_or_default();

        let (kind, operands) = self.build_kind(expression, &matched.token, &raw_operands)?;

        Ok(Rule {
            rule_id,
            desc_id,
            expression: expression.trim().to_string(),
            operator: matched.text,
            target: target.attr,
            record: target.record,
            not_operator: matched.negated || leading_not,
            operands,
            kind,
        })
    }

    fn build_kind(
        &self,
        expression: &str,
        token: &OperatorToken,
        raw: &[String],
    ) -> Result<(RuleKind, Vec<ValueSource>)> {
        match token {
            OperatorToken::Custom(name) => {
                if raw.len() > MAX_CUSTOM_ARGS {
                    return Err(RuleError::invalid_expression(
                        expression,
                        format!("自定义操作符最多 {} 个操作数", MAX_CUSTOM_ARGS),
                    ));
                }
                let args = self.parse_operands(expression, raw)?;
                Ok((
                    RuleKind::CustomOp {
                        name: name.clone(),
                        args: args.clone(),
                    },
                    args,
                ))
            }
            OperatorToken::Limit(comparison) => {
                let operand = self.parse_operand(expression, single(expression, raw)?)?;
                let (min, max) = self.numeric_bounds(expression, *comparison, &operand)?;
                Ok((
                    RuleKind::ArithmeticLimit {
                        comparison: *comparison,
                        min,
                        max,
                    },
                    vec![operand],
                ))
            }
            OperatorToken::Date(comparison) => {
                let (operand, bound) = self.date_operand(expression, single(expression, raw)?)?;
                let today = bound == DateBound::Today;
                let (min, max) = match comparison {
                    DateComparison::Before => (
                        DateBound::Literal {
                            value: NaiveDate::MIN,
                        },
                        bound,
                    ),
                    DateComparison::After => (
                        bound,
                        DateBound::Literal {
                            value: NaiveDate::MAX,
                        },
                    ),
                };
                Ok((
                    RuleKind::DateLimit {
                        comparison: *comparison,
                        min,
                        max,
                        today,
                    },
                    vec![operand],
                ))
            }
            OperatorToken::Basic(op) => self.build_basic(expression, *op, raw),
        }
    }

    fn build_basic(
        &self,
        expression: &str,
        op: BasicOperator,
        raw: &[String],
    ) -> Result<(RuleKind, Vec<ValueSource>)> {
        match op {
            BasicOperator::NotPopulated | BasicOperator::Populated => {
                Ok((RuleKind::Populated, Vec::new()))
            }
            BasicOperator::NotEqual
            | BasicOperator::Equal
            | BasicOperator::NotIn
            | BasicOperator::In
            | BasicOperator::ExistsAs => {
                if raw.is_empty() {
                    return Err(RuleError::invalid_expression(expression, "值域至少需要一个成员"));
                }
                let operands = self.parse_operands(expression, raw)?;
                let mut members: Vec<ValueSource> = Vec::with_capacity(operands.len());
                for operand in &operands {
                    if !members.contains(operand) {
                        members.push(operand.clone());
                    }
                }
                Ok((
                    RuleKind::Domain {
                        members,
                        search_all_rows: op == BasicOperator::ExistsAs,
                    },
                    operands,
                ))
            }
            BasicOperator::Default | BasicOperator::Assign => {
                let value = self.parse_operand(expression, single(expression, raw)?)?;
                Ok((
                    RuleKind::Assignment {
                        value: value.clone(),
                        default_only: op == BasicOperator::Default,
                    },
                    vec![value],
                ))
            }
            BasicOperator::AssignSum
            | BasicOperator::AssignDiff
            | BasicOperator::AssignProd
            | BasicOperator::AssignQuot => {
                if raw.is_empty() {
                    return Err(RuleError::invalid_expression(expression, "算术赋值至少需要一个操作数"));
                }
                let operands = self.parse_operands(expression, raw)?;
                let arithmetic = match op {
                    BasicOperator::AssignSum => operators::ArithmeticOp::Sum,
                    BasicOperator::AssignDiff => operators::ArithmeticOp::Diff,
                    BasicOperator::AssignProd => operators::ArithmeticOp::Prod,
                    _ => operators::ArithmeticOp::Quot,
                };
                Ok((
                    RuleKind::Arithmetic {
                        op: arithmetic,
                        operands: operands.clone(),
                    },
                    operands,
                ))
            }
        }
    }

    fn parse_operands(&self, expression: &str, raw: &[String]) -> Result<Vec<ValueSource>> {
        raw.iter()
            .map(|operand| self.parse_operand(expression, operand))
            .collect()
    }

    /// 单个操作数：单引号字面量、裸数字字面量或属性引用
    fn parse_operand(&self, expression: &str, raw: &str) -> Result<ValueSource> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(RuleError::invalid_expression(expression, "操作数为空"));
        }

        if let Some(inner) = strip_quotes(raw) {
            return Ok(ValueSource::literal(unescape_literal(expression, inner)?));
        }

        if coerce::parse_number(raw).is_ok() {
            return Ok(ValueSource::literal(raw));
        }

        Ok(ValueSource::Attribute(self.resolve_reference(raw)?))
    }

    /// 解析属性引用：`O.` 前缀选择旧记录，其余（包括无前缀）选择新记录
    fn resolve_reference(&self, token: &str) -> Result<AttributeLink> {
        let token = token.trim();
        let (record, name) = match token.split_once('.') {
            Some((prefix, name)) if prefix.trim().eq_ignore_ascii_case("O") => {
                (RecordSelector::Old, name.trim())
            }
            Some((_, name)) => (RecordSelector::New, name.trim()),
            None => (RecordSelector::New, token),
        };

        if !self.resolver.is_attribute(name) {
            return Err(RuleError::UnknownAttribute(name.to_string()));
        }
        let attr = self
            .resolver
            .attribute_by_name(name)
            .ok_or_else(|| RuleError::UnknownAttribute(name.to_string()))?;

        Ok(AttributeLink::new(attr, record))
    }

    fn numeric_bounds(
        &self,
        expression: &str,
        comparison: Comparison,
        operand: &ValueSource,
    ) -> Result<(NumericBound, NumericBound)> {
        let bound = |offset: f64| -> Result<NumericBound> {
            match operand {
                ValueSource::Literal { value } => {
                    let n = coerce::parse_number(value)
                        .map_err(|e| RuleError::invalid_expression(expression, e.to_string()))?;
                    Ok(NumericBound::Literal { value: n + offset })
                }
                ValueSource::Attribute(link) => Ok(NumericBound::Attribute {
                    link: link.clone(),
                    offset,
                }),
            }
        };
        let lowest = NumericBound::Literal { value: f64::MIN };
        let highest = NumericBound::Literal { value: f64::MAX };

        Ok(match comparison {
            Comparison::Lt => (lowest, bound(-self.epsilon)?),
            Comparison::Gt => (bound(self.epsilon)?, highest),
            Comparison::Le => (lowest, bound(0.0)?),
            Comparison::Ge => (bound(0.0)?, highest),
            Comparison::Eq => (bound(0.0)?, bound(0.0)?),
        })
    }

    /// 日期操作数：TODAY、日期字面量（可带引号）或属性引用
    fn date_operand(&self, expression: &str, raw: &str) -> Result<(ValueSource, DateBound)> {
        let raw = raw.trim();
        let quoted = strip_quotes(raw);
        let text = quoted.unwrap_or(raw).trim();

        if text.eq_ignore_ascii_case(TODAY) {
            return Ok((ValueSource::literal(TODAY), DateBound::Today));
        }

        match coerce::parse_date(text, &self.date_format) {
            Ok(date) => Ok((ValueSource::literal(text), DateBound::Literal { value: date })),
            Err(e) if quoted.is_some() => {
                Err(RuleError::invalid_expression(expression, e.to_string()))
            }
            Err(_) => {
                let link = self.resolve_reference(raw)?;
                Ok((
                    ValueSource::Attribute(link.clone()),
                    DateBound::Attribute(link),
                ))
            }
        }
    }
}

fn split_operands(args: &str) -> Vec<String> {
    if args.trim().is_empty() {
        return Vec::new();
    }
    args.split(',').map(|s| s.trim().to_string()).collect()
}

fn single<'r>(expression: &str, raw: &'r [String]) -> Result<&'r str> {
    match raw {
        [only] => Ok(only.as_str()),
        _ => Err(RuleError::invalid_expression(
            expression,
            format!("需要恰好一个操作数，实际 {} 个", raw.len()),
        )),
    }
}

fn strip_quotes(raw: &str) -> Option<&str> {
    if raw.len() >= 2 {
        raw.strip_prefix('\'').and_then(|s| s.strip_suffix('\''))
    } else {
        None
    }
}

fn unescape_literal(expression: &str, inner: &str) -> Result<String> {
    quick_xml::escape::unescape(inner)
        .map(|s| s.into_owned())
        .map_err(|e| RuleError::invalid_expression(expression, format!("字面量转义无效: {}", e)))
}
