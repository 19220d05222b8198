//! 规则评估器
//!
//! 对一条已编译的规则在新/旧记录对上求值。评估型规则只读取记录，
//! 断言型规则把结果写回目标记录第 0 行。
//!
//! 所有属性值在每次调用时重新读取，求值结果不会保存在规则上。
//! 数值或日期转换失败时规则不通过并附带诊断信息，不会向上抛错；
//! 只有缺少自定义操作符绑定这类配置错误才返回 `Err`。

use crate::attributes::AttributeRef;
use crate::coerce;
use crate::custom_ops::{CustomOperatorRegistry, MAX_CUSTOM_ARGS};
use crate::error::{CoercionError, Result};
use crate::models::{DateBound, NumericBound, RecordSelector, Rule, RuleKind, ValueSource};
use crate::record::Record;
use chrono::NaiveDate;
use tracing::{trace, warn};

/// 一次评估涉及的新旧记录
pub struct RecordPair<'a> {
    pub new: &'a mut Record,
    pub old: &'a mut Record,
}

impl<'a> RecordPair<'a> {
    pub fn new(new: &'a mut Record, old: &'a mut Record) -> Self {
        Self { new, old }
    }

    pub fn record(&self, selector: RecordSelector) -> Option<&Record> {
        match selector {
            RecordSelector::New => Some(&*self.new),
            RecordSelector::Old => Some(&*self.old),
            RecordSelector::None => None,
        }
    }

    pub fn record_mut(&mut self, selector: RecordSelector) -> Option<&mut Record> {
        match selector {
            RecordSelector::New => Some(&mut *self.new),
            RecordSelector::Old => Some(&mut *self.old),
            RecordSelector::None => None,
        }
    }

    /// 第 0 行的值，缺失时为空串
    fn value(&self, selector: RecordSelector, attr: &AttributeRef) -> String {
        self.record(selector)
            .and_then(|r| r.value(attr))
            .unwrap_or_default()
            .to_string()
    }

    fn values(&self, selector: RecordSelector, attr: &AttributeRef) -> Vec<String> {
        self.record(selector)
            .map(|r| r.values(attr).into_iter().map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn column(&self, selector: RecordSelector, attr: &AttributeRef) -> Vec<String> {
        self.record(selector)
            .map(|r| r.column(attr).into_iter().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

/// 评估环境
#[derive(Debug, Clone, Copy)]
pub struct EvaluationEnv<'a> {
    /// 本次评估的当天日期（TODAY）
    pub today: NaiveDate,
    pub date_format: &'a str,
    pub operators: &'a CustomOperatorRegistry,
}

/// 单条规则的执行结果
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    pub passed: bool,
    /// 诊断信息（转换失败、写入被拒绝等）
    pub message: Option<String>,
}

impl RuleOutcome {
    fn pass(passed: bool) -> Self {
        Self {
            passed,
            message: None,
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: Some(message.into()),
        }
    }
}

/// 规则评估器
pub struct RuleEvaluator;

impl RuleEvaluator {
    /// 执行一条规则
    pub fn execute(
        rule: &Rule,
        records: &mut RecordPair<'_>,
        env: &EvaluationEnv<'_>,
    ) -> Result<RuleOutcome> {
        let outcome = match &rule.kind {
            RuleKind::Populated => Self::populated(rule, records),
            RuleKind::Domain {
                members,
                search_all_rows,
            } => Self::domain(rule, records, members, *search_all_rows),
            RuleKind::ArithmeticLimit { min, max, .. } => {
                Self::arithmetic_limit(rule, records, min, max)
            }
            RuleKind::DateLimit { min, max, .. } => Self::date_limit(rule, records, env, min, max),
            RuleKind::Assignment {
                value,
                default_only,
            } => Self::assign(rule, records, value, *default_only),
            RuleKind::Arithmetic { op, operands } => {
                let result = operands
                    .iter()
                    .flat_map(|operand| Self::resolve_operands(records, operand))
                    .map(|value| coerce::number_or_zero(&value))
                    .reduce(|acc, n| op.apply(acc, n))
                    .unwrap_or(0.0);
                if result.is_finite() {
                    Self::write(rule, records, coerce::format_integral(result))
                } else {
                    RuleOutcome::fail(format!("规则 {}: {} 运算结果无效", rule.rule_id, op))
                }
            }
            RuleKind::CustomOp { name, args } => {
                let mut resolved: Vec<String> =
                    args.iter().map(|arg| Self::resolve(records, arg)).collect();
                resolved.resize(MAX_CUSTOM_ARGS, String::new());
                let result = env.operators.invoke(
                    name,
                    [
                        resolved[0].as_str(),
                        resolved[1].as_str(),
                        resolved[2].as_str(),
                        resolved[3].as_str(),
                    ],
                )?;
                Self::write(rule, records, result)
            }
        };

        if let Some(message) = &outcome.message {
            warn!(rule_id = rule.rule_id, message = %message, "规则降级为不通过");
        }
        trace!(
            rule_id = rule.rule_id,
            operator = %rule.operator,
            passed = outcome.passed,
            "规则执行完成"
        );
        Ok(outcome)
    }

    fn populated(rule: &Rule, records: &RecordPair<'_>) -> RuleOutcome {
        let value = records.value(rule.record, &rule.target);
        RuleOutcome::pass(!value.is_empty() != rule.not_operator)
    }

    fn domain(
        rule: &Rule,
        records: &RecordPair<'_>,
        members: &[ValueSource],
        search_all_rows: bool,
    ) -> RuleOutcome {
        let domain: Vec<String> = members
            .iter()
            .flat_map(|member| Self::resolve_all(records, member))
            .collect();

        let candidates = if search_all_rows {
            let values = records.values(rule.record, &rule.target);
            if values.is_empty() {
                vec![String::new()]
            } else {
                values
            }
        } else {
            vec![records.value(rule.record, &rule.target)]
        };

        let matched = candidates.iter().any(|value| domain.contains(value));
        RuleOutcome::pass(matched != rule.not_operator)
    }

    fn arithmetic_limit(
        rule: &Rule,
        records: &RecordPair<'_>,
        min: &NumericBound,
        max: &NumericBound,
    ) -> RuleOutcome {
        let checked = || -> std::result::Result<bool, CoercionError> {
            let value = coerce::parse_number(&records.value(rule.record, &rule.target))?;
            let min = Self::numeric_bound(records, min)?;
            let max = Self::numeric_bound(records, max)?;
            Ok(min <= value && value <= max)
        };

        match checked() {
            Ok(within) => RuleOutcome::pass(within != rule.not_operator),
            Err(e) => RuleOutcome::fail(format!("规则 {}: {}", rule.rule_id, e)),
        }
    }

    fn date_limit(
        rule: &Rule,
        records: &RecordPair<'_>,
        env: &EvaluationEnv<'_>,
        min: &DateBound,
        max: &DateBound,
    ) -> RuleOutcome {
        let checked = || -> std::result::Result<bool, CoercionError> {
            let value = coerce::parse_date(&records.value(rule.record, &rule.target), env.date_format)?;
            let min = Self::date_bound(records, env, min)?;
            let max = Self::date_bound(records, env, max)?;
            Ok(min < value && value < max)
        };

        match checked() {
            Ok(within) => RuleOutcome::pass(within != rule.not_operator),
            Err(e) => RuleOutcome::fail(format!("规则 {}: {}", rule.rule_id, e)),
        }
    }

    fn assign(
        rule: &Rule,
        records: &mut RecordPair<'_>,
        value: &ValueSource,
        default_only: bool,
    ) -> RuleOutcome {
        if default_only && !records.value(rule.record, &rule.target).is_empty() {
            return RuleOutcome::pass(true);
        }
        let value = Self::resolve(records, value);
        Self::write(rule, records, value)
    }

    /// 写入目标记录第 0 行
    fn write(rule: &Rule, records: &mut RecordPair<'_>, value: String) -> RuleOutcome {
        match records.record_mut(rule.record) {
            Some(record) => {
                record.set_value(&rule.target, value);
                RuleOutcome::pass(true)
            }
            None => RuleOutcome::fail(format!(
                "规则 {}: 未指定目标记录，无法写入 {}",
                rule.rule_id, rule.target.name
            )),
        }
    }

    /// 解析为单值：字面量原样返回，属性取第 0 行
    fn resolve(records: &RecordPair<'_>, source: &ValueSource) -> String {
        match source {
            ValueSource::Literal { value } => value.clone(),
            ValueSource::Attribute(link) => records.value(link.record, &link.attr),
        }
    }

    /// 解析为值列表：属性展开到所在分组的全部行
    fn resolve_all(records: &RecordPair<'_>, source: &ValueSource) -> Vec<String> {
        match source {
            ValueSource::Literal { value } => vec![value.clone()],
            ValueSource::Attribute(link) => records.values(link.record, &link.attr),
        }
    }

    /// 运算操作数：属性按行展开，缺失的行或属性按一个空值计
    fn resolve_operands(records: &RecordPair<'_>, source: &ValueSource) -> Vec<String> {
        match source {
            ValueSource::Literal { value } => vec![value.clone()],
            ValueSource::Attribute(link) => {
                let column = records.column(link.record, &link.attr);
                if column.is_empty() {
                    vec![String::new()]
                } else {
                    column
                }
            }
        }
    }

    fn numeric_bound(
        records: &RecordPair<'_>,
        bound: &NumericBound,
    ) -> std::result::Result<f64, CoercionError> {
        match bound {
            NumericBound::Literal { value } => Ok(*value),
            NumericBound::Attribute { link, offset } => {
                Ok(coerce::parse_number(&records.value(link.record, &link.attr))? + offset)
            }
        }
    }

    fn date_bound(
        records: &RecordPair<'_>,
        env: &EvaluationEnv<'_>,
        bound: &DateBound,
    ) -> std::result::Result<NaiveDate, CoercionError> {
        match bound {
            DateBound::Literal { value } => Ok(*value),
            DateBound::Today => Ok(env.today),
            DateBound::Attribute(link) => {
                coerce::parse_date(&records.value(link.record, &link.attr), env.date_format)
            }
        }
    }
}
