//! 规则树执行器
//!
//! 深度优先遍历规则树：节点的评估型规则按组合逻辑短路求值，
//! 条件成立时执行断言型规则并进入子节点；条件不成立时，
//! 带严重级别的 validate 节点记录失败，子树整体跳过。

use crate::coerce::DEFAULT_DATE_FORMAT;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::evaluator::{EvaluationEnv, RecordPair, RuleEvaluator, RuleOutcome};
use crate::models::{EvaluationReport, Rule, RuleSet, RuleSetFailure, RuleTree};
use crate::operators::{Combinator, Severity};
use crate::record::Record;
use chrono::{Local, NaiveDate};
use std::time::Instant;
use tracing::debug;

/// 规则树执行器
pub struct RuleExecutor {
    /// 是否记录详细评估追踪
    trace_enabled: bool,
    /// 固定的评估日期，未设置时每次调用取当天
    today: Option<NaiveDate>,
    date_format: String,
}

impl RuleExecutor {
    pub fn new() -> Self {
        Self {
            trace_enabled: false,
            today: None,
            date_format: DEFAULT_DATE_FORMAT.to_string(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            trace_enabled: config.trace_enabled,
            today: None,
            date_format: config.date_format.clone(),
        }
    }

    /// 启用评估追踪
    pub fn with_trace(mut self) -> Self {
        self.trace_enabled = true;
        self
    }

    /// 固定 TODAY 的取值
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn with_date_format(mut self, date_format: impl Into<String>) -> Self {
        self.date_format = date_format.into();
        self
    }

    /// 在新旧记录上评估整棵规则树
    ///
    /// 断言型规则会修改 `new`/`old`；规则树本身不变。
    pub fn evaluate(
        &self,
        tree: &RuleTree,
        new: &mut Record,
        old: &mut Record,
    ) -> Result<EvaluationReport> {
        let start = Instant::now();

        let env = EvaluationEnv {
            today: self.today.unwrap_or_else(|| Local::now().date_naive()),
            date_format: &self.date_format,
            operators: tree.operators(),
        };
        let mut records = RecordPair::new(new, old);
        let mut report = EvaluationReport::new();

        self.visit(tree.root(), &mut records, &env, &mut report)?;

        let passed = report.severe_failures().next().is_none();
        report.passed = passed;
        report.evaluation_time_ms = start.elapsed().as_millis() as i64;

        debug!(
            passed = report.passed,
            failures = report.failures.len(),
            fired = report.fired_rule_ids.len(),
            "规则树评估完成"
        );
        Ok(report)
    }

    fn visit(
        &self,
        node: &RuleSet,
        records: &mut RecordPair<'_>,
        env: &EvaluationEnv<'_>,
        report: &mut EvaluationReport,
    ) -> Result<()> {
        report.visited_rule_set_ids.push(node.rule_set_id);
        self.trace(report, || {
            format!(
                "规则集 {}: 开始评估 {} 条件 (共 {} 条规则)",
                node.rule_set_id,
                node.combinator,
                node.evaluative_rules.len()
            )
        });

        let (passed, diagnostics) = self.evaluate_criteria(node, records, env, report)?;

        if !passed {
            if let Some(severity) = node.severity {
                self.record_failure(node, severity, diagnostics, report);
            }
            self.trace(report, || {
                format!("规则集 {}: 条件不成立，跳过子节点", node.rule_set_id)
            });
            return Ok(());
        }

        for rule in &node.assertive_rules {
            let outcome = self.fire(rule, records, env, report)?;
            self.trace(report, || {
                format!(
                    "规则集 {}: 执行 {} => {}",
                    node.rule_set_id,
                    rule.expression,
                    if outcome.passed { "OK" } else { "FAILED" }
                )
            });
        }

        for child in &node.children {
            self.visit(child, records, env, report)?;
        }
        Ok(())
    }

    /// 按组合逻辑短路评估节点条件，返回是否成立及失败规则的诊断信息
    fn evaluate_criteria(
        &self,
        node: &RuleSet,
        records: &mut RecordPair<'_>,
        env: &EvaluationEnv<'_>,
        report: &mut EvaluationReport,
    ) -> Result<(bool, Vec<String>)> {
        let mut diagnostics = Vec::new();
        if node.evaluative_rules.is_empty() {
            return Ok((true, diagnostics));
        }

        match node.combinator {
            Combinator::And => {
                // AND: 遇到不满足的规则立即返回
                for rule in &node.evaluative_rules {
                    let outcome = self.fire(rule, records, env, report)?;
                    if !outcome.passed {
                        diagnostics.push(diagnostic(rule, outcome.message));
                        self.trace(report, || {
                            format!(
                                "规则集 {}: AND 短路 - 规则 {} 不满足",
                                node.rule_set_id, rule.rule_id
                            )
                        });
                        return Ok((false, diagnostics));
                    }
                }
                self.trace(report, || format!("规则集 {}: AND 条件全部满足", node.rule_set_id));
                Ok((true, diagnostics))
            }
            Combinator::Or => {
                // OR: 任一规则满足即返回
                for rule in &node.evaluative_rules {
                    let outcome = self.fire(rule, records, env, report)?;
                    if outcome.passed {
                        self.trace(report, || {
                            format!(
                                "规则集 {}: OR 短路 - 规则 {} 满足",
                                node.rule_set_id, rule.rule_id
                            )
                        });
                        return Ok((true, Vec::new()));
                    }
                    diagnostics.push(diagnostic(rule, outcome.message));
                }
                self.trace(report, || format!("规则集 {}: OR 条件无满足", node.rule_set_id));
                Ok((false, diagnostics))
            }
        }
    }

    fn fire(
        &self,
        rule: &Rule,
        records: &mut RecordPair<'_>,
        env: &EvaluationEnv<'_>,
        report: &mut EvaluationReport,
    ) -> Result<RuleOutcome> {
        report.fired_rule_ids.push(rule.rule_id);
        let outcome = RuleEvaluator::execute(rule, records, env)?;
        self.trace(report, || {
            format!(
                "规则 {}: {} => {}",
                rule.rule_id,
                rule.expression,
                if outcome.passed { "MATCHED" } else { "NOT_MATCHED" }
            )
        });
        Ok(outcome)
    }

    fn record_failure(
        &self,
        node: &RuleSet,
        severity: Severity,
        diagnostics: Vec<String>,
        report: &mut EvaluationReport,
    ) {
        debug!(
            rule_set_id = node.rule_set_id,
            severity = %severity,
            "校验失败"
        );
        report.failures.push(RuleSetFailure {
            rule_set_id: node.rule_set_id,
            severity,
            description: node.description.clone(),
            custom_id: node.custom_id.clone(),
            message: node.custom_failure_msg.clone(),
            diagnostics,
        });
    }

    fn trace(&self, report: &mut EvaluationReport, line: impl FnOnce() -> String) {
        if self.trace_enabled {
            report.evaluation_trace.push(line());
        }
    }
}

impl Default for RuleExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn diagnostic(rule: &Rule, message: Option<String>) -> String {
    message.unwrap_or_else(|| format!("规则 {} 不满足: {}", rule.rule_id, rule.expression))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{AttributeCatalog, AttributeRef};
    use crate::compiler::RuleTreeCompiler;
    use crate::custom_ops::CustomOperatorRegistry;
    use crate::error::RuleError;
    use std::sync::Arc;

    fn account_type() -> AttributeRef {
        AttributeRef::new("AccountType", 1, 10)
    }

    fn balance() -> AttributeRef {
        AttributeRef::new("AccountCurrValue", 2, 10)
    }

    fn compiler() -> RuleTreeCompiler {
        let catalog = AttributeCatalog::new()
            .with_attribute("AccountType", 1, 10)
            .with_attribute("AccountCurrValue", 2, 10)
            .with_attribute("OpenDate", 3, 10)
            .with_attribute("Nickname", 4, 10);
        RuleTreeCompiler::new(Arc::new(catalog))
    }

    fn compile(markup: &str) -> RuleTree {
        compiler().compile(markup).unwrap()
    }

    const BALANCE_RULES: &str = r#"
        <rules>
            <if description="Non-checking accounts">
                <criteria>
                    <eval>(N.AccountType) != ('Checking')</eval>
                </criteria>
                <validate err="severe" description="Reset balance">
                    <criteria>
                        <eval>(N.AccountCurrValue) ASSIGN ('0.00')</eval>
                    </criteria>
                </validate>
            </if>
        </rules>
    "#;

    #[test]
    fn test_flow_then_assignment() {
        let tree = compile(BALANCE_RULES);
        let mut new = Record::new().with_value(&account_type(), "Savings");
        let mut old = Record::new();

        let report = RuleExecutor::new().evaluate(&tree, &mut new, &mut old).unwrap();

        assert!(report.passed);
        assert!(report.severe_failures().next().is_none());
        assert_eq!(new.value(&balance()), Some("0.00"));
        assert_eq!(report.visited_rule_set_ids, vec![1, 2, 3]);
        assert_eq!(report.fired_rule_ids, vec![1, 2]);
    }

    #[test]
    fn test_false_guard_skips_subtree() {
        let tree = compile(BALANCE_RULES);
        let mut new = Record::new().with_value(&account_type(), "Checking");
        let mut old = Record::new();

        let report = RuleExecutor::new().evaluate(&tree, &mut new, &mut old).unwrap();

        assert!(report.passed);
        assert!(new.value(&balance()).is_none());
        assert_eq!(report.visited_rule_set_ids, vec![1, 2]);
        // flow 节点没有严重级别，不记录失败
        assert!(report.failures.is_empty());
    }

    #[test]
    fn test_severity_levels() {
        let tree = compile(
            r#"
            <rules>
                <validate err="warning" description="Nickname recommended">
                    <criteria><eval>(N.Nickname) POPULATED</eval></criteria>
                    <customId>W-1</customId>
                </validate>
                <validate err="severe" description="Type required">
                    <criteria><eval>(N.AccountType) POPULATED</eval></criteria>
                    <failure_message>Account type is required</failure_message>
                </validate>
                <validate err="severe" description="Balance range">
                    <criteria><eval>(N.AccountCurrValue) GE (0)</eval></criteria>
                </validate>
            </rules>
            "#,
        );

        let mut new = Record::new().with_value(&balance(), "5");
        let report = RuleExecutor::new()
            .evaluate(&tree, &mut new, &mut Record::new())
            .unwrap();

        assert!(!report.passed);
        assert_eq!(report.failed_rule_set_ids(), vec![2, 3]);
        assert_eq!(report.warnings(), vec![2]);
        // 严重失败后兄弟节点仍被访问
        assert_eq!(report.visited_rule_set_ids, vec![1, 2, 3, 4]);

        let warning = &report.failures[0];
        assert_eq!(warning.custom_id.as_deref(), Some("W-1"));
        assert_eq!(warning.description, "Nickname recommended");

        let severe: Vec<_> = report.severe_failures().collect();
        assert_eq!(severe.len(), 1);
        assert_eq!(severe[0].message.as_deref(), Some("Account type is required"));
        assert_eq!(severe[0].diagnostics.len(), 1);
        assert!(severe[0].diagnostics[0].contains("(N.AccountType) POPULATED"));

        new.set_value(&account_type(), "Loan");
        let report = RuleExecutor::new()
            .evaluate(&tree, &mut new, &mut Record::new())
            .unwrap();
        assert!(report.passed);
        assert_eq!(report.warnings(), vec![2]);
    }

    #[test]
    fn test_failing_validate_skips_children() {
        let tree = compile(
            r#"
            <validate err="severe">
                <criteria><eval>(N.AccountType) POPULATED</eval></criteria>
                <validate err="severe">
                    <criteria><eval>(N.Nickname) POPULATED</eval></criteria>
                </validate>
            </validate>
            "#,
        );

        let report = RuleExecutor::new()
            .evaluate(&tree, &mut Record::new(), &mut Record::new())
            .unwrap();

        assert_eq!(report.failed_rule_set_ids(), vec![2]);
        assert_eq!(report.visited_rule_set_ids, vec![1, 2]);
    }

    #[test]
    fn test_or_short_circuit_trace() {
        let tree = compile(
            r#"
            <validate err="severe">
                <criteria op="OR">
                    <eval>(N.AccountType) POPULATED</eval>
                    <eval>(N.Nickname) POPULATED</eval>
                </criteria>
            </validate>
            "#,
        );
        let mut new = Record::new().with_value(&account_type(), "Loan");

        let report = RuleExecutor::new()
            .with_trace()
            .evaluate(&tree, &mut new, &mut Record::new())
            .unwrap();

        assert!(report.passed);
        assert_eq!(report.fired_rule_ids, vec![1]);
        assert!(report.evaluation_trace.iter().any(|t| t.contains("OR 短路")));

        let quiet = RuleExecutor::new()
            .evaluate(&tree, &mut new, &mut Record::new())
            .unwrap();
        assert!(quiet.evaluation_trace.is_empty());
    }

    #[test]
    fn test_and_short_circuit() {
        let tree = compile(
            r#"
            <validate err="warning">
                <criteria op="AND">
                    <eval>(N.AccountType) POPULATED</eval>
                    <eval>(N.Nickname) POPULATED</eval>
                </criteria>
            </validate>
            "#,
        );

        let report = RuleExecutor::new()
            .with_trace()
            .evaluate(&tree, &mut Record::new(), &mut Record::new())
            .unwrap();

        assert_eq!(report.fired_rule_ids, vec![1]);
        assert!(report.evaluation_trace.iter().any(|t| t.contains("AND 短路")));
    }

    #[test]
    fn test_repeated_evaluation_is_idempotent() {
        let tree = compile(
            r#"
            <rules>
                <validate err="severe">
                    <criteria op="OR">
                        <eval>(N.AccountType) IN ('Checking', 'Loan')</eval>
                        <eval>(N.AccountCurrValue) GT (O.AccountCurrValue)</eval>
                    </criteria>
                </validate>
                <validate err="warning">
                    <criteria><eval>(N.OpenDate) IS BEFORE (TODAY)</eval></criteria>
                </validate>
            </rules>
            "#,
        );
        let mut new = Record::new()
            .with_value(&account_type(), "Savings")
            .with_value(&balance(), "10");
        let mut old = Record::new().with_value(&balance(), "20");
        let before = (new.clone(), old.clone());

        let executor = RuleExecutor::new()
            .with_trace()
            .with_today(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        let first = executor.evaluate(&tree, &mut new, &mut old).unwrap();
        let second = executor.evaluate(&tree, &mut new, &mut old).unwrap();

        assert_eq!(first.passed, second.passed);
        assert_eq!(first.failures, second.failures);
        assert_eq!(first.fired_rule_ids, second.fired_rule_ids);
        assert_eq!(first.evaluation_trace, second.evaluation_trace);
        assert_eq!((new, old), before);
        assert!(!first.passed);
    }

    #[test]
    fn test_today_is_configurable() {
        let tree = compile(
            r#"<validate err="severe"><criteria><eval>(N.OpenDate) IS BEFORE (TODAY)</eval></criteria></validate>"#,
        );
        let open_date = AttributeRef::new("OpenDate", 3, 10);
        let mut new = Record::new().with_value(&open_date, "03/01/2024");

        let early = RuleExecutor::new().with_today(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert!(!early.evaluate(&tree, &mut new, &mut Record::new()).unwrap().passed);

        let late = RuleExecutor::new().with_today(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert!(late.evaluate(&tree, &mut new, &mut Record::new()).unwrap().passed);
    }

    #[test]
    fn test_unbound_custom_operator_is_error() {
        let mut compiler = compiler();
        compiler
            .register_custom_operator("SHOUT", |a, _, _, _| a.to_uppercase())
            .unwrap();
        let mut tree = compiler
            .compile("<if><eval>(N.Nickname) SHOUT (N.AccountType)</eval></if>")
            .unwrap();

        let mut new = Record::new().with_value(&account_type(), "loan");
        RuleExecutor::new()
            .evaluate(&tree, &mut new, &mut Record::new())
            .unwrap();
        assert_eq!(new.value(&AttributeRef::new("Nickname", 4, 10)), Some("LOAN"));

        tree.rebind_operators(Arc::new(CustomOperatorRegistry::new()));
        let err = RuleExecutor::new()
            .evaluate(&tree, &mut new, &mut Record::new())
            .unwrap_err();
        assert!(matches!(err, RuleError::UnboundCustomOperator(_)));
    }

    #[test]
    fn test_from_config() {
        let config = EngineConfig {
            trace_enabled: true,
            ..EngineConfig::default()
        };
        let tree = compile(BALANCE_RULES);
        let report = RuleExecutor::from_config(&config)
            .evaluate(&tree, &mut Record::new(), &mut Record::new())
            .unwrap();
        assert!(!report.evaluation_trace.is_empty());
    }
}
