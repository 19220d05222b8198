//! 规则引擎性能基准测试
//!
//! 覆盖规则标记编译、单棵规则树评估以及值域规模对评估耗时的影响。

use chrono::NaiveDate;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rule_engine::{AttributeCatalog, AttributeRef, Record, RuleExecutor, RuleTree, RuleTreeCompiler};
use std::hint::black_box;
use std::sync::Arc;

fn catalog() -> AttributeCatalog {
    AttributeCatalog::new()
        .with_attribute("AccountType", 1, 10)
        .with_attribute("AccountCurrValue", 2, 10)
        .with_attribute("OpenDate", 3, 10)
        .with_attribute("Owner", 4, 10)
        .with_attribute("Fee", 5, 20)
        .with_attribute("TotalFees", 6, 10)
}

/// 生成包含 `branches` 个 if 分支的规则标记
fn create_markup(branches: usize) -> String {
    let mut markup = String::from("<rules>");
    for i in 0..branches {
        markup.push_str(&format!(
            r#"
            <if description="branch {i}">
                <criteria op="OR">
                    <eval>(N.AccountType) IN ('Checking', 'Savings', 'Loan')</eval>
                    <eval>(N.AccountCurrValue) GT ({i})</eval>
                </criteria>
                <validate err="severe">
                    <criteria>
                        <eval>(N.OpenDate) IS BEFORE (TODAY)</eval>
                        <eval>(N.Owner) POPULATED</eval>
                        <eval>(N.TotalFees) ASSIGN_SUM (N.Fee)</eval>
                    </criteria>
                </validate>
            </if>"#
        ));
    }
    markup.push_str("</rules>");
    markup
}

fn create_record() -> Record {
    let mut record = Record::new()
        .with_value(&AttributeRef::new("AccountType", 1, 10), "Savings")
        .with_value(&AttributeRef::new("AccountCurrValue", 2, 10), "150.25")
        .with_value(&AttributeRef::new("OpenDate", 3, 10), "01/15/2024")
        .with_value(&AttributeRef::new("Owner", 4, 10), "Smith");
    for fee in 0..10 {
        record.push_row(20, [(5, format!("{}.5", fee))].into_iter().collect());
    }
    record
}

fn compile(markup: &str) -> RuleTree {
    RuleTreeCompiler::new(Arc::new(catalog()))
        .compile(markup)
        .unwrap()
}

/// 编译基准
fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");

    for branches in [1, 10, 50] {
        let markup = create_markup(branches);
        group.bench_with_input(BenchmarkId::from_parameter(branches), &markup, |b, markup| {
            let mut compiler = RuleTreeCompiler::new(Arc::new(catalog()));
            b.iter(|| compiler.compile(black_box(markup)).unwrap())
        });
    }

    group.finish();
}

/// 评估基准
fn bench_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluate");
    let executor = RuleExecutor::new().with_today(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());

    for branches in [1, 10, 50] {
        let tree = compile(&create_markup(branches));
        let record = create_record();
        group.bench_with_input(BenchmarkId::from_parameter(branches), &tree, |b, tree| {
            b.iter(|| {
                let mut new = record.clone();
                let mut old = Record::new();
                executor
                    .evaluate(black_box(tree), &mut new, &mut old)
                    .unwrap()
            })
        });
    }

    group.finish();
}

/// 值域规模基准
fn bench_domain_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("domain_scaling");
    let executor = RuleExecutor::new();

    for size in [10, 100, 1000] {
        let members: Vec<String> = (0..size).map(|i| format!("'type-{}'", i)).collect();
        let markup = format!(
            "<validate err=\"severe\"><eval>(N.AccountType) IN ({})</eval></validate>",
            members.join(", ")
        );
        let tree = compile(&markup);
        let record = Record::new().with_value(
            &AttributeRef::new("AccountType", 1, 10),
            format!("type-{}", size - 1),
        );

        group.bench_with_input(BenchmarkId::from_parameter(size), &tree, |b, tree| {
            b.iter(|| {
                let mut new = record.clone();
                executor
                    .evaluate(black_box(tree), &mut new, &mut Record::new())
                    .unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_compile, bench_evaluate, bench_domain_scaling);
criterion_main!(benches);
