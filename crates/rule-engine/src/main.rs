//! 规则引擎命令行
//!
//! 编译规则标记并导出，或在新/旧记录上评估规则树。
//!
//! 用法：
//!   rule-engine export --markup rules.xml --attributes attributes.json --format markup
//!   rule-engine eval --markup rules.xml --attributes attributes.json --new new.json [--old old.json] [--trace]

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use rule_engine::{
    AttributeCatalog, EngineConfig, Record, RuleExecutor, RuleTree, RuleTreeCompiler,
    observability,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "rule-engine", about = "Business rule engine")]
struct Cli {
    /// 配置目录，缺省读取 $CONFIG_DIR 或 ./config
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 编译规则标记并输出规则树描述
    Export {
        #[arg(long)]
        markup: PathBuf,
        /// 属性目录 JSON
        #[arg(long)]
        attributes: PathBuf,
        #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,
    },
    /// 在记录上评估规则树，输出报告与更新后的记录
    Eval {
        #[arg(long)]
        markup: PathBuf,
        #[arg(long)]
        attributes: PathBuf,
        /// 新记录 JSON
        #[arg(long)]
        new: PathBuf,
        /// 旧记录 JSON，缺省为空记录
        #[arg(long)]
        old: Option<PathBuf>,
        /// 输出评估追踪
        #[arg(long)]
        trace: bool,
        /// 固定 TODAY（按配置的日期格式）
        #[arg(long)]
        today: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportFormat {
    Json,
    Markup,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let loaded = match &cli.config_dir {
        Some(dir) => EngineConfig::load_from(dir),
        None => EngineConfig::load(),
    };
    let config = loaded.unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        EngineConfig::default()
    });

    observability::init(&config.observability)?;

    match cli.command {
        Command::Export {
            markup,
            attributes,
            format,
        } => {
            let tree = compile(&config, &markup, &attributes)?;
            let exported = tree.export();
            let output = match format {
                ExportFormat::Json => exported.to_json()?,
                ExportFormat::Markup => exported.to_markup()?,
            };
            println!("{}", output);
            Ok(ExitCode::SUCCESS)
        }
        Command::Eval {
            markup,
            attributes,
            new,
            old,
            trace,
            today,
        } => {
            let tree = compile(&config, &markup, &attributes)?;
            let mut new_record = read_record(&new)?;
            let mut old_record = match &old {
                Some(path) => read_record(path)?,
                None => Record::new(),
            };

            let mut executor = RuleExecutor::from_config(&config);
            if trace {
                executor = executor.with_trace();
            }
            if let Some(today) = today {
                let date = NaiveDate::parse_from_str(&today, &config.date_format)
                    .with_context(|| format!("invalid --today value: {}", today))?;
                executor = executor.with_today(date);
            }

            let report = executor.evaluate(&tree, &mut new_record, &mut old_record)?;
            info!(
                passed = report.passed,
                failures = report.failures.len(),
                elapsed_ms = report.evaluation_time_ms,
                "评估完成"
            );

            let output = json!({
                "report": report,
                "new": new_record,
                "old": old_record,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);

            Ok(if report.passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            })
        }
    }
}

fn compile(config: &EngineConfig, markup: &Path, attributes: &Path) -> Result<RuleTree> {
    let catalog_json = std::fs::read_to_string(attributes)
        .with_context(|| format!("failed to read attributes: {}", attributes.display()))?;
    let catalog = AttributeCatalog::from_json(&catalog_json)
        .with_context(|| format!("invalid attribute catalog: {}", attributes.display()))?;

    let source = std::fs::read_to_string(markup)
        .with_context(|| format!("failed to read markup: {}", markup.display()))?;

    let mut compiler = RuleTreeCompiler::from_config(Arc::new(catalog), config);
    let tree = compiler
        .compile(&source)
        .with_context(|| format!("failed to compile {}", markup.display()))?;
    Ok(tree)
}

fn read_record(path: &Path) -> Result<Record> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read record: {}", path.display()))?;
    Record::from_json(&json).with_context(|| format!("invalid record: {}", path.display()))
}
