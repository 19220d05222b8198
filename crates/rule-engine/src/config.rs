//! 引擎配置
//!
//! 配置文件与环境变量分层加载，缺省值即可直接使用。

use crate::coerce::DEFAULT_DATE_FORMAT;
use crate::compiler::DEFAULT_MAX_DEPTH;
use crate::expression::DEFAULT_EPSILON;
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::Path;

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// true 输出 JSON 结构化日志，false 输出人类可读格式
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// 规则引擎配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 记录中日期值的格式（chrono 格式串）
    pub date_format: String,
    /// GT/LT 边界偏移
    pub numeric_epsilon: f64,
    /// 规则标记最大嵌套深度
    pub max_depth: usize,
    pub trace_enabled: bool,
    pub observability: ObservabilityConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            numeric_epsilon: DEFAULT_EPSILON,
            max_depth: DEFAULT_MAX_DEPTH,
            trace_enabled: false,
            observability: ObservabilityConfig::default(),
        }
    }
}

impl EngineConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的覆盖先加载的）：
    /// 1. $CONFIG_DIR/default.toml
    /// 2. $CONFIG_DIR/rule-engine.toml
    /// 3. 环境变量（RULE_ENGINE__ 前缀，如 RULE_ENGINE__MAX_DEPTH -> max_depth，
    ///    RULE_ENGINE__OBSERVABILITY__LOG_LEVEL -> observability.log_level）
    pub fn load() -> Result<Self, ConfigError> {
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
        Self::load_from(Path::new(&config_dir))
    }

    /// 从指定目录加载
    pub fn load_from(config_dir: &Path) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join("rule-engine.toml")).required(false))
            .add_source(
                Environment::with_prefix("RULE_ENGINE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// 从 TOML 字符串加载，未给出的项取默认值
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}
