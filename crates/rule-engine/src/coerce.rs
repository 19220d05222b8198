//! 字符串值转换
//!
//! 记录中的值都是字符串。所有规则的数值/日期转换都经过这里，
//! 失败时返回 [`CoercionError`]，由规则降级为 `passed = false`。

use crate::error::CoercionError;
use chrono::NaiveDate;

/// 默认日期格式 MM/dd/yyyy
pub const DEFAULT_DATE_FORMAT: &str = "%m/%d/%Y";

/// 解析有限浮点数
pub fn parse_number(value: &str) -> Result<f64, CoercionError> {
    let trimmed = value.trim();
    match trimmed.parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(n),
        _ => Err(CoercionError::NotANumber(value.to_string())),
    }
}

/// 解析数值，失败按 0 处理（算术派生使用）
pub fn number_or_zero(value: &str) -> f64 {
    parse_number(value).unwrap_or(0.0)
}

/// 按格式解析日期
pub fn parse_date(value: &str, format: &str) -> Result<NaiveDate, CoercionError> {
    NaiveDate::parse_from_str(value.trim(), format).map_err(|_| CoercionError::InvalidDate {
        value: value.to_string(),
        format: format.to_string(),
    })
}

/// 将数值结果格式化为整数字符串（截断小数）
pub fn format_integral(value: f64) -> String {
    format!("{}", value.trunc() as i64)
}
