//! 规则引擎错误类型

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("规则标记为空")]
    EmptyMarkup,

    #[error("规则标记解析失败: {0}")]
    MarkupError(String),

    #[error("未知属性: {0}")]
    UnknownAttribute(String),

    #[error("表达式 '{expression}' 无效: {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("自定义操作符 '{0}' 与保留操作符冲突")]
    ReservedOperatorName(String),

    #[error("自定义操作符 '{0}' 未绑定实现")]
    UnboundCustomOperator(String),

    #[error("规则树嵌套深度超过上限 {0}")]
    TreeTooDeep(usize),

    #[error("规则树未找到: {0}")]
    TreeNotFound(String),

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl RuleError {
    pub(crate) fn invalid_expression(expression: &str, reason: impl Into<String>) -> Self {
        Self::InvalidExpression {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }

    /// 解析期错误：中止规则树构建
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyMarkup
                | Self::MarkupError(_)
                | Self::UnknownAttribute(_)
                | Self::InvalidExpression { .. }
                | Self::TreeTooDeep(_)
        )
    }

    /// 配置错误：自定义操作符注册冲突或执行时缺少绑定
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::ReservedOperatorName(_) | Self::UnboundCustomOperator(_)
        )
    }
}

/// 规则内部的数值/日期转换错误
///
/// 只在规则执行内部出现，总是被降级为 `passed = false` 加诊断信息。
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoercionError {
    #[error("无法将 '{0}' 解析为数值")]
    NotANumber(String),

    #[error("无法按格式 {format} 解析日期 '{value}'")]
    InvalidDate { value: String, format: String },
}

pub type Result<T> = std::result::Result<T, RuleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(RuleError::EmptyMarkup.is_parse_error());
        assert!(RuleError::UnknownAttribute("X".into()).is_parse_error());
        assert!(!RuleError::EmptyMarkup.is_configuration_error());

        assert!(RuleError::ReservedOperatorName("GT".into()).is_configuration_error());
        assert!(RuleError::UnboundCustomOperator("CONCAT".into()).is_configuration_error());
        assert!(!RuleError::UnboundCustomOperator("CONCAT".into()).is_parse_error());
    }

    #[test]
    fn test_error_messages() {
        let err = RuleError::invalid_expression("(N.A) FOO (1)", "未知操作符");
        assert!(err.to_string().contains("(N.A) FOO (1)"));
        assert!(err.to_string().contains("未知操作符"));

        let err = CoercionError::NotANumber("abc".into());
        assert!(err.to_string().contains("abc"));
    }
}
