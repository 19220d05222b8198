//! 自定义操作符注册表
//!
//! 自定义操作符是外部提供的四参数字符串函数，在规则标记中按名称调用。
//! 注册发生在编译之前，编译出的规则树持有注册表快照。

use crate::error::{Result, RuleError};
use crate::operators;
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// 自定义操作符实现
pub type CustomOperatorFn = Arc<dyn Fn(&str, &str, &str, &str) -> String + Send + Sync>;

/// 自定义操作符最多接收的参数个数
pub const MAX_CUSTOM_ARGS: usize = 4;

/// 自定义操作符注册表（按注册顺序参与操作符分类）
#[derive(Clone, Default)]
pub struct CustomOperatorRegistry {
    operators: IndexMap<String, CustomOperatorFn>,
}

impl CustomOperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册自定义操作符
    ///
    /// 名称统一转为大写；与内置操作符（或其任一单词）同名、为空或含空白时拒绝。
    pub fn register<F>(&mut self, name: &str, operator: F) -> Result<()>
    where
        F: Fn(&str, &str, &str, &str) -> String + Send + Sync + 'static,
    {
        let normalized = name.trim().to_ascii_uppercase();
        if normalized.is_empty()
            || normalized.chars().any(char::is_whitespace)
            || operators::is_reserved(&normalized)
        {
            return Err(RuleError::ReservedOperatorName(name.to_string()));
        }

        self.operators.insert(normalized.clone(), Arc::new(operator));
        info!(operator = %normalized, "自定义操作符已注册");
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operators.contains_key(&name.to_ascii_uppercase())
    }

    /// 已注册名称（注册顺序）
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.operators.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// 调用自定义操作符，缺少绑定属于配置错误
    pub fn invoke(&self, name: &str, args: [&str; MAX_CUSTOM_ARGS]) -> Result<String> {
        let operator = self
            .operators
            .get(&name.to_ascii_uppercase())
            .ok_or_else(|| RuleError::UnboundCustomOperator(name.to_string()))?;
        Ok(operator(args[0], args[1], args[2], args[3]))
    }
}

impl fmt::Debug for CustomOperatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomOperatorRegistry")
            .field("operators", &self.operators.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn concat(a: &str, b: &str, c: &str, d: &str) -> String {
        format!("{}{}{}{}", a, b, c, d)
    }

    #[test]
    fn test_register_and_invoke() {
        let mut registry = CustomOperatorRegistry::new();
        registry.register("concat", concat).unwrap();

        assert!(registry.contains("CONCAT"));
        assert!(registry.contains("concat"));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["CONCAT"]);

        let result = registry.invoke("CONCAT", ["a", "b", "", "d"]).unwrap();
        assert_eq!(result, "abd");
    }

    #[test]
    fn test_reserved_name_rejected() {
        let mut registry = CustomOperatorRegistry::new();

        let err = registry.register("GT", concat).unwrap_err();
        assert!(err.is_configuration_error());
        assert!(matches!(err, RuleError::ReservedOperatorName(_)));

        assert!(registry.register("assign_sum", concat).is_err());
        assert!(registry.register("EXISTS", concat).is_err());
        assert!(registry.register("", concat).is_err());
        assert!(registry.register("MY OP", concat).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unbound_operator() {
        let registry = CustomOperatorRegistry::new();
        let err = registry.invoke("MISSING", ["", "", "", ""]).unwrap_err();
        assert!(matches!(err, RuleError::UnboundCustomOperator(name) if name == "MISSING"));
    }

    #[test]
    fn test_registration_order_preserved() {
        let mut registry = CustomOperatorRegistry::new();
        registry.register("UPPER", |a, _, _, _| a.to_uppercase()).unwrap();
        registry.register("CONCAT", concat).unwrap();
        registry.register("LOWER", |a, _, _, _| a.to_lowercase()).unwrap();

        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec!["UPPER", "CONCAT", "LOWER"]
        );
    }
}
