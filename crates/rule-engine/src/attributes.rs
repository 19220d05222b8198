//! 属性目录
//!
//! 规则表达式中的属性名在解析期通过 [`AttributeResolver`] 解析为稳定的
//! `(attribute_id, group_id)`。解析器只依赖该 trait，目录本身由调用方提供。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 已解析的属性引用
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeRef {
    pub attribute_id: u32,
    pub group_id: u32,
    pub name: String,
}

impl AttributeRef {
    pub fn new(name: impl Into<String>, attribute_id: u32, group_id: u32) -> Self {
        Self {
            attribute_id,
            group_id,
            name: name.into(),
        }
    }
}

/// 属性解析能力
///
/// 构建一次后只读共享，贯穿解析器与评估器。
#[cfg_attr(test, mockall::automock)]
pub trait AttributeResolver: Send + Sync {
    fn is_attribute(&self, name: &str) -> bool;

    fn attribute_by_name(&self, name: &str) -> Option<AttributeRef>;

    fn attribute_by_id(&self, attribute_id: u32) -> Option<AttributeRef>;
}

/// 内存属性目录
#[derive(Debug, Clone, Default)]
pub struct AttributeCatalog {
    by_name: HashMap<String, AttributeRef>,
    by_id: HashMap<u32, AttributeRef>,
}

impl AttributeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从属性列表构建（同名属性后者覆盖前者）
    pub fn from_attributes(attributes: impl IntoIterator<Item = AttributeRef>) -> Self {
        let mut catalog = Self::new();
        for attr in attributes {
            catalog.insert(attr);
        }
        catalog
    }

    /// 从 JSON 数组加载，如 `[{"name": "AccountType", "attribute_id": 1, "group_id": 10}]`
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let attributes: Vec<AttributeRef> = serde_json::from_str(json)?;
        Ok(Self::from_attributes(attributes))
    }

    pub fn with_attribute(mut self, name: &str, attribute_id: u32, group_id: u32) -> Self {
        self.insert(AttributeRef::new(name, attribute_id, group_id));
        self
    }

    pub fn insert(&mut self, attr: AttributeRef) {
        self.by_id.insert(attr.attribute_id, attr.clone());
        self.by_name.insert(attr.name.clone(), attr);
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl AttributeResolver for AttributeCatalog {
    fn is_attribute(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    fn attribute_by_name(&self, name: &str) -> Option<AttributeRef> {
        self.by_name.get(name).cloned()
    }

    fn attribute_by_id(&self, attribute_id: u32) -> Option<AttributeRef> {
        self.by_id.get(&attribute_id).cloned()
    }
}
