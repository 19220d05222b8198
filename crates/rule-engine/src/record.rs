//! 分组行式记录
//!
//! 记录由若干分组组成，分组是有序的行序列，每行是 `attribute_id -> 字符串值`。
//! 所有值都是字符串，数值/日期转换集中在 [`crate::coerce`]。

use crate::attributes::AttributeRef;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// 单行数据
pub type Row = HashMap<u32, String>;

/// 同一分组下的有序行
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Group {
    rows: Vec<Row>,
}

impl Group {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&Row> {
        self.rows.get(index)
    }

    /// 读取指定行的属性值
    pub fn get(&self, row: usize, attribute_id: u32) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|r| r.get(&attribute_id))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// 记录
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    groups: BTreeMap<u32, Group>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 JSON 创建，如 `{"10": [{"1": "Savings", "2": ""}]}`
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn get_group(&self, group_id: u32) -> Option<&Group> {
        self.groups.get(&group_id)
    }

    pub fn groups(&self) -> impl Iterator<Item = (u32, &Group)> {
        self.groups.iter().map(|(id, g)| (*id, g))
    }

    /// 读取第 0 行的属性值
    pub fn value(&self, attr: &AttributeRef) -> Option<&str> {
        self.get_group(attr.group_id)
            .and_then(|g| g.get(0, attr.attribute_id))
    }

    /// 读取属性在所有行中的值（缺失该属性的行跳过）
    pub fn values(&self, attr: &AttributeRef) -> Vec<&str> {
        self.get_group(attr.group_id)
            .map(|g| {
                g.rows()
                    .iter()
                    .filter_map(|row| row.get(&attr.attribute_id).map(String::as_str))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 属性在每一行中的值，缺失该属性的行为空串；分组不存在时为空
    pub fn column(&self, attr: &AttributeRef) -> Vec<&str> {
        self.get_group(attr.group_id)
            .map(|g| {
                g.rows()
                    .iter()
                    .map(|row| row.get(&attr.attribute_id).map_or("", String::as_str))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 写入第 0 行，分组或行不存在时自动创建
    pub fn set_value(&mut self, attr: &AttributeRef, value: impl Into<String>) {
        let group = self.groups.entry(attr.group_id).or_default();
        if group.rows.is_empty() {
            group.rows.push(Row::new());
        }
        group.rows[0].insert(attr.attribute_id, value.into());
    }

    pub fn with_value(mut self, attr: &AttributeRef, value: impl Into<String>) -> Self {
        self.set_value(attr, value);
        self
    }

    /// 在分组末尾追加一行
    pub fn push_row(&mut self, group_id: u32, row: Row) {
        self.groups.entry(group_id).or_default().rows.push(row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account_type() -> AttributeRef {
        AttributeRef::new("AccountType", 1, 10)
    }

    #[test]
    fn test_set_and_get_value() {
        let mut record = Record::new();
        assert_eq!(record.value(&account_type()), None);

        record.set_value(&account_type(), "Savings");
        assert_eq!(record.value(&account_type()), Some("Savings"));
        assert_eq!(record.get_group(10).unwrap().len(), 1);

        record.set_value(&account_type(), "Checking");
        assert_eq!(record.value(&account_type()), Some("Checking"));
    }

    #[test]
    fn test_values_over_all_rows() {
        let mut record = Record::new();
        record.push_row(10, Row::from([(1, "Checking".to_string())]));
        record.push_row(10, Row::from([(2, "100".to_string())]));
        record.push_row(10, Row::from([(1, "Saving".to_string())]));

        assert_eq!(record.values(&account_type()), vec!["Checking", "Saving"]);
        assert_eq!(record.get_group(10).unwrap().get(1, 2), Some("100"));
        assert!(record.values(&AttributeRef::new("Missing", 9, 99)).is_empty());
    }

    #[test]
    fn test_column_keeps_row_positions() {
        let mut record = Record::new();
        record.push_row(10, Row::from([(2, "100".to_string())]));
        record.push_row(10, Row::from([(1, "Saving".to_string())]));

        assert_eq!(record.column(&account_type()), vec!["", "Saving"]);
        assert!(record.column(&AttributeRef::new("Missing", 9, 99)).is_empty());
    }

    #[test]
    fn test_record_json() {
        let record = Record::from_json(r#"{"10": [{"1": "Savings", "2": ""}]}"#).unwrap();
        assert_eq!(record.value(&account_type()), Some("Savings"));

        let json = serde_json::to_string(&record).unwrap();
        let parsed = Record::from_json(&json).unwrap();
        assert_eq!(parsed, record);
    }
}
