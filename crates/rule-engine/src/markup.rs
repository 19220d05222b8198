//! 规则标记读取
//!
//! 用 quick-xml 把规则标记读成轻量元素树，供编译器递归下降。
//! `eval` 正文保留原始转义文本（`&#44;` 由表达式解析器在拆分操作数后处理），
//! 属性值和其他正文按 XML 规则反转义。CDATA 段在读入时转义为同样的形式，
//! 因此正文始终是合法的 XML 文本。

use crate::error::{Result, RuleError};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use quick_xml::encoding::Decoder;

/// 文档虚拟根元素名
pub(crate) const DOCUMENT: &str = "#document";

/// 标记元素
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MarkupElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    /// 原始（未反转义）正文
    pub text: String,
    pub children: Vec<MarkupElement>,
}

impl MarkupElement {
    fn new(name: impl Into<String>, attributes: Vec<(String, String)>) -> Self {
        Self {
            name: name.into(),
            attributes,
            text: String::new(),
            children: Vec::new(),
        }
    }

    /// 标签名比较（大小写不敏感）
    pub fn is(&self, tag: &str) -> bool {
        self.name.eq_ignore_ascii_case(tag)
    }

    /// 属性值（属性名大小写不敏感）
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn raw_text(&self) -> &str {
        self.text.trim()
    }

    /// 反转义后的正文，转义无效时退回原文
    pub fn unescaped_text(&self) -> String {
        let raw = self.raw_text();
        quick_xml::escape::unescape(raw)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| raw.to_string())
    }
}

/// 读取标记，返回名为 `#document` 的虚拟根
///
/// 元素嵌套深度超过 `max_depth` 时报错。
pub(crate) fn parse_markup(source: &str, max_depth: usize) -> Result<MarkupElement> {
    let mut reader = Reader::from_str(source);
    let mut stack = vec![MarkupElement::new(DOCUMENT, Vec::new())];

    loop {
        let event = reader.read_event().map_err(|e| {
            RuleError::MarkupError(format!("位置 {}: {}", reader.buffer_position(), e))
        })?;

        match event {
            Event::Start(start) => {
                if stack.len() > max_depth {
                    return Err(RuleError::TreeTooDeep(max_depth));
                }
                let element = read_element(&start, reader.decoder())?;
                stack.push(element);
            }
            Event::Empty(start) => {
                let element = read_element(&start, reader.decoder())?;
                current(&mut stack)?.children.push(element);
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| RuleError::MarkupError("多余的结束标签".to_string()))?;
                current(&mut stack)?.children.push(element);
            }
            Event::Text(text) => {
                let text = reader
                    .decoder()
                    .decode(&text)
                    .map_err(|e| RuleError::MarkupError(e.to_string()))?;
                current(&mut stack)?.text.push_str(&text);
            }
            Event::CData(data) => {
                let text = reader
                    .decoder()
                    .decode(&data)
                    .map_err(|e| RuleError::MarkupError(e.to_string()))?;
                current(&mut stack)?
                    .text
                    .push_str(&quick_xml::escape::partial_escape(&*text));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if stack.len() != 1 {
        let open = stack.last().map(|e| e.name.clone()).unwrap_or_default();
        return Err(RuleError::MarkupError(format!("标签 <{}> 未闭合", open)));
    }

    stack
        .pop()
        .ok_or_else(|| RuleError::MarkupError("空文档".to_string()))
}

fn current(stack: &mut [MarkupElement]) -> Result<&mut MarkupElement> {
    stack
        .last_mut()
        .ok_or_else(|| RuleError::MarkupError("多余的结束标签".to_string()))
}

fn read_element(start: &BytesStart<'_>, decoder: Decoder) -> Result<MarkupElement> {
    let name = decoder
        .decode(start.name().as_ref())
        .map_err(|e| RuleError::MarkupError(e.to_string()))?
        .into_owned();

    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| RuleError::MarkupError(format!("<{}> 属性无效: {}", name, e)))?;
        let key = decoder
            .decode(attr.key.as_ref())
            .map_err(|e| RuleError::MarkupError(e.to_string()))?
            .into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| RuleError::MarkupError(format!("<{}> 属性 {} 无效: {}", name, key, e)))?
            .into_owned();
        attributes.push((key, value));
    }

    Ok(MarkupElement::new(name, attributes))
}
