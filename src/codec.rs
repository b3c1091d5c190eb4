//! 追踪ID编解码
//!
//! 纯函数：从三种线上格式解析追踪ID，以及在缺失时生成新ID。
//!
//! - 纯文本头部（`X-Trace-Id`, `X-Request-Id`）：非空即原样使用
//! - W3C `traceparent`：`{version}-{trace-id}-{parent-id}-{flags}`，取第 1 段
//! - AWS `X-Amzn-Trace-Id`：`Root=...;Parent=...;Sampled=...`，取 `Root` 的值
//!
//! 格式错误一律视为缺失，不会报错。

use crate::headers::{TRACEPARENT, X_AMZN_TRACE_ID};
use crate::trace_id::TraceId;
use http::{HeaderMap, HeaderName, HeaderValue};
use std::collections::{BTreeMap, HashMap};

/// W3C traceparent 的字段数
const TRACEPARENT_FIELDS: usize = 4;
/// W3C traceparent 中 trace-id 的位置
const TRACEPARENT_TRACE_ID_INDEX: usize = 1;
/// X-Ray 头部中承载追踪ID的键
const XRAY_ROOT_KEY: &str = "Root";

// -- 载体抽象 --

/// 可读取头部/属性的入站载体
///
/// 名称比较不区分大小写。
pub trait HeaderSource {
    /// 读取指定名称的第一个值
    fn header(&self, name: &str) -> Option<&str>;
}

/// 可写入头部/属性的出站载体
pub trait HeaderSink {
    /// 写入（或覆盖）一个值
    fn put(&mut self, name: &str, value: &str);
}

impl HeaderSource for HeaderMap {
    fn header(&self, name: &str) -> Option<&str> {
        // HeaderMap 的查找本身不区分大小写；非法名称直接视为缺失
        self.get(name).and_then(|value| value.to_str().ok())
    }
}

impl HeaderSink for HeaderMap {
    fn put(&mut self, name: &str, value: &str) {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            return;
        };
        match HeaderValue::from_str(value) {
            Ok(value) => {
                self.insert(name, value);
            }
            Err(_) => tracing::debug!(header = %name, "Skipping header with invalid value"),
        }
    }
}

/// 精确匹配优先；否则在只有大小写不同的键中取字典序最小的一个，
/// 与 `BTreeMap` 的结果一致，不依赖哈希迭代顺序
impl HeaderSource for HashMap<String, String> {
    fn header(&self, name: &str) -> Option<&str> {
        self.get(name)
            .or_else(|| {
                self.iter()
                    .filter(|(key, _)| key.eq_ignore_ascii_case(name))
                    .min_by(|(a, _), (b, _)| a.cmp(b))
                    .map(|(_, value)| value)
            })
            .map(String::as_str)
    }
}

impl HeaderSink for HashMap<String, String> {
    fn put(&mut self, name: &str, value: &str) {
        self.retain(|key, _| !key.eq_ignore_ascii_case(name));
        self.insert(name.to_string(), value.to_string());
    }
}

impl HeaderSource for BTreeMap<String, String> {
    fn header(&self, name: &str) -> Option<&str> {
        self.get(name)
            .or_else(|| {
                self.iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
                    .map(|(_, value)| value)
            })
            .map(String::as_str)
    }
}

impl HeaderSink for BTreeMap<String, String> {
    fn put(&mut self, name: &str, value: &str) {
        self.retain(|key, _| !key.eq_ignore_ascii_case(name));
        self.insert(name.to_string(), value.to_string());
    }
}

impl HeaderSource for [(String, String)] {
    fn header(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

impl HeaderSource for Vec<(String, String)> {
    fn header(&self, name: &str) -> Option<&str> {
        self.as_slice().header(name)
    }
}

impl HeaderSink for Vec<(String, String)> {
    fn put(&mut self, name: &str, value: &str) {
        // 已存在则替换，否则追加
        if let Some(entry) = self.iter_mut().find(|(key, _)| key.eq_ignore_ascii_case(name)) {
            entry.1 = value.to_string();
        } else {
            self.push((name.to_string(), value.to_string()));
        }
    }
}

impl<T: HeaderSource + ?Sized> HeaderSource for &T {
    fn header(&self, name: &str) -> Option<&str> {
        (**self).header(name)
    }
}

// -- 解析 --

/// 纯文本头部：非空即原样返回
#[inline]
pub fn parse_plain(value: &str) -> Option<TraceId> {
    TraceId::from_string(value)
}

/// 复合头部：按分隔符切分后取固定位置的字段
///
/// 字段数与 `expected_fields` 不一致或目标字段为空时返回 `None`。
pub fn parse_composite(
    value: &str,
    separator: char,
    field_index: usize,
    expected_fields: usize,
) -> Option<TraceId> {
    let fields: Vec<&str> = value.trim().split(separator).collect();
    if fields.len() != expected_fields {
        return None;
    }
    fields
        .get(field_index)
        .and_then(|field| TraceId::from_string(field))
}

/// W3C traceparent：返回 trace-id 段
///
/// 例：`00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01`
#[inline]
pub fn parse_traceparent(value: &str) -> Option<TraceId> {
    parse_composite(value, '-', TRACEPARENT_TRACE_ID_INDEX, TRACEPARENT_FIELDS)
}

/// AWS X-Ray：返回 `Root` 键的值
///
/// 例：`Root=1-5759e988-bd862e3fe1be46a994272793;Parent=53995c3f42cd8ad8;Sampled=1`
pub fn parse_xray(value: &str) -> Option<TraceId> {
    value
        .split(';')
        .filter_map(|part| part.split_once('='))
        .find(|(key, _)| key.trim() == XRAY_ROOT_KEY)
        .and_then(|(_, root)| TraceId::from_string(root))
}

/// 根据头部名称选择解析格式
pub fn parse_header(name: &str, value: &str) -> Option<TraceId> {
    if name.eq_ignore_ascii_case(TRACEPARENT) {
        parse_traceparent(value)
    } else if name.eq_ignore_ascii_case(X_AMZN_TRACE_ID) {
        parse_xray(value)
    } else {
        parse_plain(value)
    }
}

/// 按配置顺序尝试各个头部，返回第一个成功解析的追踪ID
///
/// 格式错误的头部被跳过，继续尝试下一个名称。
pub fn extract<S, N>(headers: &S, header_names: &[N]) -> Option<TraceId>
where
    S: HeaderSource + ?Sized,
    N: AsRef<str>,
{
    header_names.iter().find_map(|name| {
        let name = name.as_ref();
        let value = headers.header(name)?;
        let parsed = parse_header(name, value);
        if parsed.is_none() && !value.trim().is_empty() {
            tracing::debug!(header = name, "Ignoring malformed trace header");
        }
        parsed
    })
}

/// 生成新的追踪ID
#[inline]
pub fn generate() -> TraceId {
    TraceId::generate()
}
