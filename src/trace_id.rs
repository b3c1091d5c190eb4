//! TraceId 核心结构体定义

use std::fmt;

/// W3C 规定的无效 trace-id
const INVALID_W3C_ID: &str = "00000000000000000000000000000000";

/// 追踪ID结构体
///
/// 内部是一个非空的不透明字符串。入站头部中的值原样保留，
/// 新生成的ID为128位随机数的32字符小写十六进制表示。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
pub struct TraceId(String);

impl TraceId {
    /// 生成新的追踪ID（符合 W3C TraceContext 规范）
    ///
    /// 128位随机数，32字符小写十六进制，无分隔符。
    /// 唯一性是概率性的，128位空间内碰撞概率可忽略。
    #[inline]
    pub fn new() -> Self {
        loop {
            let value = fastrand::u128(..);
            // 全零ID在W3C中无效，重新抽取
            if value != 0 {
                return Self(format!("{value:032x}"));
            }
        }
    }

    /// [`TraceId::new`] 的别名
    #[inline]
    pub fn generate() -> Self {
        Self::new()
    }

    /// 从任意字符串创建追踪ID
    ///
    /// 去除首尾空白后为空则返回 `None`，其余内容原样保留。
    #[inline]
    pub fn from_string(id: &str) -> Option<Self> {
        let trimmed = id.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// 从字符串创建追踪ID，并进行 W3C TraceContext 规范校验
    ///
    /// # 校验规则
    /// - 长度必须是 32 个字符
    /// - 只能包含小写十六进制字符（0-9, a-f）
    /// - 不能全为零
    #[inline]
    pub fn from_string_validated(id: &str) -> Option<Self> {
        if Self::is_w3c_str(id) {
            Some(Self(id.to_string()))
        } else {
            None
        }
    }

    /// 当前ID是否符合 W3C trace-id 格式
    #[inline]
    pub fn is_w3c_compliant(&self) -> bool {
        Self::is_w3c_str(&self.0)
    }

    #[inline]
    fn is_w3c_str(id: &str) -> bool {
        id.len() == 32
            && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
            && id != INVALID_W3C_ID
    }

    /// 获取追踪ID字符串
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 取出内部字符串
    #[inline]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRef<str> for TraceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
