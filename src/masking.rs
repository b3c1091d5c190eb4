//! 敏感信息脱敏接口
//!
//! 脱敏规则本身由外部提供，这里只定义日志适配器调用的接口。

use std::sync::Arc;

/// 负载被截断时追加的标记
pub const TRUNCATED_SUFFIX: &str = "...[TRUNCATED]";

/// 日志文本脱敏
pub trait Masker: Send + Sync {
    fn mask(&self, text: &str) -> String;
}

/// 不做任何处理的脱敏器
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMasker;

impl Masker for NoopMasker {
    fn mask(&self, text: &str) -> String {
        text.to_string()
    }
}

impl<F> Masker for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn mask(&self, text: &str) -> String {
        self(text)
    }
}

/// 默认脱敏器
pub fn noop() -> Arc<dyn Masker> {
    Arc::new(NoopMasker)
}

/// 先脱敏，再按字符数截断
pub fn mask_and_truncate(masker: &dyn Masker, payload: &str, max_length: usize) -> String {
    let masked = masker.mask(payload);
    match masked.char_indices().nth(max_length) {
        Some((cut, _)) => format!("{}{TRUNCATED_SUFFIX}", &masked[..cut]),
        None => masked,
    }
}
