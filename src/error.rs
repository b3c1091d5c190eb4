//! 配置错误类型
//!
//! 传播核心本身不会返回错误（格式错误的ID视为缺失），
//! 只有配置校验会产生错误。

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// 响应头名称不是合法的HTTP头部名称
    #[error("invalid response header name: {0:?}")]
    InvalidResponseHeaderName(String),

    /// 提取列表中包含空名称
    #[error("header name at position {0} is empty")]
    EmptyHeaderName(usize),

    /// 启用提取但未配置任何头部，且不允许生成
    #[error("no trace header names configured and generation is disabled")]
    NoTraceSource,

    /// 负载截断长度必须大于 0
    #[error("max payload length must be greater than zero")]
    ZeroPayloadLength,
}
