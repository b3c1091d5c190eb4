//! 追踪与消息拦截配置
//!
//! ```yaml
//! trace:
//!   enabled: true
//!   generate-if-missing: true
//!   include-in-response: true
//!   header-names: [X-Trace-Id, X-Request-Id, traceparent, X-Amzn-Trace-Id]
//!   response-header-name: X-Trace-Id
//! message:
//!   enabled: true
//!   log-payload: false
//!   max-payload-length: 500
//! ```
//!
//! 启用 `serde` feature 后两个结构体都可以直接反序列化，缺失字段取默认值。

use crate::error::ConfigError;
use crate::headers::{DEFAULT_HEADER_NAMES, X_TRACE_ID};
use http::HeaderName;

/// 默认的负载日志截断长度
pub const DEFAULT_MAX_PAYLOAD_LENGTH: usize = 500;

/// 追踪ID提取与生成配置
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "kebab-case"))]
pub struct TraceConfig {
    /// 是否启用（默认启用）
    pub enabled: bool,
    /// 请求中没有追踪ID时是否生成（默认启用）
    pub generate_if_missing: bool,
    /// 是否在响应头中返回追踪ID（默认启用）
    pub include_in_response: bool,
    /// 提取追踪ID时依次尝试的头部名称
    pub header_names: Vec<String>,
    /// 响应头名称
    pub response_header_name: String,
    /// 写入上下文的服务名
    pub service_name: Option<String>,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            generate_if_missing: true,
            include_in_response: true,
            header_names: DEFAULT_HEADER_NAMES.iter().map(|s| s.to_string()).collect(),
            response_header_name: X_TRACE_ID.to_string(),
            service_name: None,
        }
    }
}

impl TraceConfig {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn generate_if_missing(mut self, generate: bool) -> Self {
        self.generate_if_missing = generate;
        self
    }

    pub fn include_in_response(mut self, include: bool) -> Self {
        self.include_in_response = include;
        self
    }

    pub fn header_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.header_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn response_header_name(mut self, name: impl Into<String>) -> Self {
        self.response_header_name = name.into();
        self
    }

    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(position) = self.header_names.iter().position(|n| n.trim().is_empty()) {
            return Err(ConfigError::EmptyHeaderName(position));
        }
        if self.enabled && self.header_names.is_empty() && !self.generate_if_missing {
            return Err(ConfigError::NoTraceSource);
        }
        if self.include_in_response
            && HeaderName::from_bytes(self.response_header_name.as_bytes()).is_err()
        {
            return Err(ConfigError::InvalidResponseHeaderName(
                self.response_header_name.clone(),
            ));
        }
        Ok(())
    }
}

/// 消息拦截配置
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "kebab-case"))]
pub struct MessageConfig {
    /// 是否输出消息生命周期日志（上下文传播不受影响）
    pub enabled: bool,
    /// 是否记录消息负载（注意敏感信息）
    pub log_payload: bool,
    /// 负载日志的最大长度
    pub max_payload_length: usize,
    /// 写入上下文的服务名
    pub service_name: Option<String>,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_payload: false,
            max_payload_length: DEFAULT_MAX_PAYLOAD_LENGTH,
            service_name: None,
        }
    }
}

impl MessageConfig {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn log_payload(mut self, log_payload: bool) -> Self {
        self.log_payload = log_payload;
        self
    }

    pub fn max_payload_length(mut self, length: usize) -> Self {
        self.max_payload_length = length;
        self
    }

    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_payload_length == 0 {
            return Err(ConfigError::ZeroPayloadLength);
        }
        Ok(())
    }
}
