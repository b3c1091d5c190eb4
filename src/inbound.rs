//! 同步入站适配器
//!
//! 包装一个在单个线程上从头执行到尾的工作单元：
//!
//! 1. 按配置顺序从请求头提取追踪ID，缺失且允许时生成新ID
//! 2. 将追踪ID、服务名和身份头部（用户/租户/组织/角色）写入环境存储
//! 3. 在执行工作之前写入响应头
//! 4. 无条件执行被包装的工作
//! 5. 无论返回、出错还是 panic，最终都清空环境存储
//!
//! 适配器从不捕获或吞掉工作单元的错误，只观察结果用于日志。

use crate::codec::{self, HeaderSink, HeaderSource};
use crate::config::TraceConfig;
use crate::headers::IDENTITY_HEADERS;
use crate::store;
use crate::trace_id::TraceId;
use std::fmt;
use std::sync::Arc;

/// 用于生成追踪ID的函数签名
pub(crate) type Generator = Arc<dyn Fn() -> String + Send + Sync>;

/// 使用自定义生成器或内置生成器产生新ID
///
/// 自定义生成器返回空值时回退到内置生成器。
pub(crate) fn generate_with(generator: Option<&Generator>) -> TraceId {
    generator
        .and_then(|generate| TraceId::from_string(&generate()))
        .unwrap_or_else(codec::generate)
}

/// 作用域守卫：离开作用域时清空环境存储
///
/// 清除放在 `Drop` 中，返回、提前 `?` 和 panic 展开都会执行。
#[must_use = "dropping the guard clears the context immediately"]
pub struct ScopeGuard {
    _private: (),
}

impl ScopeGuard {
    /// 创建守卫；调用方负责在之前或之后填充存储
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl Default for ScopeGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            tracing::debug!(
                trace_id = %store::trace_id_or_unknown(),
                "Unit of work panicked, clearing trace context"
            );
        }
        store::clear_all();
    }
}

/// 同步入站适配器
#[derive(Clone)]
pub struct TraceFilter {
    config: Arc<TraceConfig>,
    generator: Option<Generator>,
}

impl fmt::Debug for TraceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceFilter")
            .field("config", &self.config)
            .field("custom_generator", &self.generator.is_some())
            .finish()
    }
}

impl Default for TraceFilter {
    fn default() -> Self {
        Self::new(TraceConfig::default())
    }
}

impl TraceFilter {
    pub fn new(config: TraceConfig) -> Self {
        Self {
            config: Arc::new(config),
            generator: None,
        }
    }

    /// 使用自定义的生成器
    ///
    /// # 示例
    /// ```
    /// use trace_context::{TraceConfig, TraceFilter};
    ///
    /// let filter = TraceFilter::new(TraceConfig::default())
    ///     .with_generator(|| "custom-id".to_string());
    /// ```
    pub fn with_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.generator = Some(Arc::new(generator));
        self
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    /// 提取或生成追踪ID
    pub fn resolve_trace_id<H>(&self, headers: &H) -> Option<TraceId>
    where
        H: HeaderSource + ?Sized,
    {
        codec::extract(headers, &self.config.header_names).or_else(|| {
            self.config.generate_if_missing.then(|| {
                let trace_id = generate_with(self.generator.as_ref());
                tracing::debug!(trace_id = %trace_id, "Generated new TraceId");
                trace_id
            })
        })
    }

    /// 将追踪ID和身份头部写入环境存储，返回解析出的追踪ID
    pub fn populate<H>(&self, headers: &H) -> Option<TraceId>
    where
        H: HeaderSource + ?Sized,
    {
        let trace_id = self.resolve_trace_id(headers);
        if let Some(trace_id) = &trace_id {
            store::set_trace_id(trace_id.clone());
        }
        if let Some(service_name) = &self.config.service_name {
            store::set_service_name(service_name);
        }
        for (header, key) in IDENTITY_HEADERS {
            if let Some(value) = headers.header(header) {
                store::set(key, value);
            }
        }
        trace_id
    }

    /// 在追踪上下文中执行工作单元
    ///
    /// 返回值原样交还调用方；环境存储在任何退出路径上都会被清空。
    pub fn filter<H, S, F, R>(&self, request_headers: &H, response_headers: &mut S, work: F) -> R
    where
        H: HeaderSource + ?Sized,
        S: HeaderSink + ?Sized,
        F: FnOnce() -> R,
    {
        if !self.config.enabled {
            return work();
        }

        let _guard = ScopeGuard::new();
        let trace_id = self.populate(request_headers);

        if self.config.include_in_response {
            if let Some(trace_id) = &trace_id {
                response_headers.put(&self.config.response_header_name, trace_id.as_str());
            }
        }

        let span = store::span();
        span.in_scope(work)
    }

    /// [`TraceFilter::filter`] 的 `Result` 版本，失败时额外记录调试日志
    ///
    /// 错误原样返回，不做任何转换。
    pub fn filter_result<H, S, F, T, E>(
        &self,
        request_headers: &H,
        response_headers: &mut S,
        work: F,
    ) -> Result<T, E>
    where
        H: HeaderSource + ?Sized,
        S: HeaderSink + ?Sized,
        F: FnOnce() -> Result<T, E>,
        E: fmt::Display,
    {
        self.filter(request_headers, response_headers, || {
            let result = work();
            if let Err(error) = &result {
                tracing::debug!(
                    trace_id = %store::trace_id_or_unknown(),
                    error = %error,
                    "Unit of work failed"
                );
            }
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextKey;
    use crate::headers::X_TRACE_ID;
    use http::{HeaderMap, HeaderValue};

    fn request_with(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_static(*value));
        }
        headers
    }

    #[test]
    fn test_context_visible_inside_and_cleared_after() {
        let filter = TraceFilter::default();
        let request = request_with(&[
            ("x-trace-id", "abc123"),
            ("x-user-id", "user-1"),
            ("x-tenant-id", "tenant-1"),
            ("x-organization-id", "org-1"),
            ("x-user-roles", "ADMIN,USER"),
        ]);
        let mut response = HeaderMap::new();

        let seen = filter.filter(&request, &mut response, || {
            (
                store::trace_id_or_unknown(),
                store::user_id(),
                store::tenant_id(),
                store::organization_id(),
                store::user_roles(),
            )
        });

        assert_eq!(seen.0, "abc123");
        assert_eq!(seen.1.as_deref(), Some("user-1"));
        assert_eq!(seen.2.as_deref(), Some("tenant-1"));
        assert_eq!(seen.3.as_deref(), Some("org-1"));
        assert_eq!(seen.4.as_deref(), Some("ADMIN,USER"));
        assert_eq!(response.get(X_TRACE_ID).unwrap(), "abc123");
        assert!(store::is_empty());
    }

    #[test]
    fn test_generates_when_missing() {
        let filter = TraceFilter::default();
        let mut response = HeaderMap::new();

        let inside = filter.filter(&HeaderMap::new(), &mut response, store::trace_id);

        let generated = inside.expect("trace id should be generated");
        assert!(generated.is_w3c_compliant());
        assert_eq!(response.get(X_TRACE_ID).unwrap(), generated.as_str());
        assert!(store::is_empty());
    }

    #[test]
    fn test_generation_disabled_still_delegates() {
        let filter = TraceFilter::new(TraceConfig::default().generate_if_missing(false));
        let mut response = HeaderMap::new();
        let mut called = false;

        filter.filter(&HeaderMap::new(), &mut response, || {
            called = true;
            assert!(!store::is_present());
        });

        assert!(called, "工作单元必须无条件执行");
        assert!(response.is_empty());
    }

    #[test]
    fn test_custom_response_header_name() {
        let filter = TraceFilter::new(
            TraceConfig::default().response_header_name("X-Correlation-Id"),
        );
        let request = request_with(&[("x-trace-id", "abc123")]);
        let mut response: Vec<(String, String)> = Vec::new();

        filter.filter(&request, &mut response, || ());

        assert_eq!(response, vec![("X-Correlation-Id".to_string(), "abc123".to_string())]);
    }

    #[test]
    fn test_include_in_response_disabled() {
        let filter = TraceFilter::new(TraceConfig::default().include_in_response(false));
        let mut response = HeaderMap::new();
        filter.filter(&HeaderMap::new(), &mut response, || ());
        assert!(response.is_empty());
    }

    #[test]
    fn test_disabled_filter_is_pass_through() {
        let filter = TraceFilter::new(TraceConfig::default().enabled(false));
        store::set_user_id("outer");
        let request = request_with(&[("x-trace-id", "abc123")]);
        let mut response = HeaderMap::new();

        let inside = filter.filter(&request, &mut response, store::trace_id);

        assert_eq!(inside, None);
        assert!(response.is_empty());
        assert_eq!(store::user_id().as_deref(), Some("outer"), "禁用时不应触碰存储");
        store::clear_all();
    }

    #[test]
    fn test_error_is_returned_unchanged_and_context_cleared() {
        let filter = TraceFilter::default();
        let request = request_with(&[("x-trace-id", "abc123")]);
        let mut response = HeaderMap::new();

        let result: Result<(), String> =
            filter.filter_result(&request, &mut response, || {
                store::add_context("orderId", "ORD-1");
                Err("boom".to_string())
            });

        assert_eq!(result, Err("boom".to_string()));
        assert!(store::is_empty());
        assert!(store::all_context().is_empty());
    }

    #[test]
    fn test_panic_still_clears() {
        let filter = TraceFilter::default();
        let request = request_with(&[("x-trace-id", "abc123"), ("x-user-id", "u")]);

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut response = HeaderMap::new();
            filter.filter(&request, &mut response, || {
                assert_eq!(store::trace_id_or_unknown(), "abc123");
                panic!("downstream failure");
            })
        }));

        assert!(outcome.is_err());
        assert!(store::is_empty());
    }

    #[test]
    fn test_custom_generator_and_fallback() {
        let filter = TraceFilter::default().with_generator(|| "custom-id".to_string());
        assert_eq!(
            filter.resolve_trace_id(&HeaderMap::new()).unwrap().as_str(),
            "custom-id"
        );

        let filter = TraceFilter::default().with_generator(String::new);
        let fallback = filter.resolve_trace_id(&HeaderMap::new()).unwrap();
        assert!(fallback.is_w3c_compliant());
    }

    #[test]
    fn test_service_name_and_identity_are_independent() {
        let filter = TraceFilter::new(TraceConfig::default().service_name("order-service"));
        let request = request_with(&[("x-user-id", "user-1")]);
        let mut response = HeaderMap::new();

        filter.filter(&request, &mut response, || {
            assert_eq!(store::get(ContextKey::ServiceName).as_deref(), Some("order-service"));
            assert_eq!(store::get(ContextKey::UserId).as_deref(), Some("user-1"));
            assert_eq!(store::tenant_id(), None);
        });
    }
}
