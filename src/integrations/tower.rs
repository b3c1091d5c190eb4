//! Tower 中间件
//!
//! - [`TraceContextLayer`]：异步入站适配器。每个请求解析追踪ID和身份头部，
//!   构造上下文快照并通过桥接附着在请求 future 上，
//!   处理过程无论在哪个工作线程上被 poll 都能读到自己的上下文。
//! - [`PropagateContextLayer`]：出站客户端中间件，
//!   在调用内层服务之前把当前上下文写入请求头。

use crate::bridge::{self, TraceContextExt};
use crate::codec::HeaderSink;
use crate::config::TraceConfig;
use crate::context::TraceContext;
use crate::headers::X_TRACE_ID;
use crate::inbound::TraceFilter;
use crate::propagation;
use crate::store;
use crate::trace_id::TraceId;
use http::{Request, Response};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::Instrument;

/// 入站追踪中间件层
#[derive(Clone, Debug)]
pub struct TraceContextLayer {
    filter: TraceFilter,
    enable_span: bool,
}

impl Default for TraceContextLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceContextLayer {
    /// 使用默认配置
    pub fn new() -> Self {
        Self::with_config(TraceConfig::default())
    }

    pub fn with_config(config: TraceConfig) -> Self {
        Self {
            filter: TraceFilter::new(config),
            enable_span: true,
        }
    }

    /// 不创建 `request` span 的高性能模式
    pub fn new_high_performance() -> Self {
        Self::new().without_span()
    }

    pub fn without_span(mut self) -> Self {
        self.enable_span = false;
        self
    }

    /// 使用自定义的生成器
    ///
    /// # 示例
    /// ```
    /// use trace_context::TraceContextLayer;
    ///
    /// let layer = TraceContextLayer::new().with_generator(|| "custom-id".to_string());
    /// ```
    pub fn with_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.filter = self.filter.with_generator(generator);
        self
    }
}

impl<S> Layer<S> for TraceContextLayer {
    type Service = TraceContextService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TraceContextService {
            inner,
            filter: self.filter.clone(),
            enable_span: self.enable_span,
        }
    }
}

/// 入站追踪服务
#[derive(Clone, Debug)]
pub struct TraceContextService<S> {
    inner: S,
    filter: TraceFilter,
    enable_span: bool,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for TraceContextService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Send + 'static,
    S::Future: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        if !self.filter.config().enabled {
            return Box::pin(self.inner.call(req));
        }

        // 在空白作用域中构造快照，不触碰当前线程的存储
        let (trace_id, snapshot) = bridge::scope(TraceContext::new(), || {
            let trace_id = self.filter.populate(req.headers());
            (trace_id, store::snapshot())
        });

        let span = if self.enable_span {
            tracing::info_span!(
                "request",
                trace_id = %trace_id.as_ref().map_or(store::UNKNOWN_TRACE_ID, TraceId::as_str),
                method = %req.method(),
                uri = %req.uri()
            )
        } else {
            tracing::Span::none()
        };

        if let Some(trace_id) = &trace_id {
            // 下游读取请求头的代码看到的是最终使用的ID
            req.headers_mut().put(X_TRACE_ID, trace_id.as_str());
            req.extensions_mut().insert(trace_id.clone());
        }
        req.extensions_mut().insert(snapshot.clone());

        // 内层服务的 call 也可能读取上下文
        let future = bridge::scope(snapshot.clone(), || self.inner.call(req));

        let response_header = self
            .filter
            .config()
            .include_in_response
            .then(|| self.filter.config().response_header_name.clone());

        Box::pin(
            async move {
                let mut response = future.await?;
                if let (Some(name), Some(trace_id)) = (response_header, trace_id) {
                    response.headers_mut().put(&name, trace_id.as_str());
                }
                Ok(response)
            }
            .with_trace_context(snapshot)
            .instrument(span),
        )
    }
}

/// 出站上下文传播中间件层
///
/// 用于 HTTP 客户端的 tower 栈，调用内层服务之前写入
/// `X-Trace-Id` 与身份头部。
#[derive(Clone, Copy, Debug, Default)]
pub struct PropagateContextLayer {
    trace_id_only: bool,
}

impl PropagateContextLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 只传播追踪ID
    pub fn trace_id_only() -> Self {
        Self {
            trace_id_only: true,
        }
    }
}

impl<S> Layer<S> for PropagateContextLayer {
    type Service = PropagateContextService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PropagateContextService {
            inner,
            trace_id_only: self.trace_id_only,
        }
    }
}

/// 出站上下文传播服务
#[derive(Clone, Debug)]
pub struct PropagateContextService<S> {
    inner: S,
    trace_id_only: bool,
}

impl<S, B> Service<Request<B>> for PropagateContextService<S>
where
    S: Service<Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        if self.trace_id_only {
            propagation::propagate_trace_id_only(req.headers_mut());
        } else {
            propagation::propagate(req.headers_mut());
        }
        self.inner.call(req)
    }
}
