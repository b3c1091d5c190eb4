//! Axum 提取器
//!
//! 与 [`TraceContextLayer`](crate::TraceContextLayer) 配合使用，
//! 在 handler 函数签名中直接获取追踪ID或完整的上下文快照。

use crate::context::TraceContext;
use crate::store;
use crate::trace_id::TraceId;
use axum::{extract::FromRequestParts, http::request::Parts};
use std::convert::Infallible;

/// Axum 提取器，用于在 handler 函数签名中直接获取 TraceId
///
/// # 示例
/// ```no_run
/// use axum::{routing::get, Router};
/// use trace_context::{TraceContextLayer, TraceId};
///
/// async fn my_handler(trace_id: TraceId) -> String {
///     tracing::info!(trace_id = %trace_id, "Handler started");
///     format!("Hello! Your trace ID is: {}", trace_id)
/// }
///
/// let app: Router = Router::new()
///     .route("/", get(my_handler))
///     .layer(TraceContextLayer::new());
/// ```
impl<S> FromRequestParts<S> for TraceId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    /// 依次读取请求扩展、当前上下文；都没有时生成新ID并记录警告
    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let trace_id = parts
            .extensions
            .get::<TraceId>()
            .cloned()
            .or_else(store::trace_id)
            .unwrap_or_else(|| {
                let trace_id = TraceId::new();
                tracing::warn!(
                    trace_id = %trace_id,
                    "TraceId requested outside of a traced request, generated a new one"
                );
                trace_id
            });
        Ok(trace_id)
    }
}

/// 提取完整的上下文快照
impl<S> FromRequestParts<S> for TraceContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<TraceContext>()
            .cloned()
            .unwrap_or_else(store::snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::TraceContextExt;
    use crate::context::ContextKey;
    use crate::headers::{X_TENANT_ID, X_TRACE_ID};
    use crate::TraceContextLayer;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    // --- 提取器测试 ---
    #[tokio::test]
    async fn test_trace_id_extractor_reads_current_context() {
        let (mut parts, _body) = Request::builder().uri("/test").body(()).unwrap().into_parts();
        let expected = TraceId::new();

        let extracted = async {
            TraceId::from_request_parts(&mut parts, &())
                .await
                .expect("TraceId extraction should never fail")
        }
        .with_trace_context(TraceContext::with_trace_id(expected.clone()))
        .await;

        assert_eq!(extracted, expected);
    }

    #[tokio::test]
    async fn test_trace_id_extractor_falls_back_to_generated() {
        let (mut parts, _body) = Request::builder().body(()).unwrap().into_parts();
        let extracted = TraceId::from_request_parts(&mut parts, &()).await.unwrap();
        assert!(extracted.is_w3c_compliant());
    }

    #[tokio::test]
    async fn test_context_extractor_prefers_extension() {
        let (mut parts, _body) = Request::builder().body(()).unwrap().into_parts();
        let ctx = TraceContext::new().with(ContextKey::TenantId, "ten-1");
        parts.extensions.insert(ctx.clone());

        let extracted = TraceContext::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(extracted, ctx);
    }

    // --- 与中间件配合 ---
    mod with_layer {
        use super::*;

        async fn handler(trace_id: TraceId, ctx: TraceContext) -> String {
            format!("{}|{}", trace_id, ctx.tenant_id().unwrap_or_default())
        }

        #[tokio::test]
        async fn test_end_to_end_flow() {
            let app = Router::new()
                .route("/", get(handler))
                .layer(TraceContextLayer::new());

            // 场景1: 提供有效ID
            let valid_id = "0af7651916cd43dd8448eb211c80319c";
            let request = Request::builder()
                .uri("/")
                .header(X_TRACE_ID, valid_id)
                .header(X_TENANT_ID, "ten-1")
                .body(Body::empty())
                .unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers().get(X_TRACE_ID).unwrap(), valid_id);
            let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
            assert_eq!(&body[..], format!("{valid_id}|ten-1").as_bytes());

            // 场景2: 不提供ID
            let request = Request::builder().uri("/").body(Body::empty()).unwrap();
            let response = app.oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let header_id = response.headers().get(X_TRACE_ID).unwrap().to_str().unwrap().to_owned();
            assert_eq!(header_id.len(), 32);
            let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
            assert_eq!(body, format!("{header_id}|").as_bytes());
        }

        #[tokio::test]
        async fn test_high_performance_mode() {
            let app = Router::new()
                .route("/", get(handler))
                .layer(TraceContextLayer::new_high_performance());
            let valid_id = "1234567890abcdef1234567890abcdef";
            let request = Request::builder()
                .uri("/")
                .header(X_TRACE_ID, valid_id)
                .body(Body::empty())
                .unwrap();
            let response = app.oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers().get(X_TRACE_ID).unwrap(), valid_id);
        }
    }
}
