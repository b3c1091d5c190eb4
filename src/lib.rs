//! 追踪上下文传播
//!
//! 为每个工作单元（HTTP 请求、消息、异步任务）生成或提取追踪ID，
//! 连同用户、租户、组织、角色等身份信息放入环境上下文，
//! 在工作期间对日志可见，并在出站 HTTP 调用、消息发布和跨线程的异步执行中继续传递。
//!
//! 核心功能与Web框架无关；`tower` / `axum` feature 提供开箱即用的中间件与提取器。
//!
//! ## Usage
//!
//! ### 基础用法：生成和使用 TraceId
//! ```
//! use trace_context::TraceId;
//!
//! // 生成新的 trace ID
//! let trace_id = TraceId::new();
//! println!("Generated trace ID: {}", trace_id);
//!
//! // 从字符串创建（带验证）
//! let valid_id = "0af7651916cd43dd8448eb211c80319c";
//! if let Some(trace_id) = TraceId::from_string_validated(valid_id) {
//!     println!("Valid trace ID: {}", trace_id);
//! }
//! ```
//!
//! ### 同步入站与出站传播
//! ```
//! use http::HeaderMap;
//! use trace_context::{propagation, store, TraceFilter};
//!
//! let mut request = HeaderMap::new();
//! request.insert("x-trace-id", "abc123".parse().unwrap());
//! request.insert("x-user-id", "user-1".parse().unwrap());
//! let mut response = HeaderMap::new();
//!
//! let outbound = TraceFilter::default().filter(&request, &mut response, || {
//!     assert_eq!(store::trace_id_or_unknown(), "abc123");
//!     let mut outbound = HeaderMap::new();
//!     propagation::propagate(&mut outbound);
//!     outbound
//! });
//!
//! assert_eq!(outbound.get("x-user-id").unwrap(), "user-1");
//! assert_eq!(response.get("x-trace-id").unwrap(), "abc123");
//! assert!(store::is_empty());
//! ```
//!
//! ### 异步执行
//! ```
//! use trace_context::{bridge::TraceContextExt, store, TraceContext, TraceId};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let ctx = TraceContext::with_trace_id(TraceId::from_string("abc123").unwrap());
//! let seen = async {
//!     tokio::task::yield_now().await;
//!     store::trace_id_or_unknown()
//! }
//! .with_trace_context(ctx)
//! .await;
//! assert_eq!(seen, "abc123");
//! # }
//! ```
//!
//! ### Axum 集成（需要启用 axum feature）
//! ```ignore
//! use axum::{routing::get, Router};
//! use trace_context::{TraceContextLayer, TraceId};
//!
//! async fn handler(trace_id: TraceId) -> String {
//!     // 直接在函数签名中获取 TraceId
//!     format!("Hello! Your trace ID is: {}", trace_id)
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = Router::new()
//!         .route("/", get(handler))
//!         .layer(TraceContextLayer::new());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

pub mod bridge;
pub mod codec;
mod config;
mod context;
mod error;
pub mod headers;
mod inbound;
pub mod masking;
pub mod message;
pub mod propagation;
pub mod store;
mod trace_id;

pub use bridge::{ContextRegistry, TraceContextExt, Traced};
pub use codec::{HeaderSink, HeaderSource};
pub use config::{MessageConfig, TraceConfig, DEFAULT_MAX_PAYLOAD_LENGTH};
pub use context::{ContextKey, TraceContext};
pub use error::ConfigError;
pub use inbound::{ScopeGuard, TraceFilter};
pub use masking::Masker;
pub use message::{MessageContext, MessageEnvelope, MessageInterceptor, TracedListener};
pub use trace_id::TraceId;

// -- tower / axum feature --
#[cfg(feature = "tower")]
pub mod integrations;
#[cfg(feature = "tower")]
pub use integrations::tower::{PropagateContextLayer, TraceContextLayer};
