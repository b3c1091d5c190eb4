//! 出站传播
//!
//! 把当前上下文写入出站 HTTP 请求头或消息属性，下游服务的入站适配器再读取。
//! 值缺失或为空的头部直接省略；存储为空时不写入任何头部，从不失败。

use crate::codec::HeaderSink;
use crate::context::{ContextKey, TraceContext};
use crate::headers::{IDENTITY_HEADERS, X_TRACE_ID};
use crate::store;
use std::collections::HashMap;

/// 追踪ID在前，随后是身份头部
fn outbound_pairs(ctx: &TraceContext) -> impl Iterator<Item = (&'static str, &str)> + '_ {
    std::iter::once((X_TRACE_ID, ContextKey::TraceId))
        .chain(IDENTITY_HEADERS)
        .filter_map(|(header, key)| {
            ctx.get(key)
                .filter(|value| !value.is_empty())
                .map(|value| (header, value))
        })
}

/// 将当前线程的上下文写入出站头部
pub fn propagate<S>(sink: &mut S)
where
    S: HeaderSink + ?Sized,
{
    propagate_from(&store::snapshot(), sink);
}

/// 将给定快照写入出站头部
pub fn propagate_from<S>(ctx: &TraceContext, sink: &mut S)
where
    S: HeaderSink + ?Sized,
{
    let mut written = 0usize;
    for (header, value) in outbound_pairs(ctx) {
        sink.put(header, value);
        written += 1;
    }
    if written > 0 {
        tracing::trace!(
            trace_id = ctx.get(ContextKey::TraceId).unwrap_or(store::UNKNOWN_TRACE_ID),
            headers = written,
            "Propagated trace context"
        );
    }
}

/// 只传播追踪ID
pub fn propagate_trace_id_only<S>(sink: &mut S)
where
    S: HeaderSink + ?Sized,
{
    if let Some(trace_id) = store::trace_id() {
        sink.put(X_TRACE_ID, trace_id.as_str());
    }
}

/// 当前上下文对应的出站头部列表
pub fn headers() -> Vec<(&'static str, String)> {
    let ctx = store::snapshot();
    outbound_pairs(&ctx)
        .map(|(header, value)| (header, value.to_string()))
        .collect()
}

/// 发布消息时附带的属性
pub fn message_attributes() -> HashMap<String, String> {
    let mut attributes = HashMap::new();
    propagate(&mut attributes);
    attributes
}
