//! 环境上下文存储
//!
//! 每个载体线程持有一个 [`TraceContext`] 槽位（`thread_local`）。
//! 所有操作只影响调用线程自己的槽位，不存在共享映射，也不需要加锁；
//! 并发安全来自线程隔离。
//!
//! 同步路径中由入站适配器在工作开始前填充、结束后清空；
//! 异步路径中由 [`crate::bridge`] 在每次调度切换时恢复。
//!
//! 所有操作都不会失败，非法输入被静默忽略。

use crate::context::{ContextKey, TraceContext};
use crate::trace_id::TraceId;
use std::cell::RefCell;
use std::collections::BTreeMap;

thread_local! {
    static CURRENT: RefCell<TraceContext> = RefCell::new(TraceContext::default());
}

/// 追踪ID缺失时的占位值
pub const UNKNOWN_TRACE_ID: &str = "unknown";

/// 对当前线程的上下文只读访问
///
/// 线程销毁阶段访问会得到 `None`。
fn read<R>(f: impl FnOnce(&TraceContext) -> R) -> Option<R> {
    CURRENT
        .try_with(|cell| cell.try_borrow().ok().map(|ctx| f(&ctx)))
        .ok()
        .flatten()
}

/// 对当前线程的上下文可写访问
fn write(f: impl FnOnce(&mut TraceContext)) {
    let _ = CURRENT.try_with(|cell| {
        if let Ok(mut ctx) = cell.try_borrow_mut() {
            f(&mut ctx);
        }
    });
}

// ==================== 通用访问 ====================

/// 写入固定字段，空值不做任何事
pub fn set(key: ContextKey, value: impl AsRef<str>) {
    write(|ctx| ctx.set(key, value));
}

/// 读取固定字段
pub fn get(key: ContextKey) -> Option<String> {
    read(|ctx| ctx.get(key).map(str::to_string)).flatten()
}

/// 读取固定字段，缺失时返回默认值
pub fn get_or_default(key: ContextKey, default: &str) -> String {
    get(key).unwrap_or_else(|| default.to_string())
}

/// 移除固定字段
pub fn remove(key: ContextKey) {
    write(|ctx| ctx.remove(key));
}

// ==================== 追踪ID ====================

/// 设置追踪ID
pub fn set_trace_id(trace_id: TraceId) {
    write(|ctx| ctx.set_trace_id(trace_id));
}

/// 当前追踪ID
pub fn trace_id() -> Option<TraceId> {
    read(|ctx| ctx.trace_id().cloned()).flatten()
}

/// 当前追踪ID，缺失时返回 `"unknown"`
pub fn trace_id_or_unknown() -> String {
    get_or_default(ContextKey::TraceId, UNKNOWN_TRACE_ID)
}

/// 当前是否设置了追踪ID
pub fn is_present() -> bool {
    read(|ctx| ctx.trace_id().is_some()).unwrap_or(false)
}

pub fn set_span_id(span_id: &str) {
    set(ContextKey::SpanId, span_id);
}

pub fn set_service_name(service_name: &str) {
    set(ContextKey::ServiceName, service_name);
}

// ==================== 用户上下文 ====================

pub fn set_user_id(user_id: &str) {
    set(ContextKey::UserId, user_id);
}

pub fn user_id() -> Option<String> {
    get(ContextKey::UserId)
}

pub fn set_tenant_id(tenant_id: &str) {
    set(ContextKey::TenantId, tenant_id);
}

pub fn tenant_id() -> Option<String> {
    get(ContextKey::TenantId)
}

pub fn set_organization_id(organization_id: &str) {
    set(ContextKey::OrganizationId, organization_id);
}

pub fn organization_id() -> Option<String> {
    get(ContextKey::OrganizationId)
}

pub fn set_user_roles(roles: &str) {
    set(ContextKey::UserRoles, roles);
}

pub fn user_roles() -> Option<String> {
    get(ContextKey::UserRoles)
}

// ==================== 消息上下文 ====================

pub fn set_message_source(source: &str) {
    set(ContextKey::MessageSource, source);
}

pub fn set_message_id(message_id: &str) {
    set(ContextKey::MessageId, message_id);
}

// ==================== 附加上下文 ====================

/// 添加附加上下文，日志中以 `ctx.<key>` 输出
pub fn add_context(key: &str, value: &str) {
    write(|ctx| ctx.insert_extra(key, value));
}

/// 读取附加上下文
pub fn get_context(key: &str) -> Option<String> {
    read(|ctx| ctx.get_extra(key).map(str::to_string)).flatten()
}

/// 全部附加上下文的副本
pub fn all_context() -> BTreeMap<String, String> {
    read(|ctx| ctx.extra().clone()).unwrap_or_default()
}

/// 整体替换附加上下文
pub(crate) fn replace_context(extra: BTreeMap<String, String>) {
    write(|ctx| ctx.set_extra(extra));
}

/// 移除单个附加上下文
pub(crate) fn remove_context(key: &str) {
    write(|ctx| {
        ctx.remove_extra(key);
    });
}

// ==================== 生命周期 ====================

/// 当前上下文的快照
pub fn snapshot() -> TraceContext {
    read(TraceContext::clone).unwrap_or_default()
}

/// 用给定上下文整体替换当前线程的上下文，返回原来的上下文
pub fn install(context: TraceContext) -> TraceContext {
    let mut previous = TraceContext::default();
    write(|ctx| previous = std::mem::replace(ctx, context));
    previous
}

/// 清除本模块设置过的所有键，包括动态添加的附加上下文
///
/// 重复调用是安全的空操作。
pub fn clear_all() {
    write(|ctx| *ctx = TraceContext::default());
}

/// 当前上下文是否为空
pub fn is_empty() -> bool {
    read(TraceContext::is_empty).unwrap_or(true)
}

/// 以当前上下文创建 tracing span
///
/// span 记录追踪ID与身份字段，span 内的所有日志事件都会带上这些字段。
pub fn span() -> tracing::Span {
    let ctx = snapshot();
    tracing::info_span!(
        "trace_context",
        trace_id = ctx.get(ContextKey::TraceId).unwrap_or(UNKNOWN_TRACE_ID),
        user_id = ctx.user_id(),
        tenant_id = ctx.tenant_id(),
        organization_id = ctx.organization_id(),
        service = ctx.service_name(),
    )
}
