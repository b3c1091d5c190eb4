//! 追踪上下文值类型
//!
//! [`TraceContext`] 是一个逻辑工作单元的完整上下文快照：追踪ID、身份属性以及
//! 业务代码动态添加的附加键值。环境存储（[`crate::store`]）和异步桥接
//! （[`crate::bridge`]）都以它作为数据载体。

use crate::headers::CONTEXT_PREFIX;
use crate::trace_id::TraceId;
use std::collections::BTreeMap;
use std::fmt;

/// 上下文中的固定字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ContextKey {
    TraceId,
    SpanId,
    ServiceName,
    UserId,
    TenantId,
    OrganizationId,
    UserRoles,
    MessageSource,
    MessageId,
}

impl ContextKey {
    /// 全部固定字段，顺序即日志输出顺序
    pub const ALL: [ContextKey; 9] = [
        ContextKey::TraceId,
        ContextKey::SpanId,
        ContextKey::ServiceName,
        ContextKey::UserId,
        ContextKey::TenantId,
        ContextKey::OrganizationId,
        ContextKey::UserRoles,
        ContextKey::MessageSource,
        ContextKey::MessageId,
    ];

    /// 日志字段名
    pub const fn as_str(self) -> &'static str {
        match self {
            ContextKey::TraceId => "traceId",
            ContextKey::SpanId => "spanId",
            ContextKey::ServiceName => "service",
            ContextKey::UserId => "userId",
            ContextKey::TenantId => "tenantId",
            ContextKey::OrganizationId => "organizationId",
            ContextKey::UserRoles => "userRoles",
            ContextKey::MessageSource => "messageSource",
            ContextKey::MessageId => "messageId",
        }
    }

    /// 按日志字段名查找固定字段
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.as_str() == name)
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 追踪上下文
///
/// 所有字段都是可选的；空字符串视为缺失，永远不会被存储。
/// 交给外部协作者时传递的是克隆出来的快照，而不是活动句柄。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct TraceContext {
    trace_id: Option<TraceId>,
    span_id: Option<String>,
    service_name: Option<String>,
    user_id: Option<String>,
    tenant_id: Option<String>,
    organization_id: Option<String>,
    user_roles: Option<String>,
    message_source: Option<String>,
    message_id: Option<String>,
    extra: BTreeMap<String, String>,
}

impl TraceContext {
    /// 创建空上下文
    pub fn new() -> Self {
        Self::default()
    }

    /// 以给定追踪ID创建上下文
    pub fn with_trace_id(trace_id: TraceId) -> Self {
        Self {
            trace_id: Some(trace_id),
            ..Self::default()
        }
    }

    /// 链式设置字段，空值被忽略
    pub fn with(mut self, key: ContextKey, value: impl AsRef<str>) -> Self {
        self.set(key, value);
        self
    }

    /// 链式添加附加上下文
    pub fn with_extra(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.insert_extra(key, value);
        self
    }

    pub fn trace_id(&self) -> Option<&TraceId> {
        self.trace_id.as_ref()
    }

    pub fn span_id(&self) -> Option<&str> {
        self.span_id.as_deref()
    }

    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    pub fn organization_id(&self) -> Option<&str> {
        self.organization_id.as_deref()
    }

    pub fn user_roles(&self) -> Option<&str> {
        self.user_roles.as_deref()
    }

    pub fn message_source(&self) -> Option<&str> {
        self.message_source.as_deref()
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    /// 附加上下文（不含前缀）
    pub fn extra(&self) -> &BTreeMap<String, String> {
        &self.extra
    }

    /// 设置追踪ID
    pub fn set_trace_id(&mut self, trace_id: TraceId) {
        self.trace_id = Some(trace_id);
    }

    /// 读取固定字段
    pub fn get(&self, key: ContextKey) -> Option<&str> {
        match key {
            ContextKey::TraceId => self.trace_id.as_ref().map(TraceId::as_str),
            _ => self.slot(key).and_then(|slot| slot.as_deref()),
        }
    }

    /// 写入固定字段
    ///
    /// 空值（含纯空白）被静默忽略，不会覆盖已有值。
    pub fn set(&mut self, key: ContextKey, value: impl AsRef<str>) {
        let value = value.as_ref();
        if value.trim().is_empty() {
            return;
        }
        match key {
            ContextKey::TraceId => self.trace_id = TraceId::from_string(value),
            _ => {
                if let Some(slot) = self.slot_mut(key) {
                    *slot = Some(value.to_string());
                }
            }
        }
    }

    /// 写入或移除固定字段：`None` 表示移除
    pub fn replace(&mut self, key: ContextKey, value: Option<&str>) {
        match value {
            Some(value) if !value.trim().is_empty() => self.set(key, value),
            _ => self.remove(key),
        }
    }

    /// 移除固定字段
    pub fn remove(&mut self, key: ContextKey) {
        match key {
            ContextKey::TraceId => self.trace_id = None,
            _ => {
                if let Some(slot) = self.slot_mut(key) {
                    *slot = None;
                }
            }
        }
    }

    /// 读取附加上下文
    pub fn get_extra(&self, key: &str) -> Option<&str> {
        self.extra.get(key).map(String::as_str)
    }

    /// 添加附加上下文，空键或空值被忽略
    pub fn insert_extra(&mut self, key: impl AsRef<str>, value: impl AsRef<str>) {
        let (key, value) = (key.as_ref(), value.as_ref());
        if key.trim().is_empty() || value.trim().is_empty() {
            return;
        }
        self.extra.insert(key.to_string(), value.to_string());
    }

    /// 移除附加上下文
    pub fn remove_extra(&mut self, key: &str) -> Option<String> {
        self.extra.remove(key)
    }

    /// 整体替换附加上下文
    pub fn set_extra(&mut self, extra: BTreeMap<String, String>) {
        self.extra = extra
            .into_iter()
            .filter(|(k, v)| !k.trim().is_empty() && !v.trim().is_empty())
            .collect();
    }

    /// 是否没有任何字段
    pub fn is_empty(&self) -> bool {
        ContextKey::ALL.iter().all(|key| self.get(*key).is_none()) && self.extra.is_empty()
    }

    /// 按日志字段名列出所有存在的值，附加上下文带 `ctx.` 前缀
    pub fn fields(&self) -> Vec<(String, &str)> {
        let fixed = ContextKey::ALL
            .iter()
            .filter_map(|key| self.get(*key).map(|v| (key.as_str().to_string(), v)));
        let extra = self
            .extra
            .iter()
            .map(|(k, v)| (format!("{CONTEXT_PREFIX}{k}"), v.as_str()));
        fixed.chain(extra).collect()
    }

    fn slot(&self, key: ContextKey) -> Option<&Option<String>> {
        match key {
            ContextKey::TraceId => None,
            ContextKey::SpanId => Some(&self.span_id),
            ContextKey::ServiceName => Some(&self.service_name),
            ContextKey::UserId => Some(&self.user_id),
            ContextKey::TenantId => Some(&self.tenant_id),
            ContextKey::OrganizationId => Some(&self.organization_id),
            ContextKey::UserRoles => Some(&self.user_roles),
            ContextKey::MessageSource => Some(&self.message_source),
            ContextKey::MessageId => Some(&self.message_id),
        }
    }

    fn slot_mut(&mut self, key: ContextKey) -> Option<&mut Option<String>> {
        match key {
            ContextKey::TraceId => None,
            ContextKey::SpanId => Some(&mut self.span_id),
            ContextKey::ServiceName => Some(&mut self.service_name),
            ContextKey::UserId => Some(&mut self.user_id),
            ContextKey::TenantId => Some(&mut self.tenant_id),
            ContextKey::OrganizationId => Some(&mut self.organization_id),
            ContextKey::UserRoles => Some(&mut self.user_roles),
            ContextKey::MessageSource => Some(&mut self.message_source),
            ContextKey::MessageId => Some(&mut self.message_id),
        }
    }
}
