//! 追踪上下文相关的HTTP头部名称与存储键
//!
//! 入站提取、出站传播和消息属性使用同一组规范名称。
//! 线上比较时头部名称不区分大小写。

/// 纯文本追踪ID头部
pub const X_TRACE_ID: &str = "X-Trace-Id";
/// 纯文本请求ID头部（作为追踪ID的备选来源）
pub const X_REQUEST_ID: &str = "X-Request-Id";
/// W3C Trace Context 复合头部
pub const TRACEPARENT: &str = "traceparent";
/// AWS X-Ray 复合头部
pub const X_AMZN_TRACE_ID: &str = "X-Amzn-Trace-Id";

/// 网关传递的用户ID
pub const X_USER_ID: &str = "X-User-Id";
/// 网关传递的租户ID
pub const X_TENANT_ID: &str = "X-Tenant-Id";
/// 网关传递的组织ID
pub const X_ORGANIZATION_ID: &str = "X-Organization-Id";
/// 网关传递的用户角色（逗号分隔）
pub const X_USER_ROLES: &str = "X-User-Roles";

/// 日志中附加上下文键的前缀
pub const CONTEXT_PREFIX: &str = "ctx.";

/// 默认的追踪ID提取顺序
pub const DEFAULT_HEADER_NAMES: [&str; 4] = [X_TRACE_ID, X_REQUEST_ID, TRACEPARENT, X_AMZN_TRACE_ID];

/// 身份头部及其对应的上下文键，入站提取与出站传播共用
pub(crate) const IDENTITY_HEADERS: [(&str, crate::ContextKey); 4] = [
    (X_USER_ID, crate::ContextKey::UserId),
    (X_TENANT_ID, crate::ContextKey::TenantId),
    (X_ORGANIZATION_ID, crate::ContextKey::OrganizationId),
    (X_USER_ROLES, crate::ContextKey::UserRoles),
];
