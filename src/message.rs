//! 消息边界适配器
//!
//! 消息消费者没有 HTTP 请求头，追踪ID和身份信息来自消息属性。
//! 传输层的差异在边界处收敛为 [`MessageEnvelope`]，每种传输各自实现
//! 到 [`MessageContext`] 的转换，拦截器只处理统一的上下文：
//!
//! 1. `before_processing`：建立环境上下文并记录 `Message Received`
//! 2. 执行监听器
//! 3. `after_processing`：记录 `Message Processed` 或 `Message Failed`，清空上下文
//!
//! 日志开关只影响日志，不影响上下文传播。

use crate::bridge::TraceContextExt;
use crate::codec::{self, HeaderSource};
use crate::config::MessageConfig;
use crate::context::TraceContext;
use crate::headers::{IDENTITY_HEADERS, X_TRACE_ID};
use crate::inbound::{generate_with, Generator, ScopeGuard};
use crate::masking::{self, Masker};
use crate::store;
use crate::trace_id::TraceId;
use futures_util::FutureExt;
use serde_json::Value;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// 消息生命周期日志的 target
pub const LOG_TARGET: &str = "trace_context::message";

/// 未知的队列/来源名称
pub const UNKNOWN: &str = "unknown";

pub const SOURCE_SQS: &str = "SQS";
pub const SOURCE_REDIS_PUBSUB: &str = "REDIS_PUBSUB";
pub const SOURCE_REDIS_STREAM: &str = "REDIS_STREAM";

/// Redis Stream 记录中追踪ID的备用字段名
const STREAM_TRACE_FIELD: &str = "traceId";

// ==================== MessageContext ====================

/// 单条消息的处理上下文，构建后只读
#[derive(Debug, Clone)]
pub struct MessageContext {
    source: String,
    queue_name: String,
    message_id: Option<String>,
    trace_id: Option<TraceId>,
    start_time: Instant,
    started_at: SystemTime,
    attributes: HashMap<String, String>,
}

impl MessageContext {
    pub fn builder() -> MessageContextBuilder {
        MessageContextBuilder::default()
    }

    /// 传输来源标签，例如 `SQS`
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    pub fn trace_id(&self) -> Option<&TraceId> {
        self.trace_id.as_ref()
    }

    /// 开始处理的墙钟时间
    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    /// 属性查找，名称不区分大小写
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.header(name)
    }

    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    /// 自构建以来经过的时间
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn elapsed_millis(&self) -> u64 {
        u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// [`MessageContext`] 构建器
#[derive(Debug, Default)]
pub struct MessageContextBuilder {
    source: Option<String>,
    queue_name: Option<String>,
    message_id: Option<String>,
    trace_id: Option<TraceId>,
    start_time: Option<Instant>,
    attributes: HashMap<String, String>,
}

impl MessageContextBuilder {
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn queue_name(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = Some(queue_name.into());
        self
    }

    pub fn message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into()).filter(|id: &String| !id.is_empty());
        self
    }

    /// 原始追踪ID，空值视为缺失
    pub fn trace_id(mut self, trace_id: impl AsRef<str>) -> Self {
        self.trace_id = codec::parse_plain(trace_id.as_ref());
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn attributes<I, K, V>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.attributes
            .extend(attributes.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// 覆盖开始时间（默认为 `build` 的时刻）
    pub fn start_time(mut self, start_time: Instant) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn build(self) -> MessageContext {
        let non_empty = |value: Option<String>| {
            value
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN.to_string())
        };
        MessageContext {
            source: non_empty(self.source),
            queue_name: non_empty(self.queue_name),
            message_id: self.message_id,
            trace_id: self.trace_id,
            start_time: self.start_time.unwrap_or_else(Instant::now),
            started_at: SystemTime::now(),
            attributes: self.attributes,
        }
    }
}

// ==================== 传输信封 ====================

/// SQS 消息
#[derive(Debug, Clone, Default)]
pub struct SqsMessage {
    pub queue_name: String,
    pub message_id: Option<String>,
    /// 消息属性
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// Redis Pub/Sub 消息，没有属性，追踪ID只能从 JSON 负载中读取
#[derive(Debug, Clone, Default)]
pub struct RedisMessage {
    pub channel: String,
    pub body: Vec<u8>,
}

/// Redis Stream 记录
#[derive(Debug, Clone, Default)]
pub struct StreamRecord {
    pub stream: String,
    pub id: String,
    pub fields: HashMap<String, String>,
}

/// 在消费边界确定的传输类型
#[derive(Debug, Clone)]
pub enum MessageEnvelope {
    Sqs(SqsMessage),
    RedisPubSub(RedisMessage),
    RedisStream(StreamRecord),
}

impl From<SqsMessage> for MessageEnvelope {
    fn from(message: SqsMessage) -> Self {
        MessageEnvelope::Sqs(message)
    }
}

impl From<RedisMessage> for MessageEnvelope {
    fn from(message: RedisMessage) -> Self {
        MessageEnvelope::RedisPubSub(message)
    }
}

impl From<StreamRecord> for MessageEnvelope {
    fn from(record: StreamRecord) -> Self {
        MessageEnvelope::RedisStream(record)
    }
}

/// 复制身份属性
fn identity_attributes<H>(source: &H) -> impl Iterator<Item = (&'static str, String)> + '_
where
    H: HeaderSource + ?Sized,
{
    IDENTITY_HEADERS
        .into_iter()
        .filter_map(|(name, _)| source.header(name).map(|value| (name, value.to_string())))
}

/// 读取 JSON 负载顶层的字符串字段；不是合法 JSON 时视为缺失
fn json_string_field(body: &[u8], field: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value.get(field).and_then(Value::as_str).map(str::to_string)
}

impl MessageEnvelope {
    pub fn source(&self) -> &'static str {
        match self {
            MessageEnvelope::Sqs(_) => SOURCE_SQS,
            MessageEnvelope::RedisPubSub(_) => SOURCE_REDIS_PUBSUB,
            MessageEnvelope::RedisStream(_) => SOURCE_REDIS_STREAM,
        }
    }

    /// 用于日志的负载文本
    pub fn payload(&self) -> Cow<'_, str> {
        match self {
            MessageEnvelope::Sqs(message) => Cow::Borrowed(&message.body),
            MessageEnvelope::RedisPubSub(message) => String::from_utf8_lossy(&message.body),
            MessageEnvelope::RedisStream(record) => {
                let mut fields: Vec<_> = record.fields.iter().collect();
                fields.sort();
                Cow::Owned(format!("{fields:?}"))
            }
        }
    }

    /// 转换为统一的消息上下文
    pub fn to_context(&self) -> MessageContext {
        let builder = MessageContext::builder().source(self.source());
        match self {
            MessageEnvelope::Sqs(message) => {
                let mut builder = builder
                    .queue_name(&message.queue_name)
                    .attributes(identity_attributes(&message.headers));
                if let Some(trace_id) = message.headers.header(X_TRACE_ID) {
                    builder = builder.trace_id(trace_id);
                }
                if let Some(message_id) = &message.message_id {
                    builder = builder.message_id(message_id);
                }
                builder.build()
            }
            MessageEnvelope::RedisPubSub(message) => {
                let mut builder = builder.queue_name(&message.channel);
                if let Some(trace_id) = json_string_field(&message.body, X_TRACE_ID) {
                    builder = builder.trace_id(trace_id);
                }
                builder.build()
            }
            MessageEnvelope::RedisStream(record) => {
                let mut builder = builder
                    .queue_name(&record.stream)
                    .message_id(&record.id)
                    .attributes(identity_attributes(&record.fields));
                let trace_id = record
                    .fields
                    .get(X_TRACE_ID)
                    .or_else(|| record.fields.get(STREAM_TRACE_FIELD));
                if let Some(trace_id) = trace_id {
                    builder = builder.trace_id(trace_id);
                }
                builder.build()
            }
        }
    }
}

// ==================== 拦截器 ====================

/// 交给结果消费者的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageOutcome {
    pub success: bool,
    pub elapsed: Duration,
}

/// 消息拦截器
#[derive(Clone)]
pub struct MessageInterceptor {
    config: Arc<MessageConfig>,
    generator: Option<Generator>,
    masker: Arc<dyn Masker>,
}

impl fmt::Debug for MessageInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageInterceptor")
            .field("config", &self.config)
            .field("custom_generator", &self.generator.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for MessageInterceptor {
    fn default() -> Self {
        Self::new(MessageConfig::default())
    }
}

impl MessageInterceptor {
    pub fn new(config: MessageConfig) -> Self {
        Self {
            config: Arc::new(config),
            generator: None,
            masker: masking::noop(),
        }
    }

    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).service_name = Some(service_name.into());
        self
    }

    pub fn with_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.generator = Some(Arc::new(generator));
        self
    }

    /// 负载日志使用的脱敏器
    pub fn with_masker<M>(mut self, masker: M) -> Self
    where
        M: Masker + 'static,
    {
        self.masker = Arc::new(masker);
        self
    }

    pub fn config(&self) -> &MessageConfig {
        &self.config
    }

    /// 在注册时包装监听器
    pub fn wrap<F>(&self, listener: F) -> TracedListener<F> {
        TracedListener::new(self.clone(), listener)
    }

    fn resolve_trace_id(&self, ctx: &MessageContext) -> TraceId {
        ctx.trace_id()
            .cloned()
            .or_else(|| ctx.attribute(X_TRACE_ID).and_then(codec::parse_plain))
            .unwrap_or_else(|| {
                let trace_id = generate_with(self.generator.as_ref());
                tracing::debug!(
                    target: LOG_TARGET,
                    trace_id = %trace_id,
                    source = ctx.source(),
                    "Generated new TraceId for message"
                );
                trace_id
            })
    }

    /// 负载日志文本：脱敏后截断；未开启时为 `None`
    fn loggable_payload(&self, payload: Option<&dyn fmt::Display>) -> Option<String> {
        if !self.config.log_payload {
            return None;
        }
        payload.map(|payload| {
            masking::mask_and_truncate(
                self.masker.as_ref(),
                &payload.to_string(),
                self.config.max_payload_length,
            )
        })
    }

    /// 消息处理开始：建立环境上下文并记录接收日志
    pub fn before_processing(&self, ctx: &MessageContext, payload: Option<&dyn fmt::Display>) {
        let trace_id = self.resolve_trace_id(ctx);
        store::set_trace_id(trace_id.clone());
        store::set_message_source(ctx.source());
        if let Some(message_id) = ctx.message_id() {
            store::set_message_id(message_id);
        }
        if let Some(service_name) = &self.config.service_name {
            store::set_service_name(service_name);
        }
        for (name, key) in IDENTITY_HEADERS {
            if let Some(value) = ctx.attribute(name) {
                store::set(key, value);
            }
        }

        if self.config.enabled {
            let payload = self.loggable_payload(payload);
            tracing::info!(
                target: LOG_TARGET,
                trace_id = %trace_id,
                source = ctx.source(),
                queue = ctx.queue_name(),
                message_id = ctx.message_id(),
                payload = payload.as_deref(),
                "Message Received"
            );
        }
    }

    /// 消息处理结束：记录结果并清空环境上下文
    ///
    /// 没有先调用 `before_processing` 时同样安全。
    pub fn after_processing(
        &self,
        ctx: &MessageContext,
        success: bool,
        error: Option<&dyn fmt::Display>,
    ) -> MessageOutcome {
        let _guard = ScopeGuard::new();
        let outcome = MessageOutcome {
            success,
            elapsed: ctx.elapsed(),
        };

        if self.config.enabled {
            let trace_id = store::trace_id_or_unknown();
            let duration_ms = u64::try_from(outcome.elapsed.as_millis()).unwrap_or(u64::MAX);
            if success {
                tracing::info!(
                    target: LOG_TARGET,
                    trace_id = %trace_id,
                    source = ctx.source(),
                    queue = ctx.queue_name(),
                    message_id = ctx.message_id(),
                    duration_ms,
                    "Message Processed"
                );
            } else {
                tracing::error!(
                    target: LOG_TARGET,
                    trace_id = %trace_id,
                    source = ctx.source(),
                    queue = ctx.queue_name(),
                    message_id = ctx.message_id(),
                    duration_ms,
                    error = error.map(tracing::field::display),
                    "Message Failed"
                );
            }
        }
        outcome
    }

    /// 同步拦截：在处理前后调用 `before_processing` / `after_processing`
    ///
    /// 监听器的错误原样返回；panic 时同样记录失败并清空上下文。
    pub fn intercept<F, T, E>(
        &self,
        ctx: &MessageContext,
        payload: Option<&dyn fmt::Display>,
        work: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: fmt::Display,
    {
        self.before_processing(ctx, payload);
        let pending = PanicGuard {
            interceptor: self,
            ctx,
        };
        let result = work();
        std::mem::forget(pending);
        self.after_processing(
            ctx,
            result.is_ok(),
            result.as_ref().err().map(|e| e as &dyn fmt::Display),
        );
        result
    }

    /// 异步拦截
    ///
    /// 消息上下文附着在 future 上（见 [`crate::bridge`]），
    /// 处理过程在多个线程之间跳转时上下文保持不变，载体线程不会被污染。
    /// 监听器 panic 时记录失败后继续传播 panic。
    pub async fn intercept_async<Fut, T, E>(
        &self,
        ctx: &MessageContext,
        payload: Option<&str>,
        work: Fut,
    ) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        async {
            self.before_processing(ctx, payload.as_ref().map(|p| p as &dyn fmt::Display));
            let result = match AssertUnwindSafe(work).catch_unwind().await {
                Ok(result) => result,
                Err(cause) => {
                    self.after_processing(ctx, false, Some(&"listener panicked"));
                    panic::resume_unwind(cause);
                }
            };
            self.after_processing(
                ctx,
                result.is_ok(),
                result.as_ref().err().map(|e| e as &dyn fmt::Display),
            );
            result
        }
        .with_trace_context(TraceContext::new())
        .await
    }
}

/// 同步处理中 panic 时补记失败
struct PanicGuard<'a> {
    interceptor: &'a MessageInterceptor,
    ctx: &'a MessageContext,
}

impl Drop for PanicGuard<'_> {
    fn drop(&mut self) {
        self.interceptor
            .after_processing(self.ctx, false, Some(&"listener panicked"));
    }
}

/// 注册时包装好的监听器
#[derive(Debug, Clone)]
pub struct TracedListener<F> {
    interceptor: MessageInterceptor,
    listener: F,
}

impl<F> TracedListener<F> {
    pub fn new(interceptor: MessageInterceptor, listener: F) -> Self {
        Self {
            interceptor,
            listener,
        }
    }

    /// 处理一条消息
    pub fn handle<T, E>(&self, envelope: &MessageEnvelope) -> Result<T, E>
    where
        F: Fn(&MessageEnvelope) -> Result<T, E>,
        E: fmt::Display,
    {
        let ctx = envelope.to_context();
        let payload = envelope.payload();
        self.interceptor
            .intercept(&ctx, Some(&payload), || (self.listener)(envelope))
    }
}
