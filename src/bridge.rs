//! 异步上下文桥接
//!
//! 同步路径里一个线程从头到尾只服务一个工作单元，环境存储天然正确。
//! 异步路径里一个逻辑工作单元被拆成多个阶段，每个阶段可能在不同的载体线程上执行，
//! 同一个载体线程也会交替执行不同工作单元的阶段。
//!
//! 桥接的做法：逻辑工作单元携带自己的上下文快照（[`TraceContext`]），
//! 在每个调度切换点（poll、订阅、onNext、onError、onComplete、线程交接）：
//!
//! 1. 捕获载体线程当前的值作为 `previous`
//! 2. 把快照恢复到载体线程的环境存储（快照中缺失的字段被重置为缺失，
//!    不会保留其他工作单元留下的旧值）
//! 3. 执行阶段代码
//! 4. 再次捕获，阶段中写入的值随快照进入下一跳
//! 5. 把 `previous` 恢复回去（缺失即重置）
//!
//! 所有操作都是同步的内存拷贝，复杂度为 O(访问器数量)，自身不会挂起。
//!
//! ```
//! use trace_context::{bridge::TraceContextExt, store, TraceContext, TraceId};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let ctx = TraceContext::with_trace_id(TraceId::from_string("abc123").unwrap());
//!
//! let seen = async { store::trace_id_or_unknown() }
//!     .with_trace_context(ctx)
//!     .await;
//!
//! assert_eq!(seen, "abc123");
//! assert!(store::is_empty());
//! # }
//! ```

use crate::context::{ContextKey, TraceContext};
use crate::store;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{self, Poll};

/// 快照中的一个位置
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Slot {
    /// 固定字段
    Field(ContextKey),
    /// 附加上下文中的一个键
    Extra(String),
}

impl Slot {
    fn read<'a>(&self, ctx: &'a TraceContext) -> Option<&'a str> {
        match self {
            Slot::Field(key) => ctx.get(*key),
            Slot::Extra(name) => ctx.get_extra(name),
        }
    }

    fn write(&self, ctx: &mut TraceContext, value: Option<&str>) {
        match (self, value) {
            (Slot::Field(key), value) => ctx.replace(*key, value),
            (Slot::Extra(name), Some(value)) => ctx.insert_extra(name, value),
            (Slot::Extra(name), None) => {
                ctx.remove_extra(name);
            }
        }
    }
}

/// 单个字段在环境存储与快照之间的访问协议
///
/// - `capture`：离开线程时从环境存储读出当前值
/// - `restore`：进入线程时写入值；值缺失时必须调用 `reset`
/// - `reset`：把环境存储中的值清为缺失，避免泄漏到下一跳
///
/// 实现者可以把其他线程局部状态接入桥接，只要给它一个快照位置。
pub trait ContextAccessor: Send + Sync {
    /// 值在快照中的位置
    fn slot(&self) -> Slot;

    fn capture(&self) -> Option<String>;

    fn restore(&self, value: Option<&str>);

    fn reset(&self);
}

/// 固定字段访问器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldAccessor(pub ContextKey);

impl ContextAccessor for FieldAccessor {
    fn slot(&self) -> Slot {
        Slot::Field(self.0)
    }

    fn capture(&self) -> Option<String> {
        store::get(self.0)
    }

    fn restore(&self, value: Option<&str>) {
        match value.filter(|v| !v.trim().is_empty()) {
            Some(value) => store::set(self.0, value),
            None => self.reset(),
        }
    }

    fn reset(&self) {
        store::remove(self.0);
    }
}

/// 单个附加上下文键的访问器
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraAccessor(pub String);

impl ExtraAccessor {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl ContextAccessor for ExtraAccessor {
    fn slot(&self) -> Slot {
        Slot::Extra(self.0.clone())
    }

    fn capture(&self) -> Option<String> {
        store::get_context(&self.0)
    }

    fn restore(&self, value: Option<&str>) {
        match value.filter(|v| !v.trim().is_empty()) {
            Some(value) => store::add_context(&self.0, value),
            None => self.reset(),
        }
    }

    fn reset(&self) {
        store::remove_context(&self.0);
    }
}

static GLOBAL: OnceLock<Arc<ContextRegistry>> = OnceLock::new();

/// 访问器注册表
///
/// 默认注册所有固定字段，并整体传播附加上下文。
pub struct ContextRegistry {
    accessors: Vec<Arc<dyn ContextAccessor>>,
    propagate_extra: bool,
}

impl fmt::Debug for ContextRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextRegistry")
            .field(
                "slots",
                &self.accessors.iter().map(|a| a.slot()).collect::<Vec<_>>(),
            )
            .field("propagate_extra", &self.propagate_extra)
            .finish()
    }
}

impl Default for ContextRegistry {
    fn default() -> Self {
        ContextKey::ALL
            .into_iter()
            .fold(Self::empty().propagate_extra(true), |registry, key| {
                registry.register(FieldAccessor(key))
            })
    }
}

impl ContextRegistry {
    /// 不含任何访问器的注册表
    pub fn empty() -> Self {
        Self {
            accessors: Vec::new(),
            propagate_extra: false,
        }
    }

    /// 注册访问器，按注册顺序恢复
    pub fn register<A>(mut self, accessor: A) -> Self
    where
        A: ContextAccessor + 'static,
    {
        self.accessors.push(Arc::new(accessor));
        self
    }

    /// 是否整体传播附加上下文
    pub fn propagate_extra(mut self, enabled: bool) -> Self {
        self.propagate_extra = enabled;
        self
    }

    pub fn len(&self) -> usize {
        self.accessors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accessors.is_empty()
    }

    /// 进程级注册表；未安装时使用默认注册表
    pub fn global() -> Arc<ContextRegistry> {
        GLOBAL
            .get_or_init(|| Arc::new(ContextRegistry::default()))
            .clone()
    }

    /// 安装进程级注册表
    ///
    /// 只能安装一次，且必须在第一次使用 [`ContextRegistry::global`] 之前。
    /// 已安装时返回 `false`。
    pub fn install_global(self) -> bool {
        let accessors = self.len();
        match GLOBAL.set(Arc::new(self)) {
            Ok(()) => {
                tracing::info!(accessors, "Context propagation registry installed");
                true
            }
            Err(_) => {
                tracing::debug!("Context propagation registry already installed, skipping");
                false
            }
        }
    }

    /// 从当前载体线程捕获快照
    pub fn capture(&self) -> TraceContext {
        let mut snapshot = TraceContext::new();
        if self.propagate_extra {
            snapshot.set_extra(store::all_context());
        }
        for accessor in &self.accessors {
            let value = accessor.capture();
            accessor.slot().write(&mut snapshot, value.as_deref());
        }
        snapshot
    }

    /// 把快照恢复到当前载体线程
    ///
    /// 快照中缺失的字段会被重置，不会保留线程上其他工作单元的旧值。
    /// 对同一快照重复调用结果不变。
    pub fn restore(&self, snapshot: &TraceContext) {
        if self.propagate_extra {
            store::replace_context(snapshot.extra().clone());
        }
        for accessor in &self.accessors {
            accessor.restore(accessor.slot().read(snapshot));
        }
    }
}

/// 一次调度跳转
///
/// 创建时恢复快照，销毁时把阶段写入的值捕获回快照并还原线程原来的值。
/// 放在 `Drop` 中，阶段代码 panic 时同样会还原。
struct Hop<'a> {
    registry: &'a ContextRegistry,
    snapshot: &'a mut TraceContext,
    previous: TraceContext,
}

impl<'a> Hop<'a> {
    fn enter(registry: &'a ContextRegistry, snapshot: &'a mut TraceContext) -> Self {
        let previous = registry.capture();
        registry.restore(snapshot);
        Self {
            registry,
            snapshot,
            previous,
        }
    }
}

impl Drop for Hop<'_> {
    fn drop(&mut self) {
        *self.snapshot = self.registry.capture();
        self.registry.restore(&self.previous);
    }
}

/// 在给定快照下同步执行闭包
pub fn scope<F, R>(context: TraceContext, f: F) -> R
where
    F: FnOnce() -> R,
{
    let registry = ContextRegistry::global();
    let mut snapshot = context;
    let _hop = Hop::enter(&registry, &mut snapshot);
    f()
}

/// 捕获当前上下文，返回一个在任意线程上都以该上下文执行的闭包
///
/// 用于把工作交给线程池或 `std::thread::spawn`。
pub fn wrap_fn<F, R>(f: F) -> impl FnOnce() -> R + Send
where
    F: FnOnce() -> R + Send,
{
    let snapshot = ContextRegistry::global().capture();
    move || scope(snapshot, f)
}

/// 携带上下文快照的 future
///
/// 每次 poll 都是一次调度跳转。future 被取消（drop）时不再做任何恢复。
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Traced<F> {
    inner: Pin<Box<F>>,
    snapshot: TraceContext,
    registry: Arc<ContextRegistry>,
}

impl<F> Traced<F> {
    pub fn new(inner: F, snapshot: TraceContext) -> Self {
        Self::with_registry(inner, snapshot, ContextRegistry::global())
    }

    pub fn with_registry(inner: F, snapshot: TraceContext, registry: Arc<ContextRegistry>) -> Self {
        Self {
            inner: Box::pin(inner),
            snapshot,
            registry,
        }
    }

    /// 当前附着的快照
    pub fn context(&self) -> &TraceContext {
        &self.snapshot
    }
}

impl<F> fmt::Debug for Traced<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Traced")
            .field("snapshot", &self.snapshot)
            .finish_non_exhaustive()
    }
}

impl<F: Future> Future for Traced<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let _hop = Hop::enter(&this.registry, &mut this.snapshot);
        this.inner.as_mut().poll(cx)
    }
}

/// 为任意 future 附加追踪上下文
pub trait TraceContextExt: Sized {
    /// 附加给定快照
    fn with_trace_context(self, context: TraceContext) -> Traced<Self> {
        Traced::new(self, context)
    }

    /// 附加当前线程环境存储的快照
    fn with_current_trace_context(self) -> Traced<Self> {
        Traced::new(self, ContextRegistry::global().capture())
    }
}

impl<F: Future> TraceContextExt for F {}

/// 携带当前上下文派生 tokio 任务
pub fn spawn<F>(future: F) -> tokio::task::JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(future.with_current_trace_context())
}

/// 显式的信号订阅者
///
/// 对应响应式管道中一个阶段的四种调度信号。
pub trait Subscriber<T> {
    type Error;

    fn on_subscribe(&mut self) {}

    fn on_next(&mut self, item: T);

    fn on_error(&mut self, error: Self::Error);

    fn on_complete(&mut self);
}

/// 订阅者包装：每个信号之前恢复快照，之后还原线程
pub struct ContextLifter<S> {
    delegate: S,
    snapshot: TraceContext,
    registry: Arc<ContextRegistry>,
}

impl<S> ContextLifter<S> {
    pub fn new(delegate: S, snapshot: TraceContext) -> Self {
        Self {
            delegate,
            snapshot,
            registry: ContextRegistry::global(),
        }
    }

    /// 以当前线程环境存储的快照包装
    pub fn lift(delegate: S) -> Self {
        let registry = ContextRegistry::global();
        let snapshot = registry.capture();
        Self {
            delegate,
            snapshot,
            registry,
        }
    }

    pub fn context(&self) -> &TraceContext {
        &self.snapshot
    }

    pub fn into_inner(self) -> S {
        self.delegate
    }
}

impl<T, S> Subscriber<T> for ContextLifter<S>
where
    S: Subscriber<T>,
{
    type Error = S::Error;

    fn on_subscribe(&mut self) {
        let _hop = Hop::enter(&self.registry, &mut self.snapshot);
        self.delegate.on_subscribe();
    }

    fn on_next(&mut self, item: T) {
        let _hop = Hop::enter(&self.registry, &mut self.snapshot);
        self.delegate.on_next(item);
    }

    fn on_error(&mut self, error: Self::Error) {
        let _hop = Hop::enter(&self.registry, &mut self.snapshot);
        self.delegate.on_error(error);
    }

    fn on_complete(&mut self) {
        let _hop = Hop::enter(&self.registry, &mut self.snapshot);
        self.delegate.on_complete();
    }
}
