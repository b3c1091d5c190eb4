//! 错误处理和边界情况测试
//!
//! 所有传播操作都不会失败：格式错误的头部视为缺失，
//! 下游错误原样返回，任何退出路径上的上下文都会被清空。

use http::{HeaderMap, HeaderValue};
use std::panic::{self, AssertUnwindSafe};
use trace_context::codec::{self, HeaderSource};
use trace_context::{
    propagation, store, ConfigError, MessageConfig, MessageContext, MessageInterceptor,
    ScopeGuard, TraceConfig, TraceFilter, TraceId,
};

fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in pairs {
        map.insert(*name, HeaderValue::from_str(value).unwrap());
    }
    map
}

/// 测试TraceId验证的边界情况
#[test]
fn test_trace_id_validation_edge_cases() {
    let invalid_chars = [
        "0af7651916cd43dd8448eb211c80319G",  // 大写G
        "0af7651916cd43dd8448eb211c80319-",  // 连字符
        "0af7651916cd43dd8448eb211c80319 ",  // 空格
        "0af7651916cd43dd8448eb211c80319\n", // 换行符
        "0af7651916cd43dd8448eb211c80319\0", // 空字符
    ];
    for invalid_id in &invalid_chars {
        assert!(
            TraceId::from_string_validated(invalid_id).is_none(),
            "应该拒绝无效ID: {:?}",
            invalid_id
        );
    }

    assert!(TraceId::from_string_validated("00000000000000000000000000000000").is_none());
    assert!(TraceId::from_string_validated("0af7651916cd43dd8448eb211c80319c").is_some());

    // 宽松构造只拒绝空白
    assert!(TraceId::from_string("").is_none());
    assert!(TraceId::from_string(" \t ").is_none());
    assert_eq!(TraceId::from_string(" abc123 ").unwrap().as_str(), "abc123");
}

/// 格式错误的复合头部被跳过，继续尝试下一个名称
#[test]
fn test_malformed_composite_headers_are_skipped() {
    let names = TraceConfig::default().header_names;

    let malformed_traceparent = [
        "00-abc",
        "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7",
        "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-extra",
        "00--00f067aa0ba902b7-01",
        "",
    ];
    for value in malformed_traceparent {
        let map = headers(&[("traceparent", value)]);
        assert_eq!(codec::extract(&map, &names), None, "traceparent: {value:?}");
    }

    let malformed_xray = ["Parent=53995c3f42cd8ad8;Sampled=1", "Root=;Parent=1", "garbage"];
    for value in malformed_xray {
        let map = headers(&[("x-amzn-trace-id", value)]);
        assert_eq!(codec::extract(&map, &names), None, "xray: {value:?}");
    }

    // 前面的头部格式错误时使用后面的头部
    let map = headers(&[
        ("traceparent", "00-abc"),
        ("x-amzn-trace-id", "Root=1-5759e988-bd862e3fe1be46a994272793;Sampled=1"),
    ]);
    assert_eq!(
        codec::extract(&map, &names).unwrap().as_str(),
        "1-5759e988-bd862e3fe1be46a994272793"
    );
}

/// 非 UTF-8 头部值视为缺失
#[test]
fn test_non_utf8_header_value_is_absent() {
    let mut map = HeaderMap::new();
    map.insert("x-trace-id", HeaderValue::from_bytes(&[0xff, 0xfe]).unwrap());
    assert_eq!(map.header("X-Trace-Id"), None);
    assert_eq!(codec::extract(&map, &["X-Trace-Id"]), None);
}

/// 下游错误原样返回，上下文被清空
#[test]
fn test_filter_error_passthrough_and_clear() {
    #[derive(Debug, PartialEq)]
    struct DownstreamError(&'static str);

    impl std::fmt::Display for DownstreamError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.0)
        }
    }

    let filter = TraceFilter::default();
    let request = headers(&[("x-trace-id", "abc123"), ("x-user-id", "u1")]);
    let mut response = HeaderMap::new();

    let result: Result<(), DownstreamError> = filter.filter_result(&request, &mut response, || {
        store::add_context("orderId", "ORD-1");
        Err(DownstreamError("db down"))
    });

    assert_eq!(result, Err(DownstreamError("db down")));
    assert_eq!(response.get("x-trace-id").unwrap(), "abc123");
    assert!(store::is_empty());
}

/// panic 时同样清空，下一个工作单元看不到残留
#[test]
fn test_panic_then_next_unit_starts_clean() {
    let filter = TraceFilter::default();
    let first = headers(&[("x-trace-id", "first"), ("x-tenant-id", "tenant-1")]);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        filter.filter(&first, &mut HeaderMap::new(), || panic!("handler exploded"))
    }));
    assert!(outcome.is_err());

    let second = headers(&[("x-trace-id", "second")]);
    let tenant = filter.filter(&second, &mut HeaderMap::new(), store::tenant_id);
    assert_eq!(tenant, None, "上一个工作单元的租户不应泄漏");
}

/// 重复清空是安全的空操作
#[test]
fn test_double_clear_is_noop() {
    store::set_user_id("u1");
    store::clear_all();
    store::clear_all();
    assert!(store::is_empty());

    {
        let _outer = ScopeGuard::new();
        let _inner = ScopeGuard::new();
        store::set_user_id("u2");
    }
    assert!(store::is_empty());
}

/// 空值和空白值不会写入存储
#[test]
fn test_empty_values_never_stored() {
    store::set_user_id("");
    store::set_tenant_id("   ");
    store::add_context("", "value");
    store::add_context("key", "");
    store::add_context("blank", "   ");
    assert!(store::is_empty());
    assert!(propagation::headers().is_empty());
}

/// 读取缺失的值不会失败
#[test]
fn test_reads_on_empty_store() {
    store::clear_all();
    assert_eq!(store::trace_id(), None);
    assert_eq!(store::trace_id_or_unknown(), "unknown");
    assert_eq!(store::user_id(), None);
    assert_eq!(store::get_context("missing"), None);
    assert!(store::all_context().is_empty());
}

/// 失败但没有错误对象的消息同样清空
#[test]
fn test_message_failure_without_error() {
    let interceptor = MessageInterceptor::default();
    let ctx = MessageContext::builder()
        .source("SQS")
        .queue_name("q")
        .trace_id("t1")
        .build();

    interceptor.before_processing(&ctx, None);
    assert_eq!(store::trace_id_or_unknown(), "t1");
    let outcome = interceptor.after_processing(&ctx, false, None);

    assert!(!outcome.success);
    assert!(store::is_empty());
}

/// 没有追踪ID属性的消息：生成新ID，失败结束后同样清空
#[test]
fn test_message_without_trace_id_fails_and_clears() {
    store::clear_all();
    let interceptor = MessageInterceptor::default();
    let ctx = MessageContext::builder()
        .source("SQS")
        .queue_name("q")
        .attribute("X-User-Id", "u1")
        .build();
    assert!(ctx.trace_id().is_none());

    interceptor.before_processing(&ctx, None);
    let generated = store::trace_id().expect("应该生成追踪ID");
    assert_eq!(generated.as_str().len(), 32);
    assert!(generated.is_w3c_compliant());
    assert_eq!(store::user_id().as_deref(), Some("u1"));

    let outcome = interceptor.after_processing(&ctx, false, None);
    assert!(!outcome.success);
    assert!(store::is_empty());
}

/// 配置校验错误
#[test]
fn test_config_validation_errors() {
    assert_eq!(
        TraceConfig::default()
            .response_header_name("")
            .validate(),
        Err(ConfigError::InvalidResponseHeaderName(String::new()))
    );
    assert_eq!(
        MessageConfig::default().max_payload_length(0).validate(),
        Err(ConfigError::ZeroPayloadLength)
    );

    let message = ConfigError::InvalidResponseHeaderName("bad header".into()).to_string();
    assert!(message.contains("bad header"));
}
