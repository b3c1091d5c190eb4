//! Example: tracing message consumers
//!
//! Publishes a few messages with the current context as attributes, then consumes them
//! through a wrapped listener. Each `Message Received` / `Message Processed` line carries
//! the publisher's trace id.
//!
//! Run with: `RUST_LOG=trace_context=debug cargo run --example message_consumer`

use std::collections::HashMap;
use std::fmt;
use trace_context::message::{RedisMessage, SqsMessage, StreamRecord};
use trace_context::{
    propagation, store, MessageConfig, MessageEnvelope, MessageInterceptor, TraceId,
};
use tracing_subscriber::{fmt as tracing_fmt, prelude::*, EnvFilter};

#[derive(Debug)]
struct RejectedOrder(String);

impl fmt::Display for RejectedOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "order rejected: {}", self.0)
    }
}

fn publish(trace_id: &str) -> HashMap<String, String> {
    store::set_trace_id(TraceId::from_string(trace_id).unwrap_or_default());
    store::set_user_id("user-1");
    store::set_tenant_id("tenant-1");
    let attributes = propagation::message_attributes();
    store::clear_all();
    attributes
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let interceptor = MessageInterceptor::new(
        MessageConfig::default().log_payload(true).max_payload_length(64),
    )
    .with_service_name("order-consumer")
    .with_masker(|text: &str| text.replace("4111-1111-1111-1111", "****"));

    let listener = interceptor.wrap(|envelope: &MessageEnvelope| {
        tracing::info!(
            user_id = store::user_id().as_deref(),
            "Processing {}",
            envelope.source()
        );
        if envelope.payload().contains("reject") {
            return Err(RejectedOrder(envelope.payload().into_owned()));
        }
        Ok(())
    });

    let envelopes = [
        MessageEnvelope::from(SqsMessage {
            queue_name: "orders".into(),
            message_id: Some("sqs-1".into()),
            headers: publish("trace-sqs"),
            body: r#"{"orderId":1,"card":"4111-1111-1111-1111"}"#.into(),
        }),
        MessageEnvelope::from(RedisMessage {
            channel: "order-events".into(),
            body: br#"{"X-Trace-Id":"trace-redis","event":"reject"}"#.to_vec(),
        }),
        MessageEnvelope::from(StreamRecord {
            stream: "order-stream".into(),
            id: "1700000000000-0".into(),
            fields: publish("trace-stream"),
        }),
    ];

    for envelope in &envelopes {
        if let Err(error) = listener.handle(envelope) {
            tracing::warn!(%error, "Listener returned an error");
        }
    }

    // Async consumption: the context follows the work across await points
    let ctx = envelopes[0].to_context();
    let result = interceptor
        .intercept_async(&ctx, None, async {
            tokio::task::yield_now().await;
            tracing::info!(trace_id = %store::trace_id_or_unknown(), "Async processing");
            Ok::<_, RejectedOrder>(())
        })
        .await;
    tracing::info!(ok = result.is_ok(), "Done");
}
