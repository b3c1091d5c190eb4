//! Example: How to configure tracing to display trace context in logs
//!
//! Inbound requests get a trace id (from X-Trace-Id / traceparent / X-Amzn-Trace-Id or generated),
//! handlers log with it, and the outbound client forwards it downstream.
//!
//! Try: `curl -H 'X-Trace-Id: abc123' -H 'X-User-Id: user-1' localhost:3000/`

use axum::{http::Request, routing::get, Router};
use std::convert::Infallible;
use tower::{service_fn, ServiceBuilder, ServiceExt};
use trace_context::{
    bridge, store, PropagateContextLayer, TraceConfig, TraceContext, TraceContextLayer, TraceId,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() {
    // The "request" span carries trace_id, so fmt::layer prints it on every event
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = TraceConfig::default().service_name("demo-service");
    if let Err(error) = config.validate() {
        tracing::error!(%error, "Invalid trace configuration");
        return;
    }

    let app = Router::new()
        .route("/", get(handler))
        .route("/context", get(context_handler))
        .layer(TraceContextLayer::with_config(config));

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();

    tracing::info!("Starting server on 0.0.0.0:3000");
    axum::serve(listener, app).await.unwrap();
}

async fn handler(trace_id: TraceId) -> String {
    tracing::info!("Handling request");

    // Work handed to another task keeps the same context
    let user = bridge::spawn(async { store::user_id() }).await.unwrap_or_default();
    call_downstream().await;

    format!(
        "Hello {}! Your trace ID is: {trace_id}",
        user.as_deref().unwrap_or("anonymous")
    )
}

async fn context_handler(ctx: TraceContext) -> String {
    ctx.fields()
        .into_iter()
        .map(|(key, value)| format!("{key}={value}\n"))
        .collect()
}

/// Outbound client: every request carries X-Trace-Id and identity headers
async fn call_downstream() {
    let client = ServiceBuilder::new()
        .layer(PropagateContextLayer::new())
        .service(service_fn(|req: Request<()>| async move {
            tracing::info!(headers = ?req.headers(), "Calling downstream service");
            Ok::<_, Infallible>(())
        }));
    let _ = client.oneshot(Request::new(())).await;
}
