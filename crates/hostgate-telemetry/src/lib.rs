//! OpenTelemetry integration for hostgate.
//!
//! Provides the OTel tracing layer, W3C Trace Context extraction for inbound
//! HTTP requests, and a sampler that keeps every filesystem mutation while
//! thinning plain request spans.
//!
//! # Activation
//!
//! Export is compiled in with the `telemetry` feature and switched on at
//! runtime by the standard OTel environment variables:
//!
//! ```bash
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://localhost:4317 hostgate-server --root /srv/share
//! ```
//!
//! Set `OTEL_SDK_DISABLED=true` to disable even when the endpoint is set.

#[cfg(feature = "telemetry")]
mod otel;

#[cfg(feature = "telemetry")]
pub use otel::{OtelGuard, TelemetryError, otel_layer};

/// Check whether OTel export should be enabled.
///
/// Returns `true` when:
/// - `OTEL_SDK_DISABLED` is NOT `"true"`
/// - AND either `OTEL_EXPORTER_OTLP_ENDPOINT` is set, or
///   `OTEL_TRACES_EXPORTER` is set to something other than `"none"`
///
/// Always `false` without the `telemetry` feature.
pub fn otel_enabled() -> bool {
    if !cfg!(feature = "telemetry") {
        return false;
    }
    env_requests_export(|name| std::env::var(name).ok())
}

fn env_requests_export(var: impl Fn(&str) -> Option<String>) -> bool {
    if var("OTEL_SDK_DISABLED").is_some_and(|v| v.eq_ignore_ascii_case("true")) {
        return false;
    }
    if var("OTEL_EXPORTER_OTLP_ENDPOINT").is_some() {
        return true;
    }
    var("OTEL_TRACES_EXPORTER").is_some_and(|v| !v.eq_ignore_ascii_case("none"))
}

/// Create the request span, parented on an inbound W3C `traceparent` when
/// one is present and telemetry is compiled in.
pub fn extract_trace_context(
    method: &str,
    uri: &str,
    traceparent: Option<&str>,
    tracestate: Option<&str>,
) -> tracing::Span {
    let span = tracing::info_span!("http.request", method = %method, uri = %uri);
    if let Some(traceparent) = traceparent.filter(|t| !t.is_empty()) {
        attach_remote_parent(&span, traceparent, tracestate.unwrap_or_default());
    }
    span
}

#[cfg(feature = "telemetry")]
fn attach_remote_parent(span: &tracing::Span, traceparent: &str, tracestate: &str) {
    otel::set_remote_parent(span, traceparent, tracestate);
}

#[cfg(not(feature = "telemetry"))]
fn attach_remote_parent(_span: &tracing::Span, _traceparent: &str, _tracestate: &str) {}
