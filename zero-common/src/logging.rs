//! Logging utilities for the Zero planner services.
//!
//! # Noise Filtering
//!
//! Noisy library modules (hyper, h2, tower_http) are held at `warn` so that
//! evaluation logs stay readable at `debug`.

use std::collections::BTreeMap;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Modules filtered to warn level.
pub const NOISY_MODULES: &[&str] = &["hyper", "hyper_util", "h2", "tokio_util", "tower_http"];

/// Build the filter directives for a base level plus extra exclusions.
fn build_directives(log_level: &str, excluded_targets: &[String]) -> String {
    let mut directives = String::from(log_level);

    for module in NOISY_MODULES {
        directives.push_str(&format!(",{module}=warn"));
    }

    for target in excluded_targets {
        directives.push_str(&format!(",{target}=warn"));
    }

    directives
}

/// Initialize logging with the given configuration.
///
/// * `log_level` - Base log level (trace, debug, info, warn, error)
/// * `log_format` - "json" for structured output, anything else for pretty
///
/// `RUST_LOG` overrides the computed filter when set.
pub fn init_logging(log_level: &str, log_format: &str) {
    init_logging_with_exclusions(log_level, log_format, &[]);
}

/// Initialize logging, holding additional targets at `warn`.
pub fn init_logging_with_exclusions(
    log_level: &str,
    log_format: &str,
    excluded_targets: &[String],
) {
    let directives = build_directives(log_level, excluded_targets);
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives));

    let subscriber = tracing_subscriber::registry().with(filter);

    if log_format == "json" {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true);
        let _ = subscriber.with(fmt_layer).try_init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(true)
            .with_file(false)
            .with_line_number(false);
        let _ = subscriber.with(fmt_layer).try_init();
    }

    tracing::info!(
        log_level = %log_level,
        log_format = %log_format,
        noise_filtered = NOISY_MODULES.len() + excluded_targets.len(),
        "Logging initialized"
    );
}

/// Generate a new trace ID for request tracing.
pub fn generate_trace_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Generate a short span ID.
pub fn generate_span_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

// ============================================================================
// Request Context
// ============================================================================

/// Per-request tracing context.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Trace ID, taken from `X-Trace-Id` when the caller supplies one
    pub trace_id: String,
    /// Span ID of this request
    pub span_id: String,
    /// Caller's span (`X-Span-Id`)
    pub parent_span_id: Option<String>,
    /// Service name
    pub service: String,
    /// Extra key-value pairs attached to log lines
    pub baggage: BTreeMap<String, String>,
}

impl RequestContext {
    /// Create a new request context.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            trace_id: generate_trace_id(),
            span_id: generate_span_id(),
            parent_span_id: None,
            service: service.into(),
            baggage: BTreeMap::new(),
        }
    }

    /// Create context from HTTP headers.
    pub fn from_headers(headers: &http::HeaderMap, service: impl Into<String>) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(String::from)
        };

        Self {
            trace_id: header("X-Trace-Id").unwrap_or_else(generate_trace_id),
            span_id: generate_span_id(),
            parent_span_id: header("X-Span-Id"),
            service: service.into(),
            baggage: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair.
    pub fn with_baggage(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.baggage.insert(key.into(), value.into());
        self
    }

    /// Tracing span carrying this context.
    pub fn span(&self, operation: &'static str) -> tracing::Span {
        tracing::info_span!(
            "request",
            service = %self.service,
            operation = operation,
            trace_id = %self.trace_id,
            span_id = %self.span_id,
        )
    }

    /// Add context to HTTP headers for propagation.
    pub fn to_headers(&self, headers: &mut http::HeaderMap) {
        if let Ok(trace_id) = self.trace_id.parse() {
            headers.insert("X-Trace-Id", trace_id);
        }
        if let Ok(span_id) = self.span_id.parse() {
            headers.insert("X-Span-Id", span_id);
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new("unknown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives_include_exclusions() {
        let directives = build_directives("debug", &["zero_planner::scoring".to_string()]);
        assert!(directives.starts_with("debug"));
        assert!(directives.contains("hyper=warn"));
        assert!(directives.contains("zero_planner::scoring=warn"));
    }

    #[test]
    fn test_generate_trace_id() {
        let id1 = generate_trace_id();
        let id2 = generate_trace_id();
        assert_ne!(id1, id2);
        assert_eq!(id1.len(), 36);
    }

    #[test]
    fn test_generate_span_id() {
        assert_eq!(generate_span_id().len(), 8);
    }

    #[test]
    fn test_request_context_from_headers() {
        let mut headers = http::HeaderMap::new();
        headers.insert("X-Trace-Id", "trace-123".parse().unwrap());
        headers.insert("X-Span-Id", "parent-1".parse().unwrap());

        let ctx = RequestContext::from_headers(&headers, "zero-planner");
        assert_eq!(ctx.trace_id, "trace-123");
        assert_eq!(ctx.parent_span_id.as_deref(), Some("parent-1"));
        assert_eq!(ctx.service, "zero-planner");
    }

    #[test]
    fn test_request_context_generates_missing_trace() {
        let ctx = RequestContext::from_headers(&http::HeaderMap::new(), "zero-planner");
        assert_eq!(ctx.trace_id.len(), 36);
        assert!(ctx.parent_span_id.is_none());
    }

    #[test]
    fn test_request_context_round_trips_headers() {
        let ctx = RequestContext::new("zero-planner").with_baggage("endpoint", "batch");
        let mut headers = http::HeaderMap::new();
        ctx.to_headers(&mut headers);

        let echoed = RequestContext::from_headers(&headers, "zero-planner");
        assert_eq!(echoed.trace_id, ctx.trace_id);
        assert_eq!(echoed.parent_span_id, Some(ctx.span_id.clone()));
        assert_eq!(ctx.baggage.get("endpoint").map(String::as_str), Some("batch"));
    }
}
