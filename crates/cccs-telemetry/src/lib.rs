// SPDX-License-Identifier: MIT OR Apache-2.0
//! Observability spans for CCCS flows.
//!
//! [`ObservabilityService::start_span`] yields an RAII guard carrying a
//! [`TraceContext`]. The structured `start_span` marker is logged
//! immediately; the matching `end_span` marker is logged when the guard
//! drops, so the caller always sees span closure even on early return or
//! unwind.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use cccs_core::TraceContext;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

/// Generates trace/span ids and structured span markers.
#[derive(Debug, Clone, Default)]
pub struct ObservabilityService;

impl ObservabilityService {
    /// Create the service.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Open a span named `name`. A parent supplies the trace id; otherwise
    /// a fresh trace begins.
    #[must_use]
    pub fn start_span(&self, name: &str, parent: Option<&TraceContext>) -> SpanGuard {
        let context = TraceContext {
            trace_id: parent
                .map(|p| p.trace_id.clone())
                .unwrap_or_else(new_trace_id),
            span_id: new_span_id(),
            parent_span_id: parent.map(|p| p.span_id.clone()),
            name: name.to_string(),
            start_time: Utc::now(),
            end_time: None,
        };
        info!(
            trace_id = %context.trace_id,
            span_id = %context.span_id,
            parent_span_id = context.parent_span_id.as_deref(),
            name = %context.name,
            "start_span"
        );
        SpanGuard { context }
    }
}

/// Scoped span handle; logs the `end_span` marker on drop.
#[derive(Debug)]
pub struct SpanGuard {
    context: TraceContext,
}

impl SpanGuard {
    /// The span's trace context (no end time while the span is open).
    #[must_use]
    pub fn context(&self) -> &TraceContext {
        &self.context
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        self.context.end_time = Some(Utc::now());
        info!(
            trace_id = %self.context.trace_id,
            span_id = %self.context.span_id,
            name = %self.context.name,
            "end_span"
        );
    }
}

fn new_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn new_span_id() -> String {
    Uuid::new_v4().simple().to_string()[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_span_gets_fresh_ids() {
        let obs = ObservabilityService::new();
        let span = obs.start_span("cccs:ingest", None);
        let ctx = span.context();
        assert_eq!(ctx.name, "cccs:ingest");
        assert_eq!(ctx.trace_id.len(), 32);
        assert_eq!(ctx.span_id.len(), 16);
        assert!(ctx.parent_span_id.is_none());
        assert!(ctx.end_time.is_none());
    }

    #[test]
    fn child_span_inherits_trace_id() {
        let obs = ObservabilityService::new();
        let parent = obs.start_span("outer", None);
        let parent_ctx = parent.context().clone();
        let child = obs.start_span("inner", Some(&parent_ctx));
        assert_eq!(child.context().trace_id, parent_ctx.trace_id);
        assert_eq!(
            child.context().parent_span_id.as_deref(),
            Some(parent_ctx.span_id.as_str())
        );
        assert_ne!(child.context().span_id, parent_ctx.span_id);
    }

    #[test]
    fn spans_get_distinct_ids() {
        let obs = ObservabilityService::new();
        let a = obs.start_span("a", None);
        let b = obs.start_span("b", None);
        assert_ne!(a.context().trace_id, b.context().trace_id);
        assert_ne!(a.context().span_id, b.context().span_id);
    }
}
