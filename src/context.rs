//! Carrying a tracing context through an operation's scope.

use std::sync::Arc;

use sea_orm::DbErr;

use crate::connection::HookedConnection;
use crate::hooks::Scope;
use crate::tracer::{ApmSpan, CapturedError, SpanOptions, Tracer, TracingTracer};

/// Scope key under which the carried context is stored.
pub const CONTEXT_KEY: &str = "apm:context";

/// The tracing lineage of the current unit of work.
///
/// A context pairs a tracer with the span that is active, if any. Starting a
/// span yields a child context whose active span is the new span.
#[derive(Debug, Clone)]
pub struct ApmContext {
    tracer: Arc<dyn Tracer>,
    span: Option<Arc<dyn ApmSpan>>,
}

impl ApmContext {
    /// A root context reporting to `tracer`.
    pub fn new(tracer: Arc<dyn Tracer>) -> Self {
        Self { tracer, span: None }
    }

    /// A root context reporting through the `tracing` crate.
    ///
    /// Spans started from it become children of the `tracing` span that is
    /// current when they start.
    pub fn tracing() -> Self {
        Self::new(Arc::new(TracingTracer::default()))
    }

    pub fn tracer(&self) -> &Arc<dyn Tracer> {
        &self.tracer
    }

    /// The active span.
    pub fn span(&self) -> Option<&Arc<dyn ApmSpan>> {
        self.span.as_ref()
    }

    /// A copy of this context with `span` as the active span.
    pub fn with_span(&self, span: Arc<dyn ApmSpan>) -> Self {
        Self {
            tracer: self.tracer.clone(),
            span: Some(span),
        }
    }

    /// Start a child of the active span and return it with its context.
    pub fn start_span(
        &self,
        name: &str,
        span_type: &str,
        options: SpanOptions,
    ) -> (Arc<dyn ApmSpan>, ApmContext) {
        let span = self
            .tracer
            .start_span(self.span.as_ref(), name, span_type, options);
        let context = self.with_span(span.clone());
        (span, context)
    }

    /// Capture `error` against the active span.
    pub fn capture_error(&self, error: &DbErr) -> Option<CapturedError<'_>> {
        self.tracer
            .capture_error(self.span.as_ref(), error)
            .map(|report| CapturedError::new(self.tracer.as_ref(), report))
    }
}

/// Derive a handle whose operations carry `context`.
pub fn attach(context: ApmContext, handle: &HookedConnection) -> HookedConnection {
    handle.with_context(context)
}

/// Read the carried context from a scope.
///
/// Returns `None` when no context is stored or the stored value is not an
/// [`ApmContext`].
pub fn retrieve(scope: &Scope<'_>) -> Option<ApmContext> {
    scope
        .get(CONTEXT_KEY)
        .and_then(|value| (**value).downcast_ref::<ApmContext>())
        .cloned()
}

/// Replace the carried context on a scope, or clear it.
pub(crate) fn store(scope: &mut Scope<'_>, context: Option<ApmContext>) {
    match context {
        Some(context) => scope.set(CONTEXT_KEY, Arc::new(context)),
        None => {
            scope.remove(CONTEXT_KEY);
        }
    }
}
