//! The APM tracer seam and its default `tracing`-backed implementation.
//!
//! Hooks only talk to a [`Tracer`] through an [`ApmContext`](crate::ApmContext),
//! so any APM client can be plugged in by implementing [`Tracer`] and
//! [`ApmSpan`].

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use sea_orm::DbErr;
use tracing::{field, Level, Span};

use crate::config::TracerConfig;

pub(crate) const TARGET: &str = "sea_orm_apm";

/// Options for starting a span.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpanOptions {
    /// The span covers work leaving the process, e.g. a database round-trip.
    pub exit_span: bool,
}

/// Database details attached to a span once the statement has run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseSpanContext {
    /// Database instance name.
    pub instance: String,
    /// Statement text, with placeholders.
    pub statement: String,
    /// Statement type, always `"sql"` for this crate.
    pub kind: String,
    pub user: String,
}

/// Final outcome of a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    /// The operation was abandoned before the database answered.
    Unknown,
}

/// A span handle owned by a tracer.
///
/// All methods take `&self`; implementations use interior mutability so a
/// span can be shared between the context that carries it and the hooks
/// that complete it.
pub trait ApmSpan: Send + Sync + fmt::Debug {
    /// Whether the tracer decided not to record this span.
    fn is_dropped(&self) -> bool;

    fn set_name(&self, name: &str);

    fn set_destination(&self, address: &str, port: u16);

    fn set_database(&self, database: &DatabaseSpanContext);

    fn set_outcome(&self, outcome: Outcome);

    /// End the span. Calling `end` more than once has no further effect.
    fn end(&self);

    /// The `tracing` span backing this span, used to instrument the
    /// statement's future so driver events nest under it.
    fn tracing_span(&self) -> Option<Span> {
        None
    }
}

/// A captured error, ready to be delivered.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub message: String,
    pub detail: String,
    pub parent: Option<Arc<dyn ApmSpan>>,
}

/// An APM tracer.
pub trait Tracer: Send + Sync + fmt::Debug {
    /// Start a span as a child of `parent`, or of the ambient span when
    /// `parent` is `None`.
    fn start_span(
        &self,
        parent: Option<&Arc<dyn ApmSpan>>,
        name: &str,
        span_type: &str,
        options: SpanOptions,
    ) -> Arc<dyn ApmSpan>;

    /// Build an error report, or `None` when the tracer is not reporting errors.
    fn capture_error(&self, parent: Option<&Arc<dyn ApmSpan>>, error: &DbErr)
        -> Option<ErrorReport>;

    /// Deliver a report immediately.
    fn send_error(&self, report: ErrorReport);
}

/// An error captured through an [`ApmContext`](crate::ApmContext).
#[derive(Debug)]
pub struct CapturedError<'a> {
    tracer: &'a dyn Tracer,
    report: ErrorReport,
}

impl<'a> CapturedError<'a> {
    pub(crate) fn new(tracer: &'a dyn Tracer, report: ErrorReport) -> Self {
        Self { tracer, report }
    }

    pub fn report(&self) -> &ErrorReport {
        &self.report
    }

    /// Deliver the error now rather than batching it.
    pub fn send(self) {
        self.tracer.send_error(self.report);
    }
}

/// Reports spans and errors through the `tracing` crate.
///
/// Spans are `info`-level spans named `db.query` under the `sea_orm_apm`
/// target, carrying OpenTelemetry-style fields. A span the active subscriber
/// disables counts as dropped, so subscriber filtering acts as sampling.
///
/// | Field | Description |
/// |-------|-------------|
/// | `otel.name` | Statement signature, e.g. `SELECT FROM users` |
/// | `otel.kind` | `client` for exit spans |
/// | `span.type` | e.g. `db.postgresql.query` |
/// | `db.system` | Dialect, e.g. `postgresql` |
/// | `db.name` / `db.user` | From the connection string |
/// | `db.statement` | SQL text (when enabled) |
/// | `server.address` / `server.port` | Destination |
/// | `db.duration_ms` | Recorded on end |
/// | `otel.status_code` | `OK`, `ERROR`, or `UNSET` when abandoned |
/// | `error.message` | Error details (on failure) |
#[derive(Debug, Clone, Default)]
pub struct TracingTracer {
    config: Arc<TracerConfig>,
}

impl TracingTracer {
    pub fn new(config: TracerConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &TracerConfig {
        &self.config
    }
}

impl Tracer for TracingTracer {
    fn start_span(
        &self,
        parent: Option<&Arc<dyn ApmSpan>>,
        name: &str,
        span_type: &str,
        options: SpanOptions,
    ) -> Arc<dyn ApmSpan> {
        let parent_id = match parent.and_then(|span| span.tracing_span()) {
            Some(span) => span.id(),
            None => Span::current().id(),
        };
        let db_system = span_type.split('.').nth(1).unwrap_or_default();

        let span = tracing::info_span!(
            target: TARGET,
            parent: parent_id,
            "db.query",
            otel.name = name,
            otel.kind = field::Empty,
            "span.type" = span_type,
            db.system = db_system,
            db.name = field::Empty,
            db.user = field::Empty,
            db.statement = field::Empty,
            server.address = field::Empty,
            server.port = field::Empty,
            db.duration_ms = field::Empty,
            slow_query = field::Empty,
            otel.status_code = field::Empty,
            error.message = field::Empty,
        );
        if options.exit_span {
            span.record("otel.kind", "client");
        }

        Arc::new(TracingSpan {
            span: Mutex::new(Some(span)),
            started: Instant::now(),
            config: self.config.clone(),
        })
    }

    fn capture_error(
        &self,
        parent: Option<&Arc<dyn ApmSpan>>,
        error: &DbErr,
    ) -> Option<ErrorReport> {
        if !tracing::enabled!(target: TARGET, Level::ERROR) {
            return None;
        }
        Some(ErrorReport {
            message: error.to_string(),
            detail: format!("{:?}", error),
            parent: parent.cloned(),
        })
    }

    fn send_error(&self, report: ErrorReport) {
        let span = report
            .parent
            .as_ref()
            .and_then(|parent| parent.tracing_span())
            .unwrap_or_else(Span::none);
        span.record("error.message", report.message.as_str());
        tracing::error!(
            target: TARGET,
            parent: &span,
            error = %report.message,
            detail = %report.detail,
            "Database operation failed"
        );
    }
}

#[derive(Debug)]
struct TracingSpan {
    span: Mutex<Option<Span>>,
    started: Instant,
    config: Arc<TracerConfig>,
}

impl TracingSpan {
    fn with_span(&self, f: impl FnOnce(&Span)) {
        let guard = self.span.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(span) = guard.as_ref() {
            f(span);
        }
    }
}

impl ApmSpan for TracingSpan {
    fn is_dropped(&self) -> bool {
        let guard = self.span.lock().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().map_or(true, Span::is_disabled)
    }

    fn set_name(&self, name: &str) {
        self.with_span(|span| {
            span.record("otel.name", name);
        });
    }

    fn set_destination(&self, address: &str, port: u16) {
        self.with_span(|span| {
            if !address.is_empty() {
                span.record("server.address", address);
            }
            if port != 0 {
                span.record("server.port", port as i64);
            }
        });
    }

    fn set_database(&self, database: &DatabaseSpanContext) {
        let record_statements = self.config.record_statements;
        self.with_span(|span| {
            if !database.instance.is_empty() {
                span.record("db.name", database.instance.as_str());
            }
            if !database.user.is_empty() {
                span.record("db.user", database.user.as_str());
            }
            if record_statements {
                span.record("db.statement", database.statement.as_str());
            }
        });
    }

    fn set_outcome(&self, outcome: Outcome) {
        self.with_span(|span| {
            let status = match outcome {
                Outcome::Success => "OK",
                Outcome::Failure => "ERROR",
                Outcome::Unknown => "UNSET",
            };
            span.record("otel.status_code", status);
        });
    }

    fn end(&self) {
        let Some(span) = self
            .span
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        let elapsed = self.started.elapsed();
        span.record("db.duration_ms", elapsed.as_millis() as i64);

        if elapsed > self.config.slow_query_threshold {
            span.record("slow_query", true);
            tracing::warn!(
                target: TARGET,
                parent: &span,
                duration_ms = elapsed.as_millis() as i64,
                threshold_ms = self.config.slow_query_threshold.as_millis() as i64,
                "Slow query detected"
            );
        }
        // The span closes once this last handle is dropped.
    }

    fn tracing_span(&self) -> Option<Span> {
        self.span
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
