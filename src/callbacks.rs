//! Hooks that report every operation as an exit span.

use std::sync::Arc;

use sea_orm::DbErr;

use crate::connection::HookedConnection;
use crate::context::{retrieve, store, CONTEXT_KEY};
use crate::dsn::DsnInfo;
use crate::hooks::{OperationKind, Phase, Scope};
use crate::signature::signature;
use crate::tracer::{ApmSpan, DatabaseSpanContext, Outcome, SpanOptions};

/// Namespace of the hooks this crate registers.
pub const CALLBACK_PREFIX: &str = "apm";

/// Span type prefix for a driver, e.g. `db.postgresql.`.
pub fn span_type_prefix(driver_name: &str) -> String {
    let driver_name = driver_name.to_lowercase();
    let dialect = match driver_name.as_str() {
        "postgres" => "postgresql",
        other => other,
    };
    format!("db.{}.", dialect)
}

/// Span type for an operation, e.g. `db.mysql.exec`.
pub fn span_type(driver_name: &str, kind: OperationKind) -> String {
    format!("{}{}", span_type_prefix(driver_name), kind.span_subtype())
}

/// Name of the hook registered for a phase of an operation, e.g. `apm:before:create`.
pub fn hook_name(phase: Phase, kind: OperationKind) -> String {
    format!("{}:{}:{}", CALLBACK_PREFIX, phase.as_str(), kind.as_str())
}

/// Register span-reporting hooks on a handle acquired without [`open`](crate::open).
///
/// Spans carry no destination or database metadata because no connection
/// string is known. Registering again replaces the hooks; it never doubles
/// the spans reported per operation.
pub fn register_callbacks(handle: &HookedConnection) {
    register_with_dsn(handle, Arc::new(DsnInfo::default()));
}

pub(crate) fn register_with_dsn(handle: &HookedConnection, dsn_info: Arc<DsnInfo>) {
    let callbacks = handle.callbacks();
    for kind in OperationKind::ALL {
        callbacks.register(
            kind,
            Phase::Before,
            hook_name(Phase::Before, kind),
            before_hook(span_type(handle.driver_name(), kind)),
        );
        callbacks.register(
            kind,
            Phase::After,
            hook_name(Phase::After, kind),
            after_hook(dsn_info.clone()),
        );
    }
    tracing::debug!(
        target: "sea_orm_apm",
        driver = handle.driver_name(),
        address = %dsn_info.address,
        database = %dsn_info.database,
        "Registered APM callbacks"
    );
}

fn before_hook(span_type: String) -> impl Fn(&mut Scope<'_>) + Send + Sync + 'static {
    move |scope| {
        let Some(context) = retrieve(scope) else {
            return;
        };
        // The statement text is only final after execution; the after hook names the span.
        let (span, context) = context.start_span("", &span_type, SpanOptions { exit_span: true });
        if span.is_dropped() {
            span.end();
            scope.remove(CONTEXT_KEY);
            return;
        }
        store(scope, Some(context));
    }
}

/// Ends the span when dropped, so every exit path of the after hook ends it.
struct EndOnDrop(Arc<dyn ApmSpan>);

impl Drop for EndOnDrop {
    fn drop(&mut self) {
        self.0.end();
    }
}

fn after_hook(dsn_info: Arc<DsnInfo>) -> impl Fn(&mut Scope<'_>) + Send + Sync + 'static {
    move |scope| {
        let Some(context) = retrieve(scope) else {
            return;
        };
        let Some(span) = context.span().cloned() else {
            return;
        };

        span.set_name(&signature(scope.sql()));
        span.set_destination(&dsn_info.address, dsn_info.port);
        span.set_database(&DatabaseSpanContext {
            instance: dsn_info.database.clone(),
            statement: scope.sql().to_string(),
            kind: "sql".to_string(),
            user: dsn_info.user.clone(),
        });
        let span = EndOnDrop(span);

        if scope.is_cancelled() {
            span.0.set_outcome(Outcome::Unknown);
            return;
        }
        match scope.error() {
            None => span.0.set_outcome(Outcome::Success),
            // An empty result is a routine outcome, not a failure worth reporting.
            Some(DbErr::RecordNotFound(_)) => span.0.set_outcome(Outcome::Success),
            Some(error) => {
                span.0.set_outcome(Outcome::Failure);
                if let Some(captured) = context.capture_error(error) {
                    captured.send();
                }
            }
        }
    }
}
