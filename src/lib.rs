//! # sea-orm-apm
//!
//! APM exit-span instrumentation for SeaORM.
//!
//! This crate reports every create, read, update, delete and raw row query
//! issued through a [`HookedConnection`] as an exit span, a child of the
//! tracing context the caller attached to the handle. It is a thin adapter:
//! SeaORM executes the statements, the tracer records and ships the spans.
//!
//! ## How it works
//!
//! - A [`HookedConnection`] runs named `before` and `after` hook chains around
//!   each statement, one pair of chains per [`OperationKind`].
//! - [`register_callbacks`] installs `apm:before:<op>` and `apm:after:<op>`
//!   hooks. The before hook starts a span from the carried [`ApmContext`];
//!   the after hook names it after the statement signature, attaches
//!   destination and database metadata, reports errors and ends it.
//! - Operations on a handle with no attached context are not traced.
//! - `DbErr::RecordNotFound` is never reported as an error.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sea_orm_apm::{open, ApmContext};
//!
//! // Open a pool with callbacks registered
//! let db = open("postgres", "postgres://app@localhost/mydb").await?;
//!
//! // Attach a context; spans become children of the current tracing span
//! let traced = db.with_context(ApmContext::tracing());
//!
//! // Use it exactly like a normal DatabaseConnection
//! let users = Users::find().all(&traced).await?;
//! ```
//!
//! ## Span Types
//!
//! | Operation | Span type |
//! |-----------|-----------|
//! | create, update, delete | `db.<dialect>.exec` |
//! | query, row query | `db.<dialect>.query` |
//!
//! The `postgres` driver is reported as the `postgresql` dialect.

mod callbacks;
mod config;
mod connection;
mod context;
mod dsn;
mod error;
mod hooks;
mod open;
mod signature;
mod tracer;

pub use callbacks::{hook_name, register_callbacks, span_type, span_type_prefix, CALLBACK_PREFIX};
pub use config::{OpenConfig, TracerConfig};
pub use connection::{HookedConnection, HookedTransaction, TracingExt};
pub use context::{attach, retrieve, ApmContext, CONTEXT_KEY};
pub use dsn::{dsn_parser, DsnInfo, DsnParser};
pub use error::{Error, Result};
pub use hooks::{Callbacks, Hook, OperationKind, Phase, Scope, Value, Values};
pub use open::{open, open_with_config, ConnectArgs};
pub use signature::signature;
pub use tracer::{
    ApmSpan, CapturedError, DatabaseSpanContext, ErrorReport, Outcome, SpanOptions, Tracer,
    TracingTracer,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{open, ApmContext, HookedConnection, OpenConfig, TracingExt};
}
