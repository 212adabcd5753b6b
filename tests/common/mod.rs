//! Shared test fixtures: a recording tracer and a small entity.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use sea_orm::DbErr;
use sea_orm_apm::{
    ApmContext, ApmSpan, DatabaseSpanContext, ErrorReport, Outcome, SpanOptions, Tracer,
};

pub mod cake {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "cake")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub name: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

/// Everything the tracer saw about one span.
#[derive(Debug, Clone, Default)]
pub struct SpanRecord {
    pub id: usize,
    pub parent: Option<usize>,
    pub name: String,
    pub span_type: String,
    pub exit: bool,
    pub dropped: bool,
    pub renamed: usize,
    pub destination: Option<(String, u16)>,
    pub database: Option<DatabaseSpanContext>,
    pub outcome: Option<Outcome>,
    pub ended: usize,
}

#[derive(Debug, Default)]
struct State {
    spans: Vec<SpanRecord>,
    addresses: Vec<usize>,
    captured: Vec<String>,
    sent: Vec<String>,
}

/// A tracer that records every call made to it.
#[derive(Debug, Clone, Default)]
pub struct RecordingTracer {
    state: Arc<Mutex<State>>,
    sample_out: bool,
}

impl RecordingTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A tracer that drops every span it starts.
    pub fn sampling_out() -> Self {
        Self {
            sample_out: true,
            ..Self::default()
        }
    }

    pub fn context(&self) -> ApmContext {
        ApmContext::new(Arc::new(self.clone()))
    }

    pub fn spans(&self) -> Vec<SpanRecord> {
        self.state.lock().unwrap().spans.clone()
    }

    pub fn captured(&self) -> Vec<String> {
        self.state.lock().unwrap().captured.clone()
    }

    pub fn sent(&self) -> Vec<String> {
        self.state.lock().unwrap().sent.clone()
    }
}

fn address_of(span: &Arc<dyn ApmSpan>) -> usize {
    Arc::as_ptr(span) as *const () as usize
}

impl Tracer for RecordingTracer {
    fn start_span(
        &self,
        parent: Option<&Arc<dyn ApmSpan>>,
        name: &str,
        span_type: &str,
        options: SpanOptions,
    ) -> Arc<dyn ApmSpan> {
        let mut state = self.state.lock().unwrap();
        let id = state.spans.len();
        let parent = parent.and_then(|parent| {
            let address = address_of(parent);
            state.addresses.iter().position(|a| *a == address)
        });
        state.spans.push(SpanRecord {
            id,
            parent,
            name: name.to_string(),
            span_type: span_type.to_string(),
            exit: options.exit_span,
            dropped: self.sample_out,
            ..SpanRecord::default()
        });

        let span: Arc<dyn ApmSpan> = Arc::new(RecordingSpan {
            id,
            dropped: self.sample_out,
            state: self.state.clone(),
        });
        state.addresses.push(address_of(&span));
        span
    }

    fn capture_error(
        &self,
        parent: Option<&Arc<dyn ApmSpan>>,
        error: &DbErr,
    ) -> Option<ErrorReport> {
        self.state.lock().unwrap().captured.push(error.to_string());
        Some(ErrorReport {
            message: error.to_string(),
            detail: format!("{:?}", error),
            parent: parent.cloned(),
        })
    }

    fn send_error(&self, report: ErrorReport) {
        self.state.lock().unwrap().sent.push(report.message);
    }
}

#[derive(Debug)]
struct RecordingSpan {
    id: usize,
    dropped: bool,
    state: Arc<Mutex<State>>,
}

impl RecordingSpan {
    fn update(&self, f: impl FnOnce(&mut SpanRecord)) {
        let mut state = self.state.lock().unwrap();
        f(&mut state.spans[self.id]);
    }
}

impl ApmSpan for RecordingSpan {
    fn is_dropped(&self) -> bool {
        self.dropped
    }

    fn set_name(&self, name: &str) {
        self.update(|span| {
            span.name = name.to_string();
            span.renamed += 1;
        });
    }

    fn set_destination(&self, address: &str, port: u16) {
        self.update(|span| span.destination = Some((address.to_string(), port)));
    }

    fn set_database(&self, database: &DatabaseSpanContext) {
        self.update(|span| span.database = Some(database.clone()));
    }

    fn set_outcome(&self, outcome: Outcome) {
        self.update(|span| span.outcome = Some(outcome));
    }

    fn end(&self) {
        self.update(|span| span.ended += 1);
    }
}
