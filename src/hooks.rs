//! Named hook chains run around every statement a [`HookedConnection`] executes.
//!
//! SeaORM has no callback registry of its own, so this module provides the
//! extension point: for each [`OperationKind`] there is a `before` chain and an
//! `after` chain of named hooks. Every hook receives the operation's [`Scope`].
//!
//! [`HookedConnection`]: crate::HookedConnection

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use sea_orm::DbErr;

use crate::signature::{parse_operation, SqlOperation};

/// The kind of ORM operation a statement belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Create,
    Delete,
    Query,
    Update,
    /// Raw row queries: streamed reads and statements outside plain CRUD.
    RowQuery,
}

impl OperationKind {
    pub const ALL: [OperationKind; 5] = [
        OperationKind::Create,
        OperationKind::Delete,
        OperationKind::Query,
        OperationKind::Update,
        OperationKind::RowQuery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Delete => "delete",
            OperationKind::Query => "query",
            OperationKind::Update => "update",
            OperationKind::RowQuery => "row_query",
        }
    }

    /// Whether the operation modifies rows.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            OperationKind::Create | OperationKind::Delete | OperationKind::Update
        )
    }

    /// Span sub-type: `exec` for mutating kinds, `query` for reads.
    pub fn span_subtype(&self) -> &'static str {
        if self.is_mutating() {
            "exec"
        } else {
            "query"
        }
    }

    /// Classify a statement by its leading keyword.
    pub fn classify(sql: &str) -> Self {
        match parse_operation(sql) {
            SqlOperation::Select => OperationKind::Query,
            SqlOperation::Insert | SqlOperation::Replace => OperationKind::Create,
            SqlOperation::Update => OperationKind::Update,
            SqlOperation::Delete => OperationKind::Delete,
            SqlOperation::Call | SqlOperation::Other => OperationKind::RowQuery,
        }
    }

    fn index(&self) -> usize {
        match self {
            OperationKind::Create => 0,
            OperationKind::Delete => 1,
            OperationKind::Query => 2,
            OperationKind::Update => 3,
            OperationKind::RowQuery => 4,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle point at which a hook runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Before,
    After,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Before => "before",
            Phase::After => "after",
        }
    }
}

/// A value stored in a handle's or scope's key/value store.
pub type Value = Arc<dyn Any + Send + Sync>;

/// Untyped per-call key/value store.
///
/// A handle owns one of these; every operation gets its own copy inside its
/// [`Scope`], so writes made by hooks never leak into other operations.
#[derive(Clone, Default)]
pub struct Values {
    entries: HashMap<&'static str, Value>,
}

impl Values {
    pub fn set(&mut self, key: &'static str, value: Value) {
        self.entries.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

impl fmt::Debug for Values {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

/// Mutable state of one in-flight operation, handed to every hook.
#[derive(Debug)]
pub struct Scope<'e> {
    kind: OperationKind,
    sql: String,
    values: Values,
    error: Option<&'e DbErr>,
    cancelled: bool,
}

impl<'e> Scope<'e> {
    pub(crate) fn new(kind: OperationKind, sql: String, values: Values) -> Self {
        Self {
            kind,
            sql,
            values,
            error: None,
            cancelled: false,
        }
    }

    /// Carry this scope into the after phase with the statement's error.
    pub(crate) fn with_error<'r>(self, error: Option<&'r DbErr>) -> Scope<'r> {
        Scope {
            kind: self.kind,
            sql: self.sql,
            values: self.values,
            error,
            cancelled: self.cancelled,
        }
    }

    /// Carry this scope into the after phase of an operation dropped before
    /// the database answered.
    pub(crate) fn cancelled(mut self) -> Self {
        self.cancelled = true;
        self
    }

    pub(crate) fn into_parts(self) -> (String, Values) {
        (self.sql, self.values)
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// The rendered SQL text of the statement, with placeholders.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// The error the statement produced. Only ever set during the after phase.
    pub fn error(&self) -> Option<&DbErr> {
        self.error
    }

    /// Whether the operation was abandoned before it completed, e.g. by a
    /// timeout. Only ever set during the after phase, and never together
    /// with [`error`](Self::error).
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn set(&mut self, key: &'static str, value: Value) {
        self.values.set(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }
}

/// A hook invoked with the operation's scope.
pub type Hook = Arc<dyn Fn(&mut Scope<'_>) + Send + Sync>;

#[derive(Clone, Default)]
struct Chain {
    hooks: Vec<(String, Hook)>,
}

impl Chain {
    fn register(&mut self, name: String, hook: Hook) -> bool {
        match self.hooks.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => {
                slot.1 = hook;
                true
            }
            None => {
                self.hooks.push((name, hook));
                false
            }
        }
    }
}

#[derive(Default)]
struct Registry {
    before: [Chain; 5],
    after: [Chain; 5],
}

impl Registry {
    fn chain(&self, kind: OperationKind, phase: Phase) -> &Chain {
        match phase {
            Phase::Before => &self.before[kind.index()],
            Phase::After => &self.after[kind.index()],
        }
    }

    fn chain_mut(&mut self, kind: OperationKind, phase: Phase) -> &mut Chain {
        match phase {
            Phase::Before => &mut self.before[kind.index()],
            Phase::After => &mut self.after[kind.index()],
        }
    }
}

/// Hook chains for every operation kind and phase.
///
/// Cloning is cheap and clones share the same chains, so hooks registered on
/// one handle are seen by every handle derived from it.
#[derive(Clone, Default)]
pub struct Callbacks {
    registry: Arc<RwLock<Registry>>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `hook` under `name`.
    ///
    /// A hook already registered under the same name for this kind and phase
    /// is replaced in place; hooks are never duplicated.
    pub fn register<F>(&self, kind: OperationKind, phase: Phase, name: impl Into<String>, hook: F)
    where
        F: Fn(&mut Scope<'_>) + Send + Sync + 'static,
    {
        let name = name.into();
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        let replaced = registry
            .chain_mut(kind, phase)
            .register(name.clone(), Arc::new(hook));
        tracing::trace!(
            target: "sea_orm_apm",
            operation = %kind,
            phase = phase.as_str(),
            hook = %name,
            replaced,
            "Registered hook"
        );
    }

    /// Names of the hooks in a chain, in execution order.
    pub fn names(&self, kind: OperationKind, phase: Phase) -> Vec<String> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry
            .chain(kind, phase)
            .hooks
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn len(&self, kind: OperationKind, phase: Phase) -> usize {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry.chain(kind, phase).hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry
            .before
            .iter()
            .chain(registry.after.iter())
            .all(|chain| chain.hooks.is_empty())
    }

    /// Run every hook of a chain against `scope`.
    ///
    /// The chain is snapshotted first so hooks may register further hooks
    /// without deadlocking.
    pub(crate) fn run(&self, phase: Phase, scope: &mut Scope<'_>) {
        let hooks: Vec<Hook> = {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            registry
                .chain(scope.kind(), phase)
                .hooks
                .iter()
                .map(|(_, hook)| hook.clone())
                .collect()
        };
        for hook in hooks {
            hook(scope);
        }
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for kind in OperationKind::ALL {
            map.entry(
                &kind.as_str(),
                &(self.names(kind, Phase::Before), self.names(kind, Phase::After)),
            );
        }
        map.finish()
    }
}
