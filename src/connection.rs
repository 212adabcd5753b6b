//! Connection wrappers that run the hook chains around every statement.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{
    AccessMode, ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, DbErr,
    ExecResult, IsolationLevel, QueryResult, Statement, StreamTrait, TransactionError,
    TransactionTrait,
};
use tracing::{Instrument, Span};

use crate::callbacks;
use crate::context::{retrieve, ApmContext, CONTEXT_KEY};
use crate::hooks::{Callbacks, OperationKind, Phase, Scope, Value, Values};

/// Driver name SeaORM reports for a backend.
pub(crate) fn backend_driver_name(backend: DbBackend) -> &'static str {
    match backend {
        DbBackend::Postgres => "postgres",
        DbBackend::MySql => "mysql",
        DbBackend::Sqlite => "sqlite",
    }
}

/// State shared by a connection and the transactions begun from it.
#[derive(Debug, Clone)]
struct HookState {
    driver_name: Arc<str>,
    callbacks: Callbacks,
    values: Values,
}

impl HookState {
    /// Run `operation` between the before and after chains of `kind`.
    ///
    /// The database result is returned unchanged. If the returned future is
    /// dropped before `operation` completes, the after chain still runs, with
    /// the scope marked cancelled.
    async fn run<T, F>(&self, kind: OperationKind, sql: String, operation: F) -> Result<T, DbErr>
    where
        F: Future<Output = Result<T, DbErr>>,
    {
        let mut scope = Scope::new(kind, sql, self.values.clone());
        self.callbacks.run(Phase::Before, &mut scope);

        let span = retrieve(&scope)
            .and_then(|context| context.span().and_then(|span| span.tracing_span()))
            .unwrap_or_else(Span::none);
        let pending = PendingAfter {
            callbacks: &self.callbacks,
            kind,
            parts: Some(scope.into_parts()),
        };

        let result = operation.instrument(span).await;

        pending.complete(result.as_ref().err());
        result
    }
}

/// After chain owed to an operation whose before chain already ran.
struct PendingAfter<'h> {
    callbacks: &'h Callbacks,
    kind: OperationKind,
    parts: Option<(String, Values)>,
}

impl PendingAfter<'_> {
    fn complete(mut self, error: Option<&DbErr>) {
        if let Some((sql, values)) = self.parts.take() {
            let mut scope = Scope::new(self.kind, sql, values).with_error(error);
            self.callbacks.run(Phase::After, &mut scope);
        }
    }
}

impl Drop for PendingAfter<'_> {
    fn drop(&mut self) {
        if let Some((sql, values)) = self.parts.take() {
            let mut scope = Scope::new(self.kind, sql, values).cancelled();
            self.callbacks.run(Phase::After, &mut scope);
        }
    }
}

/// A SeaORM connection whose statements run through named hook chains.
///
/// This wrapper implements `ConnectionTrait`, `StreamTrait`, and `TransactionTrait`,
/// making it a drop-in replacement for `DatabaseConnection`. Every statement is
/// classified into an [`OperationKind`] and the matching `before` and `after`
/// hooks run around it.
///
/// Clones share the pool and the hook chains. [`with_context`](Self::with_context)
/// derives a handle whose operations carry an [`ApmContext`]; operations on a
/// handle without one are not traced.
///
/// # Transactions
///
/// `TransactionTrait::begin` and `TransactionTrait::transaction` hand out plain
/// SeaORM transactions: statements issued through them skip the hook chains
/// and report no spans, even on a handle carrying a context. Use
/// [`begin_hooked`](Self::begin_hooked) or
/// [`transaction_hooked`](Self::transaction_hooked) for traced transactions.
///
/// # Example
///
/// ```rust,ignore
/// use sea_orm_apm::{open, ApmContext};
///
/// let db = open("postgres", "postgres://localhost/mydb").await?;
///
/// // Spans are reported for operations issued through the derived handle
/// let traced = db.with_context(ApmContext::tracing());
/// let users = Users::find().all(&traced).await?;
/// ```
#[derive(Debug, Clone)]
pub struct HookedConnection {
    inner: Arc<DatabaseConnection>,
    hooks: HookState,
}

impl HookedConnection {
    /// Wrap a connection with empty hook chains.
    ///
    /// The driver name is derived from the connection's backend.
    pub fn new(connection: DatabaseConnection) -> Self {
        let driver_name = backend_driver_name(connection.get_database_backend());
        Self::with_driver(connection, driver_name)
    }

    /// Wrap a connection opened through the named driver.
    pub fn with_driver(connection: DatabaseConnection, driver_name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(connection),
            hooks: HookState {
                driver_name: Arc::from(driver_name.into()),
                callbacks: Callbacks::new(),
                values: Values::default(),
            },
        }
    }

    /// Get a reference to the underlying `DatabaseConnection`.
    pub fn inner(&self) -> &DatabaseConnection {
        &self.inner
    }

    /// Consume the wrapper and return the inner `DatabaseConnection`.
    ///
    /// Returns `None` while other handles derived from this one are alive.
    pub fn into_inner(self) -> Option<DatabaseConnection> {
        Arc::into_inner(self.inner)
    }

    pub fn driver_name(&self) -> &str {
        &self.hooks.driver_name
    }

    /// The hook chains shared by this handle and its clones.
    pub fn callbacks(&self) -> &Callbacks {
        &self.hooks.callbacks
    }

    /// Register span-reporting hooks. See [`register_callbacks`](crate::register_callbacks).
    pub fn register_callbacks(&self) {
        callbacks::register_callbacks(self);
    }

    /// Derive a handle whose operations carry `context`.
    pub fn with_context(&self, context: ApmContext) -> Self {
        self.with_value(CONTEXT_KEY, Arc::new(context))
    }

    /// The context carried by this handle's operations.
    pub fn context(&self) -> Option<ApmContext> {
        self.hooks
            .values
            .get(CONTEXT_KEY)
            .and_then(|value| (**value).downcast_ref::<ApmContext>())
            .cloned()
    }

    /// Derive a handle whose operation scopes start with `value` under `key`.
    pub fn with_value(&self, key: &'static str, value: Value) -> Self {
        let mut handle = self.clone();
        handle.hooks.values.set(key, value);
        handle
    }

    /// Begin a transaction whose statements run through the same hooks.
    pub async fn begin_hooked(&self) -> Result<HookedTransaction, DbErr> {
        let inner = self.inner.begin().await?;
        Ok(HookedTransaction {
            inner,
            hooks: self.hooks.clone(),
        })
    }

    /// Run `callback` inside a hooked transaction, committing on `Ok` and
    /// rolling back on `Err`.
    ///
    /// ```rust,ignore
    /// traced
    ///     .transaction_hooked(|txn| {
    ///         Box::pin(async move {
    ///             cake::Entity::insert(apple).exec(txn).await?;
    ///             Ok::<_, DbErr>(())
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn transaction_hooked<F, T, E>(&self, callback: F) -> Result<T, TransactionError<E>>
    where
        F: for<'c> FnOnce(
                &'c HookedTransaction,
            ) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'c>>
            + Send,
        T: Send,
        E: std::fmt::Display + std::fmt::Debug + Send,
    {
        let txn = self
            .begin_hooked()
            .await
            .map_err(TransactionError::Connection)?;
        let result = callback(&txn).await;
        match result {
            Ok(value) => {
                txn.commit().await.map_err(TransactionError::Connection)?;
                Ok(value)
            }
            Err(err) => {
                txn.rollback().await.map_err(TransactionError::Connection)?;
                Err(TransactionError::Transaction(err))
            }
        }
    }
}

impl From<DatabaseConnection> for HookedConnection {
    fn from(connection: DatabaseConnection) -> Self {
        Self::new(connection)
    }
}

impl AsRef<DatabaseConnection> for HookedConnection {
    fn as_ref(&self) -> &DatabaseConnection {
        &self.inner
    }
}

#[async_trait]
impl ConnectionTrait for HookedConnection {
    fn get_database_backend(&self) -> DbBackend {
        self.inner.get_database_backend()
    }

    async fn execute(&self, stmt: Statement) -> Result<ExecResult, DbErr> {
        let kind = OperationKind::classify(&stmt.sql);
        let sql = stmt.sql.clone();
        self.hooks.run(kind, sql, self.inner.execute(stmt)).await
    }

    async fn execute_unprepared(&self, sql: &str) -> Result<ExecResult, DbErr> {
        let kind = OperationKind::classify(sql);
        self.hooks
            .run(kind, sql.to_string(), self.inner.execute_unprepared(sql))
            .await
    }

    async fn query_one(&self, stmt: Statement) -> Result<Option<QueryResult>, DbErr> {
        let kind = OperationKind::classify(&stmt.sql);
        let sql = stmt.sql.clone();
        self.hooks.run(kind, sql, self.inner.query_one(stmt)).await
    }

    async fn query_all(&self, stmt: Statement) -> Result<Vec<QueryResult>, DbErr> {
        let kind = OperationKind::classify(&stmt.sql);
        let sql = stmt.sql.clone();
        self.hooks.run(kind, sql, self.inner.query_all(stmt)).await
    }

    fn support_returning(&self) -> bool {
        self.inner.support_returning()
    }

    fn is_mock_connection(&self) -> bool {
        self.inner.is_mock_connection()
    }
}

impl StreamTrait for HookedConnection {
    type Stream<'a> = <DatabaseConnection as StreamTrait>::Stream<'a>;

    /// Streams are raw row queries; the after hooks run once the stream is
    /// established, not when it is exhausted.
    fn stream<'a>(
        &'a self,
        stmt: Statement,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Stream<'a>, DbErr>> + 'a + Send>> {
        Box::pin(async move {
            let sql = stmt.sql.clone();
            let connection: &DatabaseConnection = &self.inner;
            self.hooks
                .run(OperationKind::RowQuery, sql, connection.stream(stmt))
                .await
        })
    }
}

/// Transactions begun through this trait run outside the hook chains; use
/// [`HookedConnection::begin_hooked`] or [`HookedConnection::transaction_hooked`]
/// for an instrumented transaction.
#[async_trait]
impl TransactionTrait for HookedConnection {
    async fn begin(&self) -> Result<DatabaseTransaction, DbErr> {
        self.inner.begin().await
    }

    async fn begin_with_config(
        &self,
        isolation_level: Option<IsolationLevel>,
        access_mode: Option<AccessMode>,
    ) -> Result<DatabaseTransaction, DbErr> {
        self.inner
            .begin_with_config(isolation_level, access_mode)
            .await
    }

    async fn transaction<F, T, E>(&self, callback: F) -> Result<T, TransactionError<E>>
    where
        F: for<'c> FnOnce(
                &'c DatabaseTransaction,
            ) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'c>>
            + Send,
        T: Send,
        E: std::fmt::Display + std::fmt::Debug + Send,
    {
        self.inner.transaction(callback).await
    }

    async fn transaction_with_config<F, T, E>(
        &self,
        callback: F,
        isolation_level: Option<IsolationLevel>,
        access_mode: Option<AccessMode>,
    ) -> Result<T, TransactionError<E>>
    where
        F: for<'c> FnOnce(
                &'c DatabaseTransaction,
            ) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'c>>
            + Send,
        T: Send,
        E: std::fmt::Display + std::fmt::Debug + Send,
    {
        self.inner
            .transaction_with_config(callback, isolation_level, access_mode)
            .await
    }
}

/// A transaction whose statements run through the hook chains of the
/// connection it was begun from, carrying that connection's context.
#[derive(Debug)]
pub struct HookedTransaction {
    inner: DatabaseTransaction,
    hooks: HookState,
}

impl HookedTransaction {
    pub async fn commit(self) -> Result<(), DbErr> {
        self.inner.commit().await
    }

    pub async fn rollback(self) -> Result<(), DbErr> {
        self.inner.rollback().await
    }

    pub fn inner(&self) -> &DatabaseTransaction {
        &self.inner
    }
}

#[async_trait]
impl ConnectionTrait for HookedTransaction {
    fn get_database_backend(&self) -> DbBackend {
        self.inner.get_database_backend()
    }

    async fn execute(&self, stmt: Statement) -> Result<ExecResult, DbErr> {
        let kind = OperationKind::classify(&stmt.sql);
        let sql = stmt.sql.clone();
        self.hooks.run(kind, sql, self.inner.execute(stmt)).await
    }

    async fn execute_unprepared(&self, sql: &str) -> Result<ExecResult, DbErr> {
        let kind = OperationKind::classify(sql);
        self.hooks
            .run(kind, sql.to_string(), self.inner.execute_unprepared(sql))
            .await
    }

    async fn query_one(&self, stmt: Statement) -> Result<Option<QueryResult>, DbErr> {
        let kind = OperationKind::classify(&stmt.sql);
        let sql = stmt.sql.clone();
        self.hooks.run(kind, sql, self.inner.query_one(stmt)).await
    }

    async fn query_all(&self, stmt: Statement) -> Result<Vec<QueryResult>, DbErr> {
        let kind = OperationKind::classify(&stmt.sql);
        let sql = stmt.sql.clone();
        self.hooks.run(kind, sql, self.inner.query_all(stmt)).await
    }

    fn support_returning(&self) -> bool {
        self.inner.support_returning()
    }

    fn is_mock_connection(&self) -> bool {
        self.inner.is_mock_connection()
    }
}

impl StreamTrait for HookedTransaction {
    type Stream<'a> = <DatabaseTransaction as StreamTrait>::Stream<'a>;

    fn stream<'a>(
        &'a self,
        stmt: Statement,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Stream<'a>, DbErr>> + 'a + Send>> {
        Box::pin(async move {
            let sql = stmt.sql.clone();
            self.hooks
                .run(OperationKind::RowQuery, sql, self.inner.stream(stmt))
                .await
        })
    }
}

/// Extension trait for easy wrapping of database connections.
pub trait TracingExt {
    /// Wrap this connection and register span-reporting hooks.
    fn with_apm(self) -> HookedConnection;

    /// Wrap this connection without registering any hooks.
    fn hooked(self) -> HookedConnection;
}

impl TracingExt for DatabaseConnection {
    fn with_apm(self) -> HookedConnection {
        let handle = HookedConnection::new(self);
        handle.register_callbacks();
        handle
    }

    fn hooked(self) -> HookedConnection {
        HookedConnection::new(self)
    }
}
