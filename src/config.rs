//! Configuration for opening instrumented connections and for the default tracer.

use std::collections::BTreeSet;
use std::time::Duration;

use log::LevelFilter;
use sea_orm::ConnectOptions;

use crate::error::Error;

/// Pool and dialect policy applied by [`open_with_config`](crate::open_with_config).
///
/// # Example
///
/// ```rust
/// use sea_orm_apm::OpenConfig;
/// use std::time::Duration;
///
/// let config = OpenConfig::default()
///     .with_max_open_connections(20)
///     .with_max_connection_lifetime(Duration::from_secs(300));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct OpenConfig {
    /// Upper bound on pooled connections.
    /// Default: 100
    pub max_open_connections: u32,

    /// Upper bound on idle connections, clamped to `max_open_connections`.
    /// Default: 100
    ///
    /// SQLx pools keep idle connections up to `max_open_connections` and have
    /// no separate idle cap, so this value is logged only.
    pub max_idle_connections: u32,

    /// Connections older than this are closed and replaced.
    /// Default: 60s
    pub max_connection_lifetime: Duration,

    /// Timeout for establishing a single connection.
    /// Default: 10s
    pub connect_timeout: Duration,

    /// Driver names [`open`](crate::open) accepts.
    /// Default: `postgres`, `postgresql`, `mysql`, `sqlite`
    pub supported_dialects: BTreeSet<String>,

    /// Whether the SQLx driver logs every statement.
    /// Default: `true`
    pub statement_logging: bool,

    /// Level of the driver's per-statement log.
    /// Default: `Info`
    pub statement_log_level: LevelFilter,

    /// Statements slower than this are logged by the driver at WARN.
    /// Default: 1s
    pub slow_statement_threshold: Duration,

    /// Defer dialing until the first statement or the opening ping.
    /// Default: `false`
    pub lazy_connect: bool,
}

impl Default for OpenConfig {
    fn default() -> Self {
        Self {
            max_open_connections: 100,
            max_idle_connections: 100,
            max_connection_lifetime: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            supported_dialects: ["postgres", "postgresql", "mysql", "sqlite"]
                .into_iter()
                .map(String::from)
                .collect(),
            statement_logging: true,
            statement_log_level: LevelFilter::Info,
            slow_statement_threshold: Duration::from_secs(1),
            lazy_connect: false,
        }
    }
}

impl OpenConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pool size. The idle bound is lowered to match when it exceeds it.
    pub fn with_max_open_connections(mut self, max: u32) -> Self {
        self.max_open_connections = max;
        self.max_idle_connections = self.max_idle_connections.min(max);
        self
    }

    pub fn with_max_idle_connections(mut self, max: u32) -> Self {
        self.max_idle_connections = max;
        self
    }

    pub fn with_max_connection_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_connection_lifetime = lifetime;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Replace the set of accepted driver names.
    pub fn with_supported_dialects<I, S>(mut self, dialects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_dialects = dialects.into_iter().map(Into::into).collect();
        self
    }

    /// Enable or disable SQLx statement logging.
    pub fn with_statement_logging(mut self, enabled: bool) -> Self {
        self.statement_logging = enabled;
        self
    }

    pub fn with_statement_log_level(mut self, level: LevelFilter) -> Self {
        self.statement_log_level = level;
        self
    }

    pub fn with_slow_statement_threshold(mut self, threshold: Duration) -> Self {
        self.slow_statement_threshold = threshold;
        self
    }

    pub fn with_lazy_connect(mut self, lazy: bool) -> Self {
        self.lazy_connect = lazy;
        self
    }

    /// The idle bound actually in effect.
    pub fn effective_max_idle_connections(&self) -> u32 {
        self.max_idle_connections.min(self.max_open_connections)
    }

    /// Whether `driver` is an accepted driver name.
    pub fn supports(&self, driver: &str) -> bool {
        self.supported_dialects.contains(driver)
    }

    /// Check the pool limits are coherent.
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_open_connections == 0 {
            return Err(Error::InvalidConfig(
                "max_open_connections must be greater than zero".into(),
            ));
        }
        if self.max_connection_lifetime.is_zero() {
            return Err(Error::InvalidConfig(
                "max_connection_lifetime must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Build SeaORM connect options for `dsn` with this pool policy.
    pub(crate) fn connect_options(&self, dsn: &str) -> ConnectOptions {
        let mut options = ConnectOptions::new(dsn);
        options
            .max_connections(self.max_open_connections)
            .max_lifetime(self.max_connection_lifetime)
            .connect_timeout(self.connect_timeout)
            .sqlx_logging(self.statement_logging)
            .sqlx_logging_level(self.statement_log_level)
            .sqlx_slow_statements_logging_settings(
                LevelFilter::Warn,
                self.slow_statement_threshold,
            )
            .connect_lazy(self.lazy_connect);
        options
    }
}

/// Configuration for [`TracingTracer`](crate::TracingTracer).
///
/// # Example
///
/// ```rust
/// use sea_orm_apm::TracerConfig;
/// use std::time::Duration;
///
/// let config = TracerConfig::default()
///     .with_statement_recording(false)
///     .with_slow_query_threshold(Duration::from_millis(100));
/// ```
#[derive(Debug, Clone)]
pub struct TracerConfig {
    /// Whether to record the SQL statement as `db.statement`.
    /// Default: `true`
    pub record_statements: bool,

    /// Spans lasting longer than this are flagged `slow_query` and logged at WARN.
    /// Default: 500ms
    pub slow_query_threshold: Duration,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            record_statements: true,
            slow_query_threshold: Duration::from_millis(500),
        }
    }
}

impl TracerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable recording of SQL statements on spans.
    ///
    /// **Security Warning**: statements built by hand may carry literal values,
    /// which then end up in your traces.
    pub fn with_statement_recording(mut self, enabled: bool) -> Self {
        self.record_statements = enabled;
        self
    }

    pub fn with_slow_query_threshold(mut self, threshold: Duration) -> Self {
        self.slow_query_threshold = threshold;
        self
    }

    /// Everything recorded, low slow-query threshold.
    pub fn development() -> Self {
        Self {
            record_statements: true,
            slow_query_threshold: Duration::from_millis(100),
        }
    }

    /// No statements recorded, 1s slow-query threshold.
    pub fn production() -> Self {
        Self {
            record_statements: false,
            slow_query_threshold: Duration::from_secs(1),
        }
    }
}
