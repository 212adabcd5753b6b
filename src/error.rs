//! Errors returned when opening an instrumented connection.
//!
//! Errors from individual database operations are never wrapped: they reach
//! the caller as the `DbErr` the driver produced.

use sea_orm::{DbBackend, DbErr};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The driver name is not one the opener accepts.
    #[error("unsupported dialect: {0}")]
    UnsupportedDialect(String),

    /// The pool configuration is incoherent.
    #[error("invalid connection configuration: {0}")]
    InvalidConfig(String),

    /// Establishing the pool failed.
    #[error("failed to connect using the {driver} driver")]
    Connect {
        driver: String,
        #[source]
        source: DbErr,
    },

    /// The pool was created but the database did not answer a ping.
    #[error("database behind the {driver} driver is unreachable")]
    Ping {
        driver: String,
        #[source]
        source: DbErr,
    },

    /// The connection string selected a different backend than the driver name.
    #[error("driver {driver} does not match the {backend:?} backend of the connection")]
    DialectMismatch { driver: String, backend: DbBackend },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
