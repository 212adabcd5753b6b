//! Basic example showing how to use sea-orm-apm.
//!
//! Run with: cargo run --example basic

use sea_orm::{ConnectionTrait, Statement};
use sea_orm_apm::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,sea_orm_apm=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/test".into());

    tracing::info!("Connecting to database...");

    // Option 1: open a pool with the default policy and callbacks registered
    let db = open("postgres", database_url.as_str()).await?;

    // Option 2: wrap an existing connection
    // let db = Database::connect(&database_url).await?.with_apm();

    // Option 3: custom pool policy
    // let db = open_with_config(
    //     "postgres",
    //     database_url.as_str(),
    //     &OpenConfig::default().with_max_open_connections(20),
    // )
    // .await?;

    // Operations are only traced through a handle carrying a context
    let request = tracing::info_span!("request", path = "/health");
    let _entered = request.enter();
    let traced = db.with_context(ApmContext::tracing());

    let backend = traced.get_database_backend();
    traced
        .query_one(Statement::from_string(backend, "SELECT 1"))
        .await?;

    tracing::info!("Health check query traced");

    Ok(())
}
