//! Common library for the realtime messaging backend
//!
//! This crate provides shared infrastructure used across the services:
//! PostgreSQL connectivity, schema migrations and the database error type.

pub mod database;
pub mod error;

/// Example usage of the database module
///
/// ```rust,no_run
/// use common::database::{DatabaseConfig, health_check, init_pool, run_migrations};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = DatabaseConfig::from_env()?;
///     let pool = init_pool(&config).await?;
///     run_migrations(&pool).await?;
///     println!("Database health check: {}", health_check(&pool).await?);
///     Ok(())
/// }
/// ```
pub use database::{DatabaseConfig, health_check, init_pool, run_migrations};
pub use error::{DatabaseError, DatabaseResult};
