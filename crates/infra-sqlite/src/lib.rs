// Chunkline Infrastructure - SQLite Adapter
// Implements: ExecutionRepository, TransactionManager (chunk transactions)

mod connection;
mod context;
mod error;
mod execution_repository;
mod migration;
mod transaction;

pub use connection::create_pool;
pub use execution_repository::SqliteExecutionRepository;
pub use migration::run_migrations;
pub use transaction::SqliteStepTransaction;

// Note: sqlx::Error conversion is handled by map_sqlx_error in error.rs
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for BatchError here)
