/// PostgreSQL persistence implementations for the orchestration layer.
///
/// This module provides `PostgresBackend`, a PostgreSQL-backed
/// implementation of the broker, job registry, result store, and worker
/// directory traits for durable multi-process orchestration.
pub mod postgres;

pub use postgres::PostgresBackend;
