/// Builder for constructing worker pools.
pub mod builder;
/// Per-worker configuration.
pub mod config;
/// Worker pool and job execution loops.
pub mod pool;

pub use builder::WorkerPoolBuilder;
pub use config::WorkerConfig;
pub use pool::{ShutdownToken, WorkerPool};
