pub mod pool;
pub mod runner;

pub use pool::{PoolMetrics, WorkerPool};
pub use runner::run_job;
