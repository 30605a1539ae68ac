pub mod aggregator;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod future;
pub mod job;
pub mod policy;
pub mod session;
pub mod task;

pub use aggregator::{AggregatorState, Delivery, Reducer, ResultAggregator};
pub use config::GridConfig;
pub use dispatch::JobDispatcher;
pub use error::{cause_of, panic_message, GridError, Result};
pub use future::{TaskFuture, TaskState};
pub use job::{ComputeJob, FnJob, Job, JobContext, JobId, JobOutcome, JobResult};
pub use policy::{PolicyDecision, Quorum, ResultPolicy, TolerateFailures, WaitForAll};
pub use session::Session;
pub use task::{ComputeTask, TaskId, TaskInfo, TaskPhase};
