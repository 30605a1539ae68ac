use async_trait::async_trait;

use crate::job::{Job, JobContext, JobResult};

/// Envío de un job a ejecución, local o remota. Siempre devuelve
/// exactamente un `JobResult`, aunque el job falle o se cancele.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(&self, job: Job, ctx: JobContext) -> JobResult;
}
