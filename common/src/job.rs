use std::{fmt, future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{GridError, Result};
use crate::session::Session;
use crate::task::TaskId;

pub type JobId = String;

/* --------- Resultado de un job --------- */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobOutcome {
    Success { data: Value },
    Failure { cause: String },
    /// El job fue interrumpido antes de terminar.
    Cancelled,
}

/// Registro inmutable que produce el runner al terminar cada job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub task_id: TaskId,
    pub outcome: JobOutcome,
}

impl JobResult {
    pub fn success(task_id: impl Into<TaskId>, job_id: impl Into<JobId>, data: Value) -> Self {
        Self {
            job_id: job_id.into(),
            task_id: task_id.into(),
            outcome: JobOutcome::Success { data },
        }
    }

    pub fn failure(
        task_id: impl Into<TaskId>,
        job_id: impl Into<JobId>,
        cause: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            task_id: task_id.into(),
            outcome: JobOutcome::Failure {
                cause: cause.into(),
            },
        }
    }

    pub fn cancelled(task_id: impl Into<TaskId>, job_id: impl Into<JobId>) -> Self {
        Self {
            job_id: job_id.into(),
            task_id: task_id.into(),
            outcome: JobOutcome::Cancelled,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, JobOutcome::Success { .. })
    }

    pub fn data(&self) -> Option<&Value> {
        match &self.outcome {
            JobOutcome::Success { data } => Some(data),
            _ => None,
        }
    }

    /// Error que este resultado lleva consigo, si no fue exitoso.
    pub fn error(&self) -> Option<GridError> {
        match &self.outcome {
            JobOutcome::Success { .. } => None,
            JobOutcome::Failure { cause } => Some(GridError::JobFailed {
                job_id: self.job_id.clone(),
                cause: cause.clone(),
            }),
            JobOutcome::Cancelled => Some(GridError::Cancelled),
        }
    }
}

/* --------- Lógica de los jobs --------- */

/// Lógica ejecutable de un job. Un `Err` marca el job como fallido;
/// el runner nunca deja escapar el error.
#[async_trait]
pub trait ComputeJob: Send + Sync {
    async fn execute(&self, ctx: JobContext) -> anyhow::Result<Value>;
}

/// Adaptador para usar un closure async como job.
pub struct FnJob<F>(F);

#[async_trait]
impl<F, Fut> ComputeJob for FnJob<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn execute(&self, ctx: JobContext) -> anyhow::Result<Value> {
        (self.0)(ctx).await
    }
}

/// Una sub-unidad paralela de una tarea.
#[derive(Clone)]
pub struct Job {
    pub id: JobId,
    pub argument: Value,
    pub logic: Arc<dyn ComputeJob>,
}

impl Job {
    pub fn new(argument: impl Into<Value>, logic: impl ComputeJob + 'static) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            argument: argument.into(),
            logic: Arc::new(logic),
        }
    }

    pub fn from_fn<F, Fut>(argument: impl Into<Value>, f: F) -> Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self::new(argument, FnJob(f))
    }

    pub fn with_id(mut self, id: impl Into<JobId>) -> Self {
        self.id = id.into();
        self
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("argument", &self.argument)
            .finish_non_exhaustive()
    }
}

/* --------- Contexto de ejecución --------- */

/// Lo que ve un job mientras corre: su argumento, la sesión de su tarea
/// y la señal de interrupción.
#[derive(Clone)]
pub struct JobContext {
    task_id: TaskId,
    job_id: JobId,
    argument: Value,
    session: Arc<Session>,
    cancel: CancellationToken,
}

impl JobContext {
    pub fn new(
        task_id: TaskId,
        job_id: JobId,
        argument: Value,
        session: Arc<Session>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            task_id,
            job_id,
            argument,
            session,
            cancel,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn argument(&self) -> &Value {
        &self.argument
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn session_get(&self, key: &str) -> Option<Value> {
        self.session.get(key)
    }

    pub fn session_set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.session.set(key, value);
    }

    pub async fn wait_attribute(&self, key: &str, timeout: Duration) -> Result<Value> {
        self.session.wait(key, timeout).await
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Se completa cuando se pide interrumpir el job.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn job_result_convierte_fallos_en_errores() {
        let ok = JobResult::success("t1", "j1", json!(1));
        let failed = JobResult::failure("t1", "j2", "boom");
        let cancelled = JobResult::cancelled("t1", "j3");

        assert!(ok.is_success());
        assert_eq!(ok.data(), Some(&json!(1)));
        assert_eq!(ok.error(), None);

        assert_eq!(
            failed.error(),
            Some(GridError::JobFailed {
                job_id: "j2".into(),
                cause: "boom".into()
            })
        );
        assert_eq!(cancelled.error(), Some(GridError::Cancelled));
        assert_eq!(cancelled.data(), None);
    }

    #[test]
    fn job_outcome_se_serializa_con_status() {
        let res = JobResult::success("t1", "j1", json!(7));
        let v = serde_json::to_value(&res).unwrap();

        assert_eq!(v["outcome"]["status"], json!("SUCCESS"));
        assert_eq!(v["outcome"]["data"], json!(7));
    }

    #[tokio::test]
    async fn job_desde_closure_usa_la_sesion_del_contexto() {
        let session = Arc::new(Session::new("t1".to_string()));
        let job = Job::from_fn(json!(3), |ctx: JobContext| async move {
            let n = ctx.argument().as_i64().unwrap_or_default();
            ctx.session_set("doble", n * 2);
            Ok(json!(n + 1))
        })
        .with_id("j1");

        let ctx = JobContext::new(
            "t1".into(),
            job.id.clone(),
            job.argument.clone(),
            session.clone(),
            CancellationToken::new(),
        );

        let out = job.logic.execute(ctx).await.unwrap();

        assert_eq!(out, json!(4));
        assert_eq!(session.get("doble"), Some(json!(6)));
        assert_eq!(format!("{job:?}"), "Job { id: \"j1\", argument: Number(3), .. }");
    }
}
