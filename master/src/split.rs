use std::{
    collections::HashSet,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use grid_common::{cause_of, panic_message, ComputeTask, GridError, Job, Result, Session};
use serde_json::Value;
use tracing::{info, warn};

/// Jobs de una tarea ya dividida, atados a una sesión nueva.
pub struct SplitPlan {
    pub session: Arc<Session>,
    pub jobs: Vec<Job>,
}

/// Divide la tarea en jobs. No arranca ninguno.
///
/// - error o panic dentro de `split` → `SplitFailed`
/// - cero jobs → `EmptySplit`
/// - ids de job repetidos → `SplitFailed`
pub fn split_task(task: &dyn ComputeTask, task_id: &str, argument: &Value) -> Result<SplitPlan> {
    info!(task_id, task = task.name(), %argument, "dividiendo tarea");

    let jobs = match panic::catch_unwind(AssertUnwindSafe(|| task.split(argument))) {
        Ok(Ok(jobs)) => jobs,
        Ok(Err(e)) => {
            return Err(GridError::SplitFailed {
                cause: cause_of(&e),
            })
        }
        Err(payload) => {
            return Err(GridError::SplitFailed {
                cause: format!("panic durante la división: {}", panic_message(payload.as_ref())),
            })
        }
    };

    if jobs.is_empty() {
        warn!(task_id, "la división no produjo jobs");
        return Err(GridError::EmptySplit);
    }

    let mut seen = HashSet::new();
    for job in &jobs {
        if !seen.insert(job.id.as_str()) {
            return Err(GridError::SplitFailed {
                cause: format!("id de job duplicado: {}", job.id),
            });
        }
    }

    Ok(SplitPlan {
        session: Arc::new(Session::new(task_id.to_string())),
        jobs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_common::{JobContext, JobResult};
    use serde_json::json;

    struct Splitter<F>(F);

    impl<F> ComputeTask for Splitter<F>
    where
        F: Fn(&Value) -> anyhow::Result<Vec<Job>> + Send + Sync,
    {
        fn split(&self, argument: &Value) -> anyhow::Result<Vec<Job>> {
            (self.0)(argument)
        }

        fn reduce(&self, _results: &[JobResult]) -> anyhow::Result<Value> {
            Ok(Value::Null)
        }
    }

    fn splitter<F>(f: F) -> Splitter<F>
    where
        F: Fn(&Value) -> anyhow::Result<Vec<Job>> + Send + Sync,
    {
        Splitter(f)
    }

    fn noop_job(i: i64) -> Job {
        Job::from_fn(json!(i), |_ctx: JobContext| async move { Ok(json!(1)) })
    }

    #[test]
    fn divide_en_jobs_con_sesion_nueva() {
        let task = splitter(|arg| {
            let n = arg.as_i64().unwrap_or_default();
            Ok((1..=n).map(noop_job).collect())
        });

        let plan = split_task(&task, "t1", &json!(3)).unwrap();

        assert_eq!(plan.jobs.len(), 3);
        assert_eq!(plan.session.task_id(), "t1");
        assert!(plan.session.attributes().is_empty());
    }

    #[test]
    fn cero_jobs_es_empty_split() {
        let task = splitter(|_| Ok(Vec::new()));

        let err = split_task(&task, "t1", &json!(null)).err().unwrap();

        assert_eq!(err, GridError::EmptySplit);
    }

    #[test]
    fn error_al_dividir_es_split_failed() {
        let task = splitter(|_| anyhow::bail!("argumento inválido"));

        let err = split_task(&task, "t1", &json!(null)).err().unwrap();

        assert_eq!(
            err,
            GridError::SplitFailed {
                cause: "argumento inválido".into()
            }
        );
    }

    #[test]
    fn panic_al_dividir_es_split_failed() {
        let task = splitter(|_| panic!("sin memoria"));

        let err = split_task(&task, "t1", &json!(null)).err().unwrap();

        assert!(matches!(err, GridError::SplitFailed { cause } if cause.contains("sin memoria")));
    }

    #[test]
    fn ids_duplicados_se_rechazan() {
        let task = splitter(|_| {
            Ok(vec![noop_job(1).with_id("j"), noop_job(2).with_id("j")])
        });

        let err = split_task(&task, "t1", &json!(null)).err().unwrap();

        assert!(matches!(err, GridError::SplitFailed { cause } if cause.contains("duplicado")));
    }
}
