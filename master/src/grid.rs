//! Punto de entrada para enviar tareas.
//!
//! `submit` divide la tarea, crea su sesión, despacha los jobs y devuelve
//! enseguida un `TaskFuture`. Un coordinador por tarea (una tarea de tokio)
//! recibe los resultados de los jobs, los pasa al agregador y resuelve el
//! future cuando el agregador llega a un estado terminal.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use grid_common::{
    panic_message, ComputeTask, Delivery, GridConfig, GridError, Job, JobContext, JobDispatcher,
    JobResult, Result, ResultAggregator, Session, TaskFuture, TaskId, TaskInfo, TaskPhase,
    TaskState,
};
use grid_worker::WorkerPool;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::split::split_task;

type ActiveTasks = Arc<Mutex<HashMap<TaskId, Arc<TaskState>>>>;

#[derive(Clone)]
pub struct Grid {
    config: GridConfig,
    dispatcher: Arc<dyn JobDispatcher>,
    // tareas que todavía no se resolvieron
    active: ActiveTasks,
}

impl Grid {
    pub fn new(config: GridConfig, dispatcher: Arc<dyn JobDispatcher>) -> Self {
        Self {
            config,
            dispatcher,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Grid que ejecuta los jobs en un pool local.
    pub fn local(config: GridConfig) -> Self {
        let pool = Arc::new(WorkerPool::new(config.job_concurrency));
        Self::new(config, pool)
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    /// Envía una tarea. Debe llamarse dentro de un runtime de tokio.
    ///
    /// Si la división falla el future vuelve ya resuelto con
    /// `EmptySplit` / `SplitFailed` y no se ejecuta ningún job.
    pub fn submit<T>(&self, task: Arc<T>, argument: impl Into<Value>) -> TaskFuture
    where
        T: ComputeTask + 'static,
    {
        let task: Arc<dyn ComputeTask> = task;
        let argument = argument.into();
        let task_id = uuid::Uuid::new_v4().to_string();
        let info = TaskInfo::new(task_id.clone(), task.name());

        let plan = match split_task(task.as_ref(), &task_id, &argument) {
            Ok(plan) => plan,
            Err(err) => {
                warn!(%task_id, error = %err, "la tarea falló al dividirse");
                let state = TaskState::new(info, Arc::new(Session::new(task_id)));
                state.resolve(Err(err));
                return state.future();
            }
        };

        let state = TaskState::new(info, plan.session.clone());
        state.set_total_jobs(plan.jobs.len());
        state.set_phase(TaskPhase::Running);

        let reducer_task = task.clone();
        let aggregator = ResultAggregator::new(
            task_id.clone(),
            plan.jobs.iter().map(|j| j.id.clone()),
            task.policy(),
            Box::new(move |results: &[JobResult]| reducer_task.reduce(results)),
        );

        lock(&self.active).insert(task_id.clone(), state.clone());
        info!(%task_id, jobs = plan.jobs.len(), "tarea en ejecución");

        tokio::spawn(drive(
            state.clone(),
            plan.jobs,
            aggregator,
            self.dispatcher.clone(),
            self.active.clone(),
        ));

        state.future()
    }

    /// Snapshot de las tareas que siguen en curso.
    pub fn active_tasks(&self) -> Vec<TaskInfo> {
        lock(&self.active).values().map(|s| s.info()).collect()
    }

    pub fn task(&self, id: &str) -> Option<TaskFuture> {
        lock(&self.active).get(id).map(|s| s.future())
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Coordinador de una tarea: despacha los jobs y alimenta al agregador.
async fn drive(
    state: Arc<TaskState>,
    jobs: Vec<Job>,
    aggregator: ResultAggregator,
    dispatcher: Arc<dyn JobDispatcher>,
    active: ActiveTasks,
) {
    let task_id = state.info().id;
    let token = state.cancellation().clone();
    let session = state.session().clone();

    let (tx, mut rx) = mpsc::channel::<JobResult>(jobs.len().max(1));

    for job in jobs {
        let ctx = JobContext::new(
            task_id.clone(),
            job.id.clone(),
            job.argument.clone(),
            session.clone(),
            token.child_token(),
        );
        let dispatcher = dispatcher.clone();
        let tx = tx.clone();
        let (job_task, job_id) = (task_id.clone(), job.id.clone());

        tokio::spawn(async move {
            // un panic del dispatcher también tiene que llegar como resultado
            let joined = tokio::spawn(async move { dispatcher.dispatch(job, ctx).await }).await;
            let result = match joined {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => JobResult::cancelled(job_task, job_id),
                Err(e) => JobResult::failure(
                    job_task,
                    job_id,
                    format!("panic al despachar el job: {}", panic_message(e.into_panic().as_ref())),
                ),
            };
            let _ = tx.send(result).await;
        });
    }
    drop(tx);

    let mut resolved = false;

    loop {
        tokio::select! {
            _ = token.cancelled(), if !resolved => {
                aggregator.fail(GridError::Cancelled);
                finish(&state, &active, &task_id, Err(GridError::Cancelled));
                resolved = true;
            }
            received = rx.recv() => {
                // todos los jobs reportaron
                let Some(result) = received else { break };

                state.record_result(&result);

                let outcome = match aggregator.on_result(result) {
                    Delivery::Collecting | Delivery::Ignored => continue,
                    Delivery::Reduce => {
                        state.set_phase(TaskPhase::Reducing);
                        aggregator.reduce()
                    }
                    Delivery::Failed(err) => Err(err),
                };

                finish(&state, &active, &task_id, outcome);
                resolved = true;

                // los jobs que sigan corriendo ya no aportan al resultado
                token.cancel();
            }
        }
    }

    if !resolved {
        let missing = aggregator.missing_jobs();
        let outcome = match missing.first() {
            Some(job_id) => {
                // nunca se reduce con resultados perdidos
                let err = GridError::JobFailed {
                    job_id: job_id.clone(),
                    cause: format!("{} job(s) sin resultado: {}", missing.len(), missing.join(", ")),
                };
                aggregator.fail(err.clone());
                Err(err)
            }
            None => {
                // la política nunca pidió reducir: se reduce con todos los resultados
                warn!(
                    %task_id,
                    received = aggregator.received_count(),
                    "todos los jobs reportaron sin decisión de la política, reduciendo"
                );
                state.set_phase(TaskPhase::Reducing);
                aggregator.reduce()
            }
        };
        finish(&state, &active, &task_id, outcome);
    }

    debug!(%task_id, "coordinador de la tarea terminado");
}

fn finish(state: &TaskState, active: &ActiveTasks, task_id: &str, outcome: Result<Value>) {
    // sale del registro antes de despertar a quien espera el resultado
    lock(active).remove(task_id);

    match &outcome {
        Ok(value) => info!(task_id, result = %value, "tarea terminada"),
        Err(err) => warn!(task_id, error = %err, "tarea fallida"),
    }

    state.resolve(outcome);
}
