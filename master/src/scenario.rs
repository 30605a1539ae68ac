//! Escenario de verificación de sesión: cada job publica un atributo,
//! avisa que arrancó y espera la señal de parada. Quien envía la tarea lee
//! el atributo a través del future mientras los jobs siguen corriendo,
//! libera a los jobs y comprueba que la suma reducida sea igual a la
//! cantidad de jobs.

use std::{sync::Arc, time::Duration};

use anyhow::{bail, ensure, Context};
use grid_common::{ComputeTask, Job, JobContext, JobResult, TaskFuture, TaskId, TaskInfo};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::grid::Grid;

pub const ATTR_KEY: &str = "testName";
pub const ATTR_VALUE: &str = "testVal";

#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub split_count: usize,
    /// Cuánto espera cada job la señal de parada
    pub job_wait: Duration,
    /// Cuánto espera quien envía a que arranque algún job
    pub start_timeout: Duration,
    pub attribute_timeout: Duration,
    pub result_timeout: Duration,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            split_count: 5,
            job_wait: Duration::from_secs(20),
            start_timeout: Duration::from_secs(20),
            attribute_timeout: Duration::from_millis(100_000),
            result_timeout: Duration::from_secs(20),
        }
    }
}

/* --------- Señales entre quien envía y los jobs --------- */

pub struct Signals {
    started: watch::Sender<bool>,
    stop: watch::Sender<bool>,
}

impl Signals {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            started: watch::channel(false).0,
            stop: watch::channel(false).0,
        })
    }

    pub async fn wait_started(&self, timeout: Duration) -> bool {
        let mut rx = self.started.subscribe();
        let started = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|s| *s)).await,
            Ok(Ok(_))
        );
        started
    }

    pub fn stop(&self) {
        self.stop.send_replace(true);
    }
}

/* --------- Tarea --------- */

pub struct SessionSumTask {
    split_count: usize,
    job_wait: Duration,
    signals: Arc<Signals>,
}

impl SessionSumTask {
    pub fn new(split_count: usize, job_wait: Duration, signals: Arc<Signals>) -> Self {
        Self {
            split_count,
            job_wait,
            signals,
        }
    }
}

impl ComputeTask for SessionSumTask {
    fn name(&self) -> &str {
        "session-sum"
    }

    fn split(&self, _argument: &Value) -> anyhow::Result<Vec<Job>> {
        let jobs = (0..self.split_count)
            .map(|i| {
                let signals = self.signals.clone();
                let job_wait = self.job_wait;
                Job::from_fn(json!(i), move |ctx: JobContext| {
                    session_job(ctx, signals.clone(), job_wait)
                })
            })
            .collect();

        Ok(jobs)
    }

    fn reduce(&self, results: &[JobResult]) -> anyhow::Result<Value> {
        ensure!(
            results.len() >= self.split_count,
            "se recibieron {} resultados de {}",
            results.len(),
            self.split_count
        );

        let sum: i64 = results
            .iter()
            .filter_map(JobResult::data)
            .filter_map(Value::as_i64)
            .sum();

        Ok(json!(sum))
    }
}

async fn session_job(ctx: JobContext, signals: Arc<Signals>, job_wait: Duration) -> anyhow::Result<Value> {
    ctx.session_set(ATTR_KEY, ATTR_VALUE);
    signals.started.send_replace(true);

    let mut stop = signals.stop.subscribe();
    let stopped = async {
        let stopped = matches!(
            tokio::time::timeout(job_wait, stop.wait_for(|s| *s)).await,
            Ok(Ok(_))
        );
        stopped
    };

    tokio::select! {
        ok = stopped => {
            if !ok {
                bail!("no llegó la señal de parada en {job_wait:?}");
            }
            debug!(job_id = ctx.job_id(), "job liberado");
            Ok(json!(1))
        }
        _ = ctx.cancelled() => {
            debug!(job_id = ctx.job_id(), "job interrumpido");
            Ok(json!(0))
        }
    }
}

/* --------- Ejecución --------- */

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub execution: usize,
    pub task_id: TaskId,
    pub attribute: Value,
    pub result: Value,
    pub info: TaskInfo,
}

pub async fn run_scenario(
    grid: &Grid,
    execution: usize,
    cfg: &ScenarioConfig,
) -> anyhow::Result<ScenarioReport> {
    let signals = Signals::new();
    let task = Arc::new(SessionSumTask::new(
        cfg.split_count,
        cfg.job_wait,
        signals.clone(),
    ));

    let fut = grid.submit(task, json!(execution));
    let task_id = fut.task_id();
    debug!(execution, %task_id, "tarea enviada");

    let checked = check_attribute(&fut, &signals, cfg).await;

    // los jobs se liberan siempre, haya salido bien o no la lectura
    signals.stop();

    let attribute = match checked {
        Ok(v) => v,
        Err(e) => {
            fut.cancel();
            return Err(e.context(format!("ejecución {execution}")));
        }
    };

    let result = fut
        .get(cfg.result_timeout)
        .await
        .with_context(|| format!("ejecución {execution}: resultado de la tarea {task_id}"))?;

    ensure!(
        result == json!(cfg.split_count),
        "ejecución {execution}: resultado {result}, se esperaba {}",
        cfg.split_count
    );

    info!(execution, %task_id, %result, "ejecución correcta");

    Ok(ScenarioReport {
        execution,
        task_id,
        attribute,
        result,
        info: fut.info(),
    })
}

async fn check_attribute(
    fut: &TaskFuture,
    signals: &Signals,
    cfg: &ScenarioConfig,
) -> anyhow::Result<Value> {
    if !signals.wait_started(cfg.start_timeout).await {
        bail!("ningún job arrancó en {:?}", cfg.start_timeout);
    }

    let value = fut
        .get_attribute(ATTR_KEY, cfg.attribute_timeout)
        .await
        .context("leyendo el atributo de la sesión")?;

    ensure!(
        value == json!(ATTR_VALUE),
        "atributo {ATTR_KEY} = {value}, se esperaba {ATTR_VALUE}"
    );

    Ok(value)
}

/// Corre `executions` escenarios, en serie o todos a la vez.
pub async fn run_many(
    grid: &Grid,
    executions: usize,
    concurrent: bool,
    cfg: &ScenarioConfig,
) -> anyhow::Result<Vec<ScenarioReport>> {
    let mut reports = Vec::with_capacity(executions);

    if !concurrent {
        for i in 0..executions {
            reports.push(run_scenario(grid, i, cfg).await?);
        }
        return Ok(reports);
    }

    let handles: Vec<_> = (0..executions)
        .map(|i| {
            let grid = grid.clone();
            let cfg = cfg.clone();
            tokio::spawn(async move { run_scenario(&grid, i, &cfg).await })
        })
        .collect();

    let mut failures = 0;
    for h in handles {
        match h.await {
            Ok(Ok(report)) => reports.push(report),
            Ok(Err(e)) => {
                warn!("ejecución fallida: {e:#}");
                failures += 1;
            }
            Err(e) => {
                warn!("ejecución abortada: {e}");
                failures += 1;
            }
        }
    }

    ensure!(failures == 0, "{failures} de {executions} ejecuciones fallaron");
    Ok(reports)
}
