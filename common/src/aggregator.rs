//! Agregador de resultados de una tarea.
//!
//! Máquina de estados `Collecting → Reducing → Reduced` o
//! `Collecting → Failed`. Una vez que deja de recolectar no vuelve atrás:
//! los resultados que lleguen después se registran en el log y se ignoran.

use std::{
    collections::HashSet,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{cause_of, panic_message, GridError, Result};
use crate::job::{JobId, JobResult};
use crate::policy::{PolicyDecision, ResultPolicy};
use crate::task::TaskId;

pub type Reducer = Box<dyn Fn(&[JobResult]) -> anyhow::Result<Value> + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum AggregatorState {
    Collecting,
    Reducing,
    Reduced(Value),
    Failed(GridError),
}

impl AggregatorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AggregatorState::Reduced(_) | AggregatorState::Failed(_))
    }
}

/// Qué provocó una entrega de resultado.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Seguimos recolectando.
    Collecting,
    /// La política pidió reducir; hay que llamar a `reduce`.
    Reduce,
    /// La tarea falló con este error.
    Failed(GridError),
    /// El agregador ya no acepta resultados, o el job no es de esta tarea.
    Ignored,
}

struct Inner {
    state: AggregatorState,
    received: Vec<JobResult>,
    reported: HashSet<JobId>,
}

pub struct ResultAggregator {
    task_id: TaskId,
    job_ids: HashSet<JobId>,
    policy: Arc<dyn ResultPolicy>,
    reducer: Reducer,
    inner: Mutex<Inner>,
}

impl ResultAggregator {
    pub fn new(
        task_id: TaskId,
        job_ids: impl IntoIterator<Item = JobId>,
        policy: Arc<dyn ResultPolicy>,
        reducer: Reducer,
    ) -> Self {
        Self {
            task_id,
            job_ids: job_ids.into_iter().collect(),
            policy,
            reducer,
            inner: Mutex::new(Inner {
                state: AggregatorState::Collecting,
                received: Vec::new(),
                reported: HashSet::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn total_jobs(&self) -> usize {
        self.job_ids.len()
    }

    pub fn state(&self) -> AggregatorState {
        self.lock().state.clone()
    }

    pub fn received_count(&self) -> usize {
        self.lock().received.len()
    }

    /// Entrega un resultado y evalúa la política.
    pub fn on_result(&self, result: JobResult) -> Delivery {
        let mut inner = self.lock();

        if !matches!(inner.state, AggregatorState::Collecting) {
            debug!(
                task_id = %self.task_id,
                job_id = %result.job_id,
                "resultado ignorado: la tarea ya no recolecta"
            );
            return Delivery::Ignored;
        }

        if !self.job_ids.contains(&result.job_id) {
            warn!(
                task_id = %self.task_id,
                job_id = %result.job_id,
                "resultado de un job que no pertenece a la tarea"
            );
            return Delivery::Ignored;
        }

        if !inner.reported.insert(result.job_id.clone()) {
            warn!(task_id = %self.task_id, job_id = %result.job_id, "resultado duplicado");
            return Delivery::Ignored;
        }

        inner.received.push(result);

        let decision = {
            let received = &inner.received;
            let latest = &received[received.len() - 1];
            let total = self.job_ids.len();
            panic::catch_unwind(AssertUnwindSafe(|| {
                self.policy.on_result(latest, received, total)
            }))
            .unwrap_or_else(|payload| {
                Err(GridError::PolicyFailed {
                    cause: format!("panic: {}", panic_message(payload.as_ref())),
                })
            })
        };

        match decision {
            Ok(PolicyDecision::Wait) => Delivery::Collecting,
            Ok(PolicyDecision::Reduce) => {
                inner.state = AggregatorState::Reducing;
                Delivery::Reduce
            }
            Err(err) => {
                warn!(task_id = %self.task_id, error = %err, "la tarea falló");
                inner.state = AggregatorState::Failed(err.clone());
                Delivery::Failed(err)
            }
        }
    }

    /// Reduce con los resultados recibidos hasta ahora (no necesariamente
    /// todos los jobs). Si ya había un estado terminal lo devuelve tal cual.
    pub fn reduce(&self) -> Result<Value> {
        let mut inner = self.lock();

        match &inner.state {
            AggregatorState::Reduced(v) => return Ok(v.clone()),
            AggregatorState::Failed(e) => return Err(e.clone()),
            AggregatorState::Collecting | AggregatorState::Reducing => {}
        }

        info!(
            task_id = %self.task_id,
            results = inner.received.len(),
            total = self.job_ids.len(),
            "reduciendo"
        );

        let reduced = panic::catch_unwind(AssertUnwindSafe(|| (self.reducer)(&inner.received)));

        match reduced {
            Ok(Ok(value)) => {
                inner.state = AggregatorState::Reduced(value.clone());
                Ok(value)
            }
            Ok(Err(e)) => {
                let err = GridError::ReduceFailed { cause: cause_of(&e) };
                inner.state = AggregatorState::Failed(err.clone());
                Err(err)
            }
            Err(payload) => {
                let err = GridError::ReduceFailed {
                    cause: format!("panic en el reductor: {}", panic_message(payload.as_ref())),
                };
                warn!(task_id = %self.task_id, error = %err, "la reducción entró en panic");
                inner.state = AggregatorState::Failed(err.clone());
                Err(err)
            }
        }
    }

    /// Jobs de la tarea que todavía no entregaron resultado.
    pub fn missing_jobs(&self) -> Vec<JobId> {
        let inner = self.lock();
        let mut missing: Vec<JobId> = self
            .job_ids
            .iter()
            .filter(|id| !inner.reported.contains(*id))
            .cloned()
            .collect();
        missing.sort();
        missing
    }

    /// Fuerza el estado `Failed` (cancelación). No hace nada si ya era terminal.
    pub fn fail(&self, err: GridError) -> bool {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return false;
        }
        inner.state = AggregatorState::Failed(err);
        true
    }
}
