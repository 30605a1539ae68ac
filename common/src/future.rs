use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{GridError, Result};
use crate::job::{JobOutcome, JobResult};
use crate::session::Session;
use crate::task::{TaskId, TaskInfo, TaskPhase};

/// Estado compartido entre el coordinador de la tarea y sus futures.
pub struct TaskState {
    info: Mutex<TaskInfo>,
    outcome: watch::Sender<Option<Result<Value>>>,
    cancel: CancellationToken,
    session: Arc<Session>,
}

impl TaskState {
    pub fn new(info: TaskInfo, session: Arc<Session>) -> Arc<Self> {
        let (outcome, _) = watch::channel(None);
        Arc::new(Self {
            info: Mutex::new(info),
            outcome,
            cancel: CancellationToken::new(),
            session,
        })
    }

    fn lock_info(&self) -> MutexGuard<'_, TaskInfo> {
        self.info.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn future(self: &Arc<Self>) -> TaskFuture {
        TaskFuture {
            state: Arc::clone(self),
        }
    }

    pub fn info(&self) -> TaskInfo {
        self.lock_info().clone()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn set_total_jobs(&self, total: usize) {
        self.lock_info().total_jobs = total as u32;
    }

    pub fn set_phase(&self, phase: TaskPhase) {
        let mut info = self.lock_info();
        if info.phase.is_terminal() {
            return;
        }
        info.phase = phase;
        if phase == TaskPhase::Running && info.started_at.is_none() {
            info.started_at = Some(Utc::now());
        }
    }

    /// Contadores de la tarea (sólo métricas; no decide nada).
    pub fn record_result(&self, result: &JobResult) {
        let mut info = self.lock_info();
        match result.outcome {
            JobOutcome::Success { .. } => info.completed_jobs += 1,
            JobOutcome::Failure { .. } | JobOutcome::Cancelled => info.failed_jobs += 1,
        }
    }

    /// Fija el resultado final. Sólo la primera llamada tiene efecto.
    pub fn resolve(&self, outcome: Result<Value>) -> bool {
        let mut outcome = Some(outcome);

        // la info se actualiza antes de despertar a los que esperan
        self.outcome.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            let Some(outcome) = outcome.take() else {
                return false;
            };

            let mut info = self.lock_info();
            info.finished_at = Some(Utc::now());
            match &outcome {
                Ok(_) => info.phase = TaskPhase::Done,
                Err(e) => {
                    info.phase = TaskPhase::Failed;
                    info.error = Some(e.to_string());
                }
            }
            drop(info);

            *slot = Some(outcome);
            true
        })
    }

    pub fn outcome(&self) -> Option<Result<Value>> {
        self.outcome.borrow().clone()
    }
}

/// Handle que recibe quien envía la tarea.
///
/// Se puede clonar; todos los clones ven el mismo resultado.
#[derive(Clone)]
pub struct TaskFuture {
    state: Arc<TaskState>,
}

impl TaskFuture {
    pub fn task_id(&self) -> TaskId {
        self.state.lock_info().id.clone()
    }

    pub fn info(&self) -> TaskInfo {
        self.state.info()
    }

    pub fn phase(&self) -> TaskPhase {
        self.state.lock_info().phase
    }

    pub fn session(&self) -> &Arc<Session> {
        self.state.session()
    }

    /// Espera un atributo de la sesión; no depende de que la tarea termine.
    pub async fn get_attribute(&self, key: &str, timeout: Duration) -> Result<Value> {
        self.state.session.wait(key, timeout).await
    }

    pub async fn get_attribute_as<T: DeserializeOwned>(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<T> {
        self.state.session.wait_as(key, timeout).await
    }

    /// Espera el resultado reducido (o el fallo terminal) hasta `timeout`.
    /// Un `FutureTimeout` no afecta a la tarea: otro `get` puede tener éxito.
    pub async fn get(&self, timeout: Duration) -> Result<Value> {
        let mut rx = self.state.outcome.subscribe();

        let waited = tokio::time::timeout(timeout, rx.wait_for(Option::is_some)).await;

        match waited {
            Ok(Ok(slot)) => match &*slot {
                Some(outcome) => outcome.clone(),
                None => Err(GridError::Cancelled),
            },
            Ok(Err(_)) => Err(GridError::Cancelled),
            Err(_) => Err(GridError::FutureTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    pub async fn get_as<T: DeserializeOwned>(&self, timeout: Duration) -> Result<T> {
        let value = self.get(timeout).await?;
        serde_json::from_value(value).map_err(|e| GridError::ResultCodec {
            cause: e.to_string(),
        })
    }

    /// Resultado sin bloquear, si ya se resolvió.
    pub fn try_get(&self) -> Option<Result<Value>> {
        self.state.outcome()
    }

    pub fn is_done(&self) -> bool {
        self.state.outcome.borrow().is_some()
    }

    /// Pide interrumpir los jobs que siguen corriendo. Devuelve `false` si
    /// la tarea ya estaba resuelta.
    pub fn cancel(&self) -> bool {
        let mut requested = false;

        // comprobar y cancelar bajo el mismo lock que usa `resolve`
        self.state.outcome.send_if_modified(|slot| {
            if slot.is_none() {
                self.state.cancel.cancel();
                requested = true;
            }
            false
        });

        requested
    }
}
