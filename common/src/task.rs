use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::job::{Job, JobResult};
use crate::policy::{ResultPolicy, WaitForAll};

pub type TaskId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPhase {
    Splitting,
    Running,
    Reducing,
    Done,
    Failed,
}

impl TaskPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskPhase::Done | TaskPhase::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: String,
    pub phase: TaskPhase,

    /// -------- Métricas de la tarea --------
    pub total_jobs: u32,
    pub completed_jobs: u32,
    pub failed_jobs: u32,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Causa del fallo terminal, si lo hubo
    pub error: Option<String>,
}

impl TaskInfo {
    pub fn new(id: TaskId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            phase: TaskPhase::Splitting,
            total_jobs: 0,
            completed_jobs: 0,
            failed_jobs: 0,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    /// Jobs que ya reportaron resultado (éxito o fallo).
    pub fn reported_jobs(&self) -> u32 {
        self.completed_jobs + self.failed_jobs
    }
}

/// Una unidad de trabajo que se divide en jobs y luego se reduce.
pub trait ComputeTask: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Divide la tarea en jobs. Debe producir al menos uno.
    fn split(&self, argument: &Value) -> anyhow::Result<Vec<Job>>;

    /// Política que decide, tras cada resultado, si seguir esperando o reducir.
    fn policy(&self) -> Arc<dyn ResultPolicy> {
        Arc::new(WaitForAll)
    }

    /// Combina los resultados recibidos hasta el momento de la reducción.
    fn reduce(&self, results: &[JobResult]) -> anyhow::Result<Value>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_info_nueva_empieza_dividiendo() {
        let info = TaskInfo::new("t1".into(), "suma");

        assert_eq!(info.phase, TaskPhase::Splitting);
        assert_eq!(info.reported_jobs(), 0);
        assert!(info.started_at.is_none());
    }

    #[test]
    fn fases_terminales() {
        assert!(TaskPhase::Done.is_terminal());
        assert!(TaskPhase::Failed.is_terminal());
        assert!(!TaskPhase::Reducing.is_terminal());
        assert_eq!(
            serde_json::to_string(&TaskPhase::Reducing).unwrap(),
            "\"REDUCING\""
        );
    }
}
