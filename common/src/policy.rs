use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::job::JobResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyDecision {
    Wait,
    Reduce,
}

/// Decide, cada vez que llega un resultado, si seguir esperando o reducir.
///
/// `received` ya incluye a `latest`. Devolver `Err` falla la tarea con ese
/// error sin esperar al resto de los jobs.
pub trait ResultPolicy: Send + Sync {
    fn on_result(
        &self,
        latest: &JobResult,
        received: &[JobResult],
        total_jobs: usize,
    ) -> Result<PolicyDecision>;
}

fn successes(received: &[JobResult]) -> usize {
    received.iter().filter(|r| r.is_success()).count()
}

/// Espera a todos los jobs; el primer fallo termina la tarea.
#[derive(Debug, Clone, Copy, Default)]
pub struct WaitForAll;

impl ResultPolicy for WaitForAll {
    fn on_result(
        &self,
        latest: &JobResult,
        received: &[JobResult],
        total_jobs: usize,
    ) -> Result<PolicyDecision> {
        if let Some(err) = latest.error() {
            return Err(err);
        }

        if successes(received) >= total_jobs {
            Ok(PolicyDecision::Reduce)
        } else {
            Ok(PolicyDecision::Wait)
        }
    }
}

/// Reduce en cuanto llegan `required` resultados exitosos.
/// También corta con el primer fallo.
#[derive(Debug, Clone, Copy)]
pub struct Quorum {
    pub required: usize,
}

impl ResultPolicy for Quorum {
    fn on_result(
        &self,
        latest: &JobResult,
        received: &[JobResult],
        total_jobs: usize,
    ) -> Result<PolicyDecision> {
        if let Some(err) = latest.error() {
            return Err(err);
        }

        let required = self.required.max(1).min(total_jobs.max(1));
        if successes(received) >= required {
            Ok(PolicyDecision::Reduce)
        } else {
            Ok(PolicyDecision::Wait)
        }
    }
}

/// Los fallos no son fatales: reduce cuando todos los jobs reportaron.
#[derive(Debug, Clone, Copy, Default)]
pub struct TolerateFailures;

impl ResultPolicy for TolerateFailures {
    fn on_result(
        &self,
        _latest: &JobResult,
        received: &[JobResult],
        total_jobs: usize,
    ) -> Result<PolicyDecision> {
        if received.len() >= total_jobs {
            Ok(PolicyDecision::Reduce)
        } else {
            Ok(PolicyDecision::Wait)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GridError;
    use serde_json::json;

    fn ok(job: &str) -> JobResult {
        JobResult::success("t1", job, json!(1))
    }

    #[test]
    fn wait_for_all_espera_a_todos() {
        let p = WaitForAll;
        let mut received = vec![ok("j1")];

        assert_eq!(
            p.on_result(&received[0], &received, 2).unwrap(),
            PolicyDecision::Wait
        );

        received.push(ok("j2"));
        assert_eq!(
            p.on_result(&received[1], &received, 2).unwrap(),
            PolicyDecision::Reduce
        );
    }

    #[test]
    fn wait_for_all_corta_con_el_primer_fallo() {
        let p = WaitForAll;
        let received = vec![ok("j1"), JobResult::failure("t1", "j2", "boom")];

        let err = p.on_result(&received[1], &received, 5).unwrap_err();

        assert_eq!(
            err,
            GridError::JobFailed {
                job_id: "j2".into(),
                cause: "boom".into()
            }
        );
    }

    #[test]
    fn wait_for_all_trata_la_cancelacion_como_fallo() {
        let received = vec![JobResult::cancelled("t1", "j1")];

        let err = WaitForAll.on_result(&received[0], &received, 3).unwrap_err();

        assert_eq!(err, GridError::Cancelled);
    }

    #[test]
    fn quorum_reduce_antes_de_tiempo() {
        let p = Quorum { required: 2 };
        let received = vec![ok("j1"), ok("j2")];

        assert_eq!(
            p.on_result(&received[1], &received, 5).unwrap(),
            PolicyDecision::Reduce
        );
    }

    #[test]
    fn quorum_se_limita_al_total_de_jobs() {
        let p = Quorum { required: 10 };
        let received = vec![ok("j1"), ok("j2")];

        assert_eq!(
            p.on_result(&received[1], &received, 2).unwrap(),
            PolicyDecision::Reduce
        );
    }

    #[test]
    fn tolerate_failures_cuenta_todos_los_reportes() {
        let p = TolerateFailures;
        let received = vec![ok("j1"), JobResult::failure("t1", "j2", "boom")];

        assert_eq!(
            p.on_result(&received[1], &received, 3).unwrap(),
            PolicyDecision::Wait
        );
        assert_eq!(
            p.on_result(&received[1], &received, 2).unwrap(),
            PolicyDecision::Reduce
        );
    }
}
