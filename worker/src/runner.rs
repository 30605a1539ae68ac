use grid_common::{cause_of, panic_message, Job, JobContext, JobOutcome, JobResult};
use tracing::{debug, info, warn};

/// Ejecuta un job y devuelve siempre un `JobResult`.
///
/// - `Err` de la lógica del job → `Failure` con la causa.
/// - panic dentro del job → `Failure` con el mensaje del panic.
/// - cancelación (antes o durante) → `Cancelled`.
pub async fn run_job(job: Job, ctx: JobContext) -> JobResult {
    let task_id = ctx.task_id().to_string();
    let job_id = job.id.clone();

    if ctx.is_cancelled() {
        debug!(%task_id, %job_id, "job cancelado antes de empezar");
        return JobResult::cancelled(task_id, job_id);
    }

    info!(%task_id, %job_id, arg = %job.argument, "ejecutando job");

    let cancel = ctx.cancellation_token().clone();
    let logic = job.logic.clone();
    let mut handle = tokio::spawn(async move { logic.execute(ctx).await });

    let outcome = tokio::select! {
        joined = &mut handle => match joined {
            Ok(Ok(data)) => JobOutcome::Success { data },
            Ok(Err(e)) => JobOutcome::Failure { cause: cause_of(&e) },
            Err(e) if e.is_cancelled() => JobOutcome::Cancelled,
            Err(e) => JobOutcome::Failure {
                cause: format!("panic en el job: {}", panic_message(e.into_panic().as_ref())),
            },
        },
        _ = cancel.cancelled() => {
            handle.abort();
            JobOutcome::Cancelled
        }
    };

    match &outcome {
        JobOutcome::Success { .. } => info!(%task_id, %job_id, "job terminado"),
        JobOutcome::Failure { cause } => warn!(%task_id, %job_id, %cause, "job fallido"),
        JobOutcome::Cancelled => info!(%task_id, %job_id, "job interrumpido"),
    }

    JobResult {
        job_id,
        task_id,
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_common::Session;
    use serde_json::json;
    use std::{sync::Arc, time::Duration};
    use tokio_util::sync::CancellationToken;

    fn ctx_for(job: &Job, cancel: CancellationToken) -> JobContext {
        JobContext::new(
            "t1".into(),
            job.id.clone(),
            job.argument.clone(),
            Arc::new(Session::new("t1".into())),
            cancel,
        )
    }

    #[tokio::test]
    async fn job_exitoso_devuelve_sus_datos() {
        let job = Job::from_fn(json!(2), |ctx: JobContext| async move {
            Ok(json!(ctx.argument().as_i64().unwrap_or_default() * 10))
        });
        let ctx = ctx_for(&job, CancellationToken::new());

        let res = run_job(job, ctx).await;

        assert_eq!(res.data(), Some(&json!(20)));
        assert_eq!(res.task_id, "t1");
    }

    #[tokio::test]
    async fn error_del_job_se_captura_como_fallo() {
        let job = Job::from_fn(json!(null), |_ctx: JobContext| async move {
            Err::<serde_json::Value, _>(anyhow::anyhow!("entrada inválida"))
        })
        .with_id("j-err");
        let ctx = ctx_for(&job, CancellationToken::new());

        let res = run_job(job, ctx).await;

        assert_eq!(
            res.outcome,
            JobOutcome::Failure {
                cause: "entrada inválida".into()
            }
        );
    }

    #[tokio::test]
    async fn panic_del_job_no_escapa_del_runner() {
        let job = Job::from_fn(json!(null), |_ctx: JobContext| async move {
            if true {
                panic!("se rompió");
            }
            Ok::<_, anyhow::Error>(json!(0))
        });
        let ctx = ctx_for(&job, CancellationToken::new());

        let res = run_job(job, ctx).await;

        match res.outcome {
            JobOutcome::Failure { cause } => assert!(cause.contains("se rompió"), "{cause}"),
            other => panic!("se esperaba fallo, llegó {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancelar_interrumpe_un_job_bloqueado() {
        let job = Job::from_fn(json!(null), |_ctx: JobContext| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(json!(1))
        });
        let cancel = CancellationToken::new();
        let ctx = ctx_for(&job, cancel.clone());

        let h = tokio::spawn(run_job(job, ctx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let res = tokio::time::timeout(Duration::from_secs(2), h)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(res.outcome, JobOutcome::Cancelled);
    }

    #[tokio::test]
    async fn job_ya_cancelado_no_se_ejecuta() {
        let session = Arc::new(Session::new("t1".into()));
        let job = Job::from_fn(json!(null), |ctx: JobContext| async move {
            ctx.session_set("corrio", true);
            Ok(json!(1))
        });
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ctx = JobContext::new(
            "t1".into(),
            job.id.clone(),
            json!(null),
            session.clone(),
            cancel,
        );

        let res = run_job(job, ctx).await;

        assert_eq!(res.outcome, JobOutcome::Cancelled);
        assert_eq!(session.get("corrio"), None);
    }
}
