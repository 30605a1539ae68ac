use std::any::Any;

use thiserror::Error;

use crate::job::JobId;

/// Errores del subsistema de sesión / future de tareas.
///
/// Es `Clone` porque un future ya resuelto entrega el mismo fallo
/// a todos los que llamen a `get`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GridError {
    #[error("la división de la tarea no produjo ningún job")]
    EmptySplit,

    #[error("falló la división de la tarea: {cause}")]
    SplitFailed { cause: String },

    #[error("timeout esperando el atributo '{key}' ({timeout_ms} ms)")]
    AttributeWaitTimeout { key: String, timeout_ms: u64 },

    #[error("timeout esperando el resultado de la tarea ({timeout_ms} ms)")]
    FutureTimeout { timeout_ms: u64 },

    #[error("el job {job_id} falló: {cause}")]
    JobFailed { job_id: JobId, cause: String },

    #[error("cancelado")]
    Cancelled,

    #[error("falló la reducción: {cause}")]
    ReduceFailed { cause: String },

    #[error("no se pudo convertir el atributo '{key}': {cause}")]
    AttributeCodec { key: String, cause: String },

    #[error("no se pudo convertir el resultado de la tarea: {cause}")]
    ResultCodec { cause: String },

    #[error("falló la política de resultados: {cause}")]
    PolicyFailed { cause: String },
}

impl GridError {
    /// Los timeouts son locales a la llamada; la tarea sigue su curso.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            GridError::AttributeWaitTimeout { .. } | GridError::FutureTimeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, GridError>;

/// Texto de la causa con toda la cadena de contexto de anyhow.
pub fn cause_of(err: &anyhow::Error) -> String {
    format!("{err:#}")
}

/// Mensaje legible de un panic capturado.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "sin mensaje".to_string()
    }
}
