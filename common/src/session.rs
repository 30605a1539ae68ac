//! Sesión compartida de una tarea: atributos clave→valor más un registro
//! de esperas por claves que todavía no tienen valor.
//!
//! Un único mutex protege el mapa de atributos y el registro de esperas.
//! Comprobar si la clave existe y registrarse como espera ocurre dentro de
//! la misma sección crítica, así un `set` concurrente nunca se pierde.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::{GridError, Result};
use crate::task::TaskId;

struct Waiter {
    /// `None` acepta cualquier valor; `Some(v)` sólo despierta con `v`.
    expected: Option<Value>,
    tx: oneshot::Sender<Value>,
}

impl Waiter {
    fn accepts(&self, value: &Value) -> bool {
        self.expected.as_ref().map_or(true, |e| e == value)
    }
}

#[derive(Default)]
struct SessionInner {
    attrs: HashMap<String, Value>,
    waiters: HashMap<String, Vec<Waiter>>,
}

pub struct Session {
    task_id: TaskId,
    inner: Mutex<SessionInner>,
}

impl Session {
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            inner: Mutex::new(SessionInner::default()),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lectura sin bloqueo.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().attrs.get(key).cloned()
    }

    /// Copia de todos los atributos actuales.
    pub fn attributes(&self) -> HashMap<String, Value> {
        self.lock().attrs.clone()
    }

    /// Asigna `key` (el último que escribe gana) y despierta a todas las
    /// esperas registradas en este momento para esa clave.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();

        let mut inner = self.lock();
        inner.attrs.insert(key.clone(), value.clone());
        let woken = wake(&mut inner, &key, &value);
        drop(inner);

        debug!(task_id = %self.task_id, key = %key, woken, "atributo asignado");
    }

    pub fn set_all<I, K, V>(&self, attrs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (k, v) in attrs {
            self.set(k, v);
        }
    }

    pub fn set_as<T: Serialize>(&self, key: impl Into<String>, value: &T) -> Result<()> {
        let key = key.into();
        let value = serde_json::to_value(value).map_err(|e| GridError::AttributeCodec {
            key: key.clone(),
            cause: e.to_string(),
        })?;
        self.set(key, value);
        Ok(())
    }

    /// Devuelve el valor de `key`, esperando hasta `timeout` si todavía
    /// no fue asignado.
    pub async fn wait(&self, key: &str, timeout: Duration) -> Result<Value> {
        self.wait_matching(key, None, timeout).await
    }

    /// Como `wait`, pero sólo se resuelve cuando `key` vale `expected`.
    pub async fn wait_for_value(
        &self,
        key: &str,
        expected: impl Into<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        self.wait_matching(key, Some(expected.into()), timeout).await
    }

    pub async fn wait_as<T: DeserializeOwned>(&self, key: &str, timeout: Duration) -> Result<T> {
        let value = self.wait(key, timeout).await?;
        serde_json::from_value(value).map_err(|e| GridError::AttributeCodec {
            key: key.to_string(),
            cause: e.to_string(),
        })
    }

    /// Cantidad de esperas vivas para `key`.
    pub fn waiter_count(&self, key: &str) -> usize {
        self.lock()
            .waiters
            .get(key)
            .map_or(0, |ws| ws.iter().filter(|w| !w.tx.is_closed()).count())
    }

    async fn wait_matching(
        &self,
        key: &str,
        expected: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        // comprobar + registrar en una sola sección crítica
        let rx = {
            let mut inner = self.lock();

            if let Some(current) = inner.attrs.get(key) {
                if expected.as_ref().map_or(true, |e| e == current) {
                    return Ok(current.clone());
                }
            }

            let (tx, rx) = oneshot::channel();
            let slot = inner.waiters.entry(key.to_string()).or_default();
            // esperas que ya vencieron
            slot.retain(|w| !w.tx.is_closed());
            slot.push(Waiter { expected, tx });
            rx
        };

        trace!(task_id = %self.task_id, key, "esperando atributo");

        // el receptor se suelta al terminar esta sentencia
        let waited = tokio::time::timeout(timeout, rx).await;

        match waited {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(GridError::Cancelled),
            Err(_) => {
                debug!(task_id = %self.task_id, key, ?timeout, "timeout esperando atributo");
                self.prune(key);
                Err(GridError::AttributeWaitTimeout {
                    key: key.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Quita las esperas vencidas de `key` y la entrada si quedó vacía.
    fn prune(&self, key: &str) {
        let mut inner = self.lock();
        if let Some(slot) = inner.waiters.get_mut(key) {
            slot.retain(|w| !w.tx.is_closed());
            if slot.is_empty() {
                inner.waiters.remove(key);
            }
        }
    }
}

/// Entrega `value` a cada espera de `key` que lo acepte. Las que esperan
/// otro valor siguen registradas.
fn wake(inner: &mut SessionInner, key: &str, value: &Value) -> usize {
    let Some(waiters) = inner.waiters.remove(key) else {
        return 0;
    };

    let mut woken = 0;
    let mut pending = Vec::new();

    for w in waiters {
        if w.tx.is_closed() {
            continue;
        }
        if w.accepts(value) {
            if w.tx.send(value.clone()).is_ok() {
                woken += 1;
            }
        } else {
            pending.push(w);
        }
    }

    if !pending.is_empty() {
        inner.waiters.insert(key.to_string(), pending);
    }

    woken
}
