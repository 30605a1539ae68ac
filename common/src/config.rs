use std::{env, str::FromStr, time::Duration};

pub const DEFAULT_JOB_CONCURRENCY: usize = 16;
pub const DEFAULT_ATTRIBUTE_TIMEOUT_MS: u64 = 100_000;
pub const DEFAULT_RESULT_TIMEOUT_MS: u64 = 20_000;

pub const ENV_JOB_CONCURRENCY: &str = "GRID_JOB_CONCURRENCY";
pub const ENV_ATTRIBUTE_TIMEOUT_MS: &str = "GRID_ATTRIBUTE_TIMEOUT_MS";
pub const ENV_RESULT_TIMEOUT_MS: &str = "GRID_RESULT_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridConfig {
    /// Jobs que el pool local ejecuta a la vez
    pub job_concurrency: usize,
    /// Timeout por defecto para esperar atributos de sesión
    pub attribute_timeout: Duration,
    /// Timeout por defecto para esperar el resultado de una tarea
    pub result_timeout: Duration,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            job_concurrency: DEFAULT_JOB_CONCURRENCY,
            attribute_timeout: Duration::from_millis(DEFAULT_ATTRIBUTE_TIMEOUT_MS),
            result_timeout: Duration::from_millis(DEFAULT_RESULT_TIMEOUT_MS),
        }
    }
}

impl GridConfig {
    /// Lee la configuración de variables de entorno, con defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Igual que `from_env` pero con una fuente de variables inyectable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let job_concurrency: usize =
            parse_or(&lookup, ENV_JOB_CONCURRENCY, DEFAULT_JOB_CONCURRENCY);
        let attribute_ms: u64 =
            parse_or(&lookup, ENV_ATTRIBUTE_TIMEOUT_MS, DEFAULT_ATTRIBUTE_TIMEOUT_MS);
        let result_ms: u64 = parse_or(&lookup, ENV_RESULT_TIMEOUT_MS, DEFAULT_RESULT_TIMEOUT_MS);

        Self {
            job_concurrency: job_concurrency.max(1),
            attribute_timeout: Duration::from_millis(attribute_ms),
            result_timeout: Duration::from_millis(result_ms),
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T {
    lookup(name)
        .and_then(|s| s.trim().parse::<T>().ok())
        .unwrap_or(default)
}
