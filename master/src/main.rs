use std::{sync::Arc, time::Duration};

use anyhow::Result;
use clap::Parser;
use grid_common::GridConfig;
use grid_master::{run_many, Grid, ScenarioConfig};
use grid_worker::WorkerPool;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "grid_master=info,grid_worker=info,grid_common=info";

#[derive(Parser)]
#[command(name = "grid-master")]
#[command(about = "Ejecuta el escenario de sesión y futures sobre un pool local")]
struct Cli {
    /// Cantidad de ejecuciones del escenario
    #[arg(long, default_value_t = 25)]
    executions: usize,

    /// Jobs por tarea
    #[arg(long, default_value_t = 5)]
    split_count: usize,

    /// Lanza todas las ejecuciones a la vez
    #[arg(long)]
    concurrent: bool,

    /// Jobs simultáneos en el pool (pisa GRID_JOB_CONCURRENCY)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Timeout de espera del atributo (pisa GRID_ATTRIBUTE_TIMEOUT_MS)
    #[arg(long)]
    attribute_timeout_ms: Option<u64>,

    /// Cuánto espera cada job la señal de parada
    #[arg(long, default_value_t = 20_000)]
    job_wait_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let mut config = GridConfig::from_env();
    if let Some(n) = cli.concurrency {
        config.job_concurrency = n.max(1);
    }
    if let Some(ms) = cli.attribute_timeout_ms {
        config.attribute_timeout = Duration::from_millis(ms);
    }
    info!(?config, "configuración del grid");

    let pool = Arc::new(WorkerPool::new(config.job_concurrency));
    let grid = Grid::new(config.clone(), pool.clone());

    let scenario = ScenarioConfig {
        split_count: cli.split_count,
        job_wait: Duration::from_millis(cli.job_wait_ms),
        attribute_timeout: config.attribute_timeout,
        result_timeout: config.result_timeout,
        ..ScenarioConfig::default()
    };

    let reports = run_many(&grid, cli.executions, cli.concurrent, &scenario).await?;

    let summary = json!({
        "executions": reports.len(),
        "concurrent": cli.concurrent,
        "split_count": scenario.split_count,
        "results": reports,
        "pool": pool.metrics(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
