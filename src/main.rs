mod breaker;
mod catalog;
mod checker;
mod compiler;
mod config;
mod dao;
mod error;
mod languages;
mod metrics;
mod pool;
mod queue;
mod resource;
mod retry;
mod sandbox;
mod storage;
mod telemetry;
mod trusted;
mod types;
mod validator;
mod worker;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use catalog::CatalogClient;
use checker::OutputChecker;
use config::Config;
use dao::{JudgeDao, PgJudgeDao};
use pool::WorkerPool;
use queue::QueueAdapter;
use retry::DeadLetterPipeline;
use storage::StorageClient;

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init()?;
    dotenvy::dotenv().ok();

    let cfg = Arc::new(Config::from_env());
    info!("starting judge worker pool (min={}, max={})", cfg.min_workers, cfg.max_workers);

    languages::init_languages()?;
    info!("loaded language configurations");

    // Box-id allocation is computed per logical worker in `worker::JudgeWorker`
    // rather than through this global config, but it's still initialized so
    // `sandbox::get_config()`'s compile-time-limit/memory-limit defaults are set.
    sandbox::init_config(0)?;
    sandbox::ensure_cgroups_available().await?;

    let storage = Arc::new(StorageClient::from_config(&cfg).await?);
    info!("connected to object storage");

    let catalog = Arc::new(CatalogClient::new(cfg.catalog_base_url.clone()));

    let dao: Arc<dyn JudgeDao> = Arc::new(PgJudgeDao::connect(&cfg.database_url).await?);
    info!("connected to postgres");

    let queue = Arc::new(QueueAdapter::connect(&cfg).await?);
    info!("connected to broker, declared queue topology");

    let breakers = Arc::new(breaker::Breakers::new(&cfg));
    let checker = Arc::new(OutputChecker::new(&cfg.testlib_path, &cfg.trusted_cache_dir));

    let metrics_server = tokio::spawn(metrics::MetricsServer::run(cfg.metrics_port));

    let dlq_queue = queue.clone();
    let dlq_dao = dao.clone();
    let dlq_cfg = cfg.clone();
    let dlq_pipeline = tokio::spawn(async move {
        let pipeline = DeadLetterPipeline::new(&dlq_queue, dlq_dao.as_ref(), &dlq_cfg);
        if let Err(e) = pipeline.run("judge-dlq-consumer").await {
            tracing::error!("dead-letter pipeline exited: {}", e);
        }
    });

    let pool = Arc::new(WorkerPool::new(cfg, dao, queue, breakers, storage, catalog, checker));
    let pool_handle = tokio::spawn(pool.run());

    tokio::select! {
        res = pool_handle => { res??; }
        res = metrics_server => { res??; }
        res = dlq_pipeline => { res?; }
    }

    Ok(())
}
