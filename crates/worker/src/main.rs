use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;

use kotoba_ai::{GenerationLogSink, LoggedGenerator};
use kotoba_infra::config::WorkerConfig;
use kotoba_infra::enrichment::{
    BatchTranslationHandler, ConversationHandler, LearningReminderHandler,
    SentenceAnalysisHandler, WordEnrichmentHandler,
};
use kotoba_infra::external::OpenAiClient;
use kotoba_infra::jobs::{Dispatcher, Scheduler};
use kotoba_infra::store::{EnrichmentStore, InMemoryStore, PostgresStore};
use kotoba_worker::{router, AppState};

const MAX_DB_CONNECTIONS: u32 = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    kotoba_observability::init();

    let config = WorkerConfig::from_env().context("invalid configuration")?;
    tracing::info!(
        interval_secs = config.jobs.interval.as_secs(),
        batch_size = config.jobs.batch_size,
        max_retries = config.jobs.max_retries,
        model = %config.generator.model,
        "starting kotoba worker"
    );

    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(MAX_DB_CONNECTIONS)
                .connect(&url)
                .await
                .context("failed to connect to Postgres")?;
            let store = PostgresStore::new(pool);
            store.ensure_schema().await.context("failed to apply schema")?;
            run(Arc::new(store), config).await
        }
        None => run(InMemoryStore::arc(), config).await,
    }
}

async fn run<S>(store: Arc<S>, config: WorkerConfig) -> anyhow::Result<()>
where
    S: EnrichmentStore + GenerationLogSink + 'static,
{
    let client = OpenAiClient::new(&config.generator).context("failed to build HTTP client")?;
    let generator = Arc::new(LoggedGenerator::new(client, store.clone()));

    let mut dispatcher = Dispatcher::new(
        store.clone(),
        config.jobs.retry_policy(),
        config.jobs.dispatch_config(),
    );
    dispatcher
        .register(WordEnrichmentHandler::new(store.clone(), generator.clone()))
        .register(SentenceAnalysisHandler::new(store.clone(), generator.clone()))
        .register(ConversationHandler::new(store.clone(), generator))
        .register(BatchTranslationHandler)
        .register(LearningReminderHandler);
    let dispatcher = Arc::new(dispatcher);

    let scheduler = Scheduler::new(dispatcher.clone(), config.jobs.interval).start();

    let app = router(Arc::new(AppState::new(dispatcher)));
    let listener = TcpListener::bind(config.ops_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.ops_addr))?;
    tracing::info!(addr = %config.ops_addr, "ops router listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("ops router failed");

    scheduler.stop().await;
    tracing::info!("kotoba worker stopped");
    served
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
