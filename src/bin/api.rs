use care_escalation::{
    analytics::AnalyticsAggregator,
    analyzer::{HeuristicAnalyzer, TextAnalyzer},
    api::{start_server, ApiState},
    classifier::ContentClassifier,
    config::AppConfig,
    coordinator::EscalationCoordinator,
    gemini::GeminiClient,
    jobs::{JobQueue, Scheduler, Worker},
    notify::LoggingNotifier,
    store::{CareStore, InMemoryStore, PgStore},
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;

    info!("Student care escalation service - API Server");
    info!("Port: {}", config.port);

    let store: Arc<dyn CareStore> = match config.database_url.as_deref() {
        Some(url) => {
            info!("Using Postgres store");
            Arc::new(PgStore::connect_lazy(url)?)
        }
        None => {
            warn!("DATABASE_URL not set, using in-memory store");
            Arc::new(InMemoryStore::new())
        }
    };

    let analyzer: Arc<dyn TextAnalyzer> = if config.gemini.has_api_key() {
        let client = GeminiClient::new(config.gemini.clone())?;
        info!(model = client.model(), "Using Gemini analyzer");
        Arc::new(client)
    } else {
        warn!("GEMINI_API_KEY not set, falling back to heuristic analyzer");
        Arc::new(HeuristicAnalyzer::new())
    };

    // Create components
    let classifier = ContentClassifier::new(analyzer).with_retry(config.retry.clone());
    let coordinator = Arc::new(EscalationCoordinator::new(store.clone(), Arc::new(LoggingNotifier)));
    let aggregator = Arc::new(AnalyticsAggregator::new(store.clone()));

    let (queue, receiver) = JobQueue::bounded(config.job_queue_capacity);
    Worker::new(
        store.clone(),
        classifier,
        coordinator.clone(),
        aggregator.clone(),
        config.job_max_attempts,
    )
    .spawn(receiver);
    Scheduler::spawn_daily_rollup(queue.clone(), config.rollup_interval);

    info!("Worker and scheduler started");

    // Start API server
    let state = ApiState {
        store,
        coordinator,
        aggregator,
        queue,
    };
    start_server(state, config.port).await?;

    Ok(())
}
