use sidekick::{
    api::{start_server, ApiState},
    config::AppConfig,
    evaluator::LlmEvaluator,
    ledger::FixedPriceSource,
    research::ResearchManager,
    state::{AccountBook, SessionRegistry, SidekickFactory},
    tools::{ToolProvider, ToolboxProvider},
    worker::LlmWorker,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;

    info!("Sidekick - API Server");
    info!("Port: {}", config.port);
    info!("Model: {}", config.gemini_model);

    let service = config.completion_service()?;
    let notifier = config.notifier()?;
    let provider = Arc::new(ToolboxProvider::new(config.toolbox_config(), notifier.clone()));

    let factory = SidekickFactory::new(
        Arc::new(LlmWorker::new(service.clone())),
        Arc::new(LlmEvaluator::new(service.clone())),
        provider.clone(),
        config.loop_config(),
    );

    let research = ResearchManager::new(
        service,
        provider.acquire().await?,
        notifier,
        config.research_searches,
    );

    let state = ApiState {
        sessions: Arc::new(SessionRegistry::new(factory)),
        accounts: Arc::new(AccountBook::new(Arc::new(FixedPriceSource::default()))),
        research: Arc::new(research),
    };

    info!("Starting API server...");
    start_server(state, config.port).await?;

    Ok(())
}
