use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use placequery::cache::CompositionAdapter;
use placequery::compiler::Compiler;
use placequery::config::Settings;
use placequery::error::{PlacequeryError, Result};
use placequery::executor::Executor;
use placequery::interface::LoadInterface;
use placequery::optimizer::Popularity;
use placequery::persist::{PersistenceMode, Persistor};
use placequery::plan::{FilePlanSource, MemoryPlanSource, PlanSource};
use placequery::provider::HttpTransport;
use placequery::search::SearchPipeline;
use placequery::server::router;
use placequery::walker::PlanWalker;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    if let Err(e) = run().await {
        error!(error = %e, "placequery stopped");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config_path = std::env::args().nth(1);
    let settings = Settings::load(config_path.as_deref().or(Some("placequery")))?;

    let mode = match &settings.database.path {
        Some(path) => PersistenceMode::File(path.to_string_lossy().into_owned()),
        None => PersistenceMode::InMemory,
    };
    info!(?mode, "opening persistence");
    let persistor = Arc::new(Persistor::new(&mode)?);

    if settings.provider.api_key.is_empty() {
        warn!("no provider api key configured, every provider call will fail");
    }
    let transport = Arc::new(HttpTransport::new(settings.provider.clone())?);
    let executor = Arc::new(Executor::new(transport, settings.retry.policy()));
    let adapter = CompositionAdapter::new(persistor.clone(), executor);

    let popularity = match &settings.popularity_path {
        Some(path) => Popularity::load(path)?,
        None => Popularity::default(),
    };
    info!(terms = popularity.len(), "popularity loaded");
    let compiler = Compiler::new(settings.compiler.limits());
    let pipeline = Arc::new(SearchPipeline::new(compiler, Arc::new(popularity), adapter));

    let plans: Arc<dyn PlanSource> = match &settings.plan_dir {
        Some(dir) => Arc::new(FilePlanSource::new(dir.clone())),
        None => Arc::new(MemoryPlanSource::new()),
    };
    let walker = Arc::new(PlanWalker::new(plans, persistor, settings.walker.settings()));
    let interface = Arc::new(LoadInterface::new(pipeline, walker));

    let listener = TcpListener::bind(&settings.server.bind)
        .await
        .map_err(|e| PlacequeryError::Config(format!("cannot bind {}: {}", settings.server.bind, e)))?;
    info!(bind = %settings.server.bind, "listening");
    axum::serve(listener, router(interface))
        .await
        .map_err(|e| PlacequeryError::Config(format!("server error: {}", e)))?;
    Ok(())
}
