use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use study_forge::{
    api::{create_router, AppState},
    config::{Config, LoggingConfig},
    log_system_event, ContentExtractor, Database, GradingEngine, HttpDocumentStore, LLMProviderFactory,
    QuestionGenerator, StudyService,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    let _guard = setup_logging(&config.logging)?;
    log_system_event!(config, "Configuration loaded successfully");
    config.log_configuration_summary();
    config.validate()?;

    log_system_event!(startup, component = "server", "Starting study-forge server");

    let db = Database::new(&config.database.url).await?;
    info!("Database initialized successfully");

    let provider = LLMProviderFactory::create_provider(
        config.llm.provider,
        config.llm.api_key.clone(),
        config.llm.base_url.clone(),
        config.llm.model.clone(),
        Duration::from_secs(config.llm.timeout_secs),
    )?;
    info!(
        provider = provider.provider_name(),
        model = provider.model_name(),
        "Initialized LLM provider"
    );

    let store = HttpDocumentStore::new(&config.storage)?;
    let study_service = StudyService::new(
        db,
        Arc::new(store),
        ContentExtractor::new(config.server.max_upload_bytes),
        QuestionGenerator::new(provider.clone()),
        GradingEngine::new(provider),
    );

    let state = AppState {
        study_service,
        max_upload_bytes: config.server.max_upload_bytes,
    };

    let app = create_router(state).layer(ServiceBuilder::new().layer(CorsLayer::permissive()));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    log_system_event!(startup, component = "server", format!("Listening on {}", addr));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log_system_event!(shutdown, component = "server", "Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}

fn setup_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::fmt;

    let env_filter = EnvFilter::try_new(&config.level).unwrap_or_else(|e| {
        eprintln!("Warning: invalid log filter '{}': {}", config.level, e);
        EnvFilter::new("info,study_forge=debug")
    });

    let console_layer = config.console_enabled.then(|| {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(true)
            .boxed()
    });

    let mut guard = None;
    let file_layer = if config.file_enabled {
        std::fs::create_dir_all(&config.log_directory).unwrap_or_else(|e| {
            eprintln!("Warning: Could not create log directory '{}': {}", config.log_directory, e);
        });

        let file_appender = tracing_appender::rolling::daily(&config.log_directory, "study-forge.log");
        let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(file_guard);

        Some(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_writer(non_blocking_file)
                .boxed(),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    info!(
        console = config.console_enabled,
        file = config.file_enabled,
        directory = %config.log_directory,
        "Logging initialized"
    );

    Ok(guard)
}
