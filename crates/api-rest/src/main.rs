//! Standalone REST API server binary.
//!
//! ## Purpose
//! Runs the REST API server on its own, without the background encounter
//! poller.
//!
//! ## Intended use
//! Useful for development and debugging when you only want the REST surface
//! (with OpenAPI/Swagger UI): work-item queries, explicit re-hydration and
//! the notification stream all work. The workspace's main `paflow-run`
//! binary additionally runs the poller and processor loops.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::{router, ApiConfig, AppState};
use ehr::HttpEhrClient;
use paflow_core::auth::{
    ClientCredentialsConfig, ClientCredentialsStrategy, ContextTokenStrategy, HttpTokenEndpoint,
    SystemClock, TokenStrategyResolver,
};
use paflow_core::{
    AggregatorConfig, CachedAnalysisClient, ClinicalDataAggregator, CoreConfig,
    EncounterProcessor, HttpAnalysisClient, NotificationHub, PatientRegistry, PollerConfig,
    ProcessorConfig, WorkItemStore,
};

/// Main entry point for the paflow REST API server.
///
/// Starts the REST API server on the configured address (default:
/// 0.0.0.0:3000) with OpenAPI/Swagger documentation.
///
/// # Environment Variables
/// - `PAFLOW_REST_ADDR`: Server address (default: "0.0.0.0:3000")
/// - `EHR_BASE_URL`: Clinical gateway base URL
/// - `ANALYSIS_BASE_URL`: Analysis service base URL
/// - `TOKEN_URL`, `CLIENT_ID`, `CLIENT_SECRET`: client-credentials grant
/// - `CORS_ORIGINS`: comma-separated allowed origins (default: permissive)
/// - `API_KEY`: expected `x-api-key` value (default: no check)
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - required configuration is missing or invalid, or
/// - the server address cannot be bound.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = std::env::var("PAFLOW_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    tracing::info!("-- Starting paflow REST API on {}", addr);

    let cfg = CoreConfig::new(
        std::env::var("EHR_BASE_URL").unwrap_or_else(|_| "http://localhost:8080".into()),
        std::env::var("ANALYSIS_BASE_URL").unwrap_or_else(|_| "http://localhost:8000".into()),
        ClientCredentialsConfig {
            token_url: std::env::var("TOKEN_URL")
                .unwrap_or_else(|_| "http://localhost:8080/oauth/token".into()),
            client_id: std::env::var("CLIENT_ID").unwrap_or_else(|_| "paflow".into()),
            client_secret: std::env::var("CLIENT_SECRET").unwrap_or_else(|_| "dev-secret".into()),
        },
        PollerConfig::default(),
        AggregatorConfig::default(),
        ProcessorConfig::default(),
    )?;

    let tokens = Arc::new(TokenStrategyResolver::new(vec![
        Arc::new(ContextTokenStrategy),
        Arc::new(ClientCredentialsStrategy::new(
            Arc::new(HttpTokenEndpoint::new(cfg.credentials().clone())),
            Arc::new(SystemClock),
        )),
    ]));

    let ehr_client = Arc::new(HttpEhrClient::new(cfg.ehr_base_url()));
    let aggregator =
        ClinicalDataAggregator::new(ehr_client, tokens, cfg.aggregator().clone());
    let analysis = Arc::new(CachedAnalysisClient::new(Arc::new(HttpAnalysisClient::new(
        cfg.analysis_base_url(),
    ))));

    let registry = Arc::new(PatientRegistry::new());
    let store = Arc::new(WorkItemStore::new());
    let hub = Arc::new(NotificationHub::new());
    let processor = Arc::new(EncounterProcessor::new(
        aggregator,
        analysis,
        store.clone(),
        hub.clone(),
        cfg.processor().clone(),
    ));

    let api_config = Arc::new(ApiConfig {
        cors_origins: std::env::var("CORS_ORIGINS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default(),
        api_key: std::env::var("API_KEY").ok(),
    });

    let app = router(AppState {
        registry,
        store,
        processor,
        hub,
        config: api_config,
    });

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
