//! Main runner for the paflow service.
//!
//! Wires configuration, constructs the core components, spawns the encounter
//! poller and processor background tasks, and serves the REST API. All loops
//! observe one shutdown signal so Ctrl-C drains cleanly without leaking
//! background work.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::{router, ApiConfig, AppState};
use ehr::HttpEhrClient;
use paflow_core::auth::{
    ClientCredentialsConfig, ClientCredentialsStrategy, ContextTokenStrategy, HttpTokenEndpoint,
    SystemClock, TokenStrategyResolver,
};
use paflow_core::{
    AggregatorConfig, CachedAnalysisClient, ClinicalDataAggregator, CoreConfig, EncounterPoller,
    EncounterProcessor, HttpAnalysisClient, NotificationHub, PatientRegistry, PollerConfig,
    ProcessorConfig, WorkItemStore,
};

/// Main entry point for the paflow application.
///
/// Runs three things concurrently:
/// - the REST server (default 0.0.0.0:3000, configurable via `PAFLOW_REST_ADDR`)
/// - the encounter poller loop
/// - the encounter processor loop
///
/// # Environment Variables
/// - `PAFLOW_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `EHR_BASE_URL`: Clinical gateway base URL
/// - `ANALYSIS_BASE_URL`: Analysis service base URL
/// - `TOKEN_URL`, `CLIENT_ID`, `CLIENT_SECRET`: client-credentials grant
/// - `POLL_INTERVAL_SECS`: poll cadence in seconds (default: 4)
/// - `POLL_STAGGER_MS`: per-patient pause within a cycle (default: none)
/// - `OBSERVATION_LOOKBACK_MONTHS`: observation history window (default: 12)
/// - `PROCEDURE_LOOKBACK_MONTHS`: procedure history window (default: 24)
/// - `PA_REQUIRED_CODES`: comma-separated CPT codes requiring PA
/// - `CORS_ORIGINS`: comma-separated allowed origins (default: permissive)
/// - `API_KEY`: expected `x-api-key` value (default: no check)
///
/// # Returns
/// * `Ok(())` - after a clean shutdown
/// * `Err(anyhow::Error)` - if startup or runtime fails
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("paflow=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr = std::env::var("PAFLOW_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    tracing::info!("++ Starting paflow REST on {}", rest_addr);

    let cfg = build_config()?;

    let tokens = Arc::new(TokenStrategyResolver::new(vec![
        Arc::new(ContextTokenStrategy),
        Arc::new(ClientCredentialsStrategy::new(
            Arc::new(HttpTokenEndpoint::new(cfg.credentials().clone())),
            Arc::new(SystemClock),
        )),
    ]));

    let ehr_client = Arc::new(HttpEhrClient::new(cfg.ehr_base_url()));
    let aggregator = ClinicalDataAggregator::new(
        ehr_client.clone(),
        tokens.clone(),
        cfg.aggregator().clone(),
    );
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

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let poller = EncounterPoller::new(
        registry.clone(),
        ehr_client,
        tokens,
        event_tx,
        cfg.poller().clone(),
    );
    let poller_task = tokio::spawn(poller.run(shutdown_rx.clone()));
    let processor_task = tokio::spawn(processor.clone().run(event_rx, shutdown_rx.clone()));

    let api_config = Arc::new(ApiConfig {
        cors_origins: env_list("CORS_ORIGINS"),
        api_key: std::env::var("API_KEY").ok(),
    });
    let app = router(AppState {
        registry,
        store,
        processor,
        hub,
        config: api_config,
    });

    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    // Stop the background loops and wait for them to drain.
    let _ = shutdown_tx.send(true);
    poller_task.await?;
    processor_task.await?;

    Ok(())
}

/// Resolve core configuration from the environment, once, at startup.
fn build_config() -> anyhow::Result<CoreConfig> {
    let poller = PollerConfig {
        interval: Duration::from_secs(env_parse("POLL_INTERVAL_SECS", 4)?),
        stagger: match std::env::var("POLL_STAGGER_MS") {
            Ok(raw) => Some(Duration::from_millis(raw.parse()?)),
            Err(_) => None,
        },
    };

    let aggregator = AggregatorConfig {
        observation_lookback_months: env_parse("OBSERVATION_LOOKBACK_MONTHS", 12)?,
        procedure_lookback_months: env_parse("PROCEDURE_LOOKBACK_MONTHS", 24)?,
    };

    let mut processor = ProcessorConfig::default();
    let extra_codes = env_list("PA_REQUIRED_CODES");
    if !extra_codes.is_empty() {
        processor.pa_required_codes = extra_codes.into_iter().collect();
    }

    let cfg = CoreConfig::new(
        std::env::var("EHR_BASE_URL").unwrap_or_else(|_| "http://localhost:8080".into()),
        std::env::var("ANALYSIS_BASE_URL").unwrap_or_else(|_| "http://localhost:8000".into()),
        ClientCredentialsConfig {
            token_url: std::env::var("TOKEN_URL")
                .unwrap_or_else(|_| "http://localhost:8080/oauth/token".into()),
            client_id: std::env::var("CLIENT_ID").unwrap_or_else(|_| "paflow".into()),
            client_secret: std::env::var("CLIENT_SECRET").unwrap_or_else(|_| "dev-secret".into()),
        },
        poller,
        aggregator,
        processor,
    )?;

    Ok(cfg)
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => Ok(raw.parse()?),
        Err(_) => Ok(default),
    }
}

fn env_list(name: &str) -> Vec<String> {
    std::env::var(name)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
