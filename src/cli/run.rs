use crate::carrier::{self, CarrierError};
use crate::config::parse::{load_config, ConfigError};
use crate::config::types::Config;
use crate::dispatch::{BatchEngine, EngineSettings};
use crate::gate::RequestGate;
use crate::progress::ProgressPublisher;
use crate::storage::{DuckDbStore, OutcomeRecorder, OutcomeStore, StorageError};
use crate::web::{run_server, AppState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// How long shutdown waits on in-flight batches and open connections
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("carrier error: {0}")]
    Carrier(#[from] CarrierError),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("web server error: {0}")]
    WebServer(String),
}

/// The long-lived pieces shared by the server and the `send` command
pub struct Services {
    pub engine: Arc<BatchEngine>,
    pub gate: Arc<RequestGate>,
    pub store: Arc<dyn OutcomeStore>,
    pub recorder: OutcomeRecorder,
}

impl Services {
    pub async fn build(config: &Config) -> Result<Self, RunError> {
        info!(path = %config.storage.path.display(), "Initializing storage");
        let store: Arc<dyn OutcomeStore> = Arc::new(DuckDbStore::new(&config.storage.path)?);
        store.init_schema().await?;

        info!(carrier = config.carrier.kind(), "Creating carrier gateway");
        let carrier = carrier::from_config(&config.carrier)?;

        let recorder = OutcomeRecorder::new(Arc::clone(&store));
        let engine = Arc::new(BatchEngine::new(
            carrier,
            recorder.clone(),
            ProgressPublisher::new(config.dispatch.observer_buffer),
            EngineSettings::from(&config.dispatch),
        ));
        let gate = Arc::new(RequestGate::new(Arc::clone(&engine), &config.rate_limit));

        Ok(Self {
            engine,
            gate,
            store,
            recorder,
        })
    }
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ~/.config/smsbatch/config.yml");
            eprintln!("  /etc/smsbatch/config.yml");
            eprintln!("\nUse --config <path> to specify a config file, or run 'smsbatch config init' to generate one.");
            std::process::exit(1);
        }
    };

    run_service(&config_path).await.map_err(|e| e.into())
}

async fn run_service(config_path: &Path) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(config_path)?;

    let services = Services::build(&config).await?;
    let state = AppState::new(Arc::clone(&services.gate), Arc::clone(&services.store));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    info!("Starting web server on {}", config.server.listen);
    let listen = config.server.listen.clone();
    let mut web_handle = tokio::spawn(async move {
        run_server(state, &listen, shutdown_rx)
            .await
            .map_err(|e| RunError::WebServer(e.to_string()))
    });

    info!("Service started, press Ctrl+C to shutdown");

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
        result = &mut web_handle => {
            // Server exited on its own, usually a bind failure
            return result?;
        }
    }

    // Stop sending first so every batch reaches a final status
    services.engine.cancel_all();
    let in_flight: Vec<_> = services
        .engine
        .list_batches()
        .into_iter()
        .filter(|b| !b.status.is_terminal())
        .map(|b| b.batch_id)
        .collect();
    for batch_id in in_flight {
        if tokio::time::timeout(SHUTDOWN_GRACE, services.engine.wait(batch_id))
            .await
            .is_err()
        {
            warn!(batch_id = %batch_id, "Batch did not stop before shutdown");
        }
    }

    if tokio::time::timeout(SHUTDOWN_GRACE, services.recorder.flush())
        .await
        .is_err()
    {
        warn!("Message log writer did not drain before shutdown");
    }

    let _ = shutdown_tx.send(true);

    // Progress streams keep connections open indefinitely
    match tokio::time::timeout(SHUTDOWN_GRACE, &mut web_handle).await {
        Ok(Ok(Ok(()))) => info!("Web server stopped"),
        Ok(Ok(Err(e))) => error!(error = %e, "Web server error"),
        Ok(Err(e)) => error!(error = %e, "Web server join error"),
        Err(_) => {
            warn!("Web server did not drain in time, aborting");
            web_handle.abort();
        }
    }

    info!("Shutdown complete");
    Ok(())
}
