use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use data_model::GatherRequest;
use gather_utils::{Clock, SystemClock};
use metrics::reconciler_metrics;
use processor::{
    dispatcher::{Dispatcher, DispatcherConfig},
    job_materializer::{JinjaTemplateEngine, TemplateEngine},
    reconciler::{Reconciler, ReconcilerConfig},
    runner::ControllerRunner,
};
use state_store::{InMemoryStore, ResourceStore};
use tokio::{signal, sync::watch};
use tracing::{error, info};

use crate::config::OperatorConfig;

pub struct Service {
    pub config: OperatorConfig,
    pub store: Arc<InMemoryStore>,
    pub reconciler: Arc<Reconciler>,
    pub dispatcher: Arc<Dispatcher>,
    pub runner: Arc<ControllerRunner>,
    pub shutdown_tx: watch::Sender<()>,
    pub shutdown_rx: watch::Receiver<()>,
}

impl Service {
    pub fn new(config: OperatorConfig) -> Result<Self> {
        let template = JinjaTemplateEngine::from_file(&config.job_template_file_name)?;
        Self::with_parts(config, Arc::new(template), Arc::new(SystemClock))
    }

    /// Wires the controller around an in-memory store that reads `clock`.
    pub fn with_parts(
        config: OperatorConfig,
        template_engine: Arc<dyn TemplateEngine>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(());

        let store = Arc::new(InMemoryStore::new(clock.clone()).with_cascading_delete());
        let metrics = Arc::new(reconciler_metrics::Metrics::new());
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            template_engine,
            clock,
            metrics,
            ReconcilerConfig {
                default_image: config.default_execution_image.clone(),
                retention: config.garbage_collection_delay,
            },
        ));
        let dispatcher = Dispatcher::new(
            reconciler.clone(),
            DispatcherConfig {
                max_concurrent_reconciles: config.max_concurrent_reconciles,
                base_backoff: config.dispatcher.base_backoff,
                max_backoff: config.dispatcher.max_backoff,
            },
        );
        let runner = Arc::new(ControllerRunner::new(store.clone(), dispatcher.clone()));

        Ok(Self {
            config,
            store,
            reconciler,
            dispatcher,
            runner,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Submits the request manifests at `paths` to the store.
    pub async fn seed_requests(&self, paths: &[PathBuf]) -> Result<()> {
        for path in paths {
            let request = load_request(path)?;
            let created = self
                .store
                .create_request(request)
                .await
                .with_context(|| format!("error submitting {}", path.display()))?;
            info!(request = %created.key(), "submitted gather request");
        }
        Ok(())
    }

    /// Runs the controller until a shutdown signal is received.
    pub async fn start(&self) -> Result<()> {
        info!(
            template = %self.config.job_template_file_name.display(),
            default_image = %self.config.default_execution_image,
            retention = ?self.config.garbage_collection_delay,
            "starting gather operator"
        );
        let shutdown_tx = self.shutdown_tx.clone();
        tokio::spawn(async move {
            shutdown_signal(shutdown_tx).await;
        });

        self.runner.start(self.shutdown_rx.clone()).await;
        info!("gather operator stopped");
        Ok(())
    }
}

fn load_request(path: &Path) -> Result<GatherRequest> {
    let manifest = std::fs::read_to_string(path)
        .with_context(|| format!("error reading request manifest {}", path.display()))?;
    let request: GatherRequest = serde_yaml::from_str(&manifest)
        .with_context(|| format!("error parsing request manifest {}", path.display()))?;
    Ok(request)
}

async fn shutdown_signal(shutdown_tx: watch::Sender<()>) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("signal received, shutting down gracefully");
    if shutdown_tx.send(()).is_err() {
        error!("controller already stopped");
    }
}
