use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use data_model::test_objects::tests::{test_key, TEST_DEFAULT_IMAGE};
use gather_utils::{get_epoch_time_in_ms, ManualClock};
use processor::{job_materializer::JinjaTemplateEngine, reconciler::ReconcileResult};
use tokio::task::JoinHandle;
use tracing::subscriber;
use tracing_subscriber::{layer::SubscriberExt, Layer};

use crate::{config::OperatorConfig, service::Service};

pub struct TestOperator {
    pub service: Service,
    pub clock: Arc<ManualClock>,
}

impl TestOperator {
    /// An operator rendering the job template shipped in `templates/`, on a
    /// clock that only moves when the test advances it.
    pub fn new() -> Result<Self> {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"));
        let _ = subscriber::set_global_default(
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().with_filter(env_filter)),
        );

        let cfg = OperatorConfig {
            job_template_file_name: PathBuf::from(env!("CARGO_MANIFEST_DIR"))
                .join("templates/job.template.yaml"),
            default_execution_image: TEST_DEFAULT_IMAGE.to_string(),
            ..Default::default()
        };
        let template = JinjaTemplateEngine::from_file(&cfg.job_template_file_name)?;
        let clock = Arc::new(ManualClock::new(get_epoch_time_in_ms()));
        let service = Service::with_parts(cfg, Arc::new(template), clock.clone())?;

        Ok(Self { service, clock })
    }

    /// Runs a single pass for the request `name` in the test namespace.
    pub async fn reconcile(&self, name: &str) -> Result<ReconcileResult> {
        Ok(self
            .service
            .reconciler
            .reconcile_request(&test_key(name))
            .await?)
    }

    /// Runs the watch-driven controller in the background.
    pub fn start_controller(&self) -> JoinHandle<()> {
        let runner = self.service.runner.clone();
        let shutdown_rx = self.service.shutdown_rx.clone();
        tokio::spawn(async move { runner.start(shutdown_rx).await })
    }

    pub async fn stop_controller(&self, handle: JoinHandle<()>) -> Result<()> {
        self.service.shutdown_tx.send(())?;
        handle.await?;
        Ok(())
    }
}
