use std::{sync::Arc, time::Duration};

use state_store::{ResourceStore, StoreError};
use tokio::sync::{broadcast::error::RecvError, watch};
use tracing::{debug, error, info, warn};

use crate::{dispatcher::Dispatcher, event_filter::reconcile_key_for};

const RESYNC_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Feeds the dispatcher from the store's watch stream. Every known request
/// is queued once at startup and again whenever the stream drops events.
pub struct ControllerRunner {
    store: Arc<dyn ResourceStore>,
    dispatcher: Arc<Dispatcher>,
}

impl ControllerRunner {
    pub fn new(store: Arc<dyn ResourceStore>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { store, dispatcher }
    }

    pub async fn start(&self, mut shutdown_rx: watch::Receiver<()>) {
        info!("starting gather request controller");
        // subscribe before listing so nothing written in between is missed
        let mut events = self.store.watch();
        let mut resync_pending = true;

        loop {
            if resync_pending {
                match self.resync().await {
                    Ok(queued) => {
                        info!(queued, "queued existing gather requests");
                        resync_pending = false;
                    }
                    Err(err) => error!(error = %err, "unable to list gather requests"),
                }
            }

            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => {
                        if let Some(key) = reconcile_key_for(&event) {
                            debug!(key = %key, kind = %event.kind, "queueing reconcile");
                            self.dispatcher.enqueue(key);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "watch stream lagged, resyncing");
                        resync_pending = true;
                    }
                    Err(RecvError::Closed) => {
                        info!("watch stream closed");
                        break;
                    }
                },
                _ = tokio::time::sleep(RESYNC_RETRY_INTERVAL), if resync_pending => {},
                _ = shutdown_rx.changed() => {
                    info!("gather request controller shutting down");
                    break;
                }
            }
        }
        self.dispatcher.shutdown();
    }

    async fn resync(&self) -> Result<usize, StoreError> {
        let requests = self.store.list_requests().await?;
        let queued = requests.len();
        for request in requests {
            self.dispatcher.enqueue(request.key());
        }
        Ok(queued)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use data_model::test_objects::tests::{
        mock_initialized_request,
        running_job_status,
        test_key,
    };

    use super::*;
    use crate::{
        dispatcher::DispatcherConfig,
        status_propagator::{REASON_JOB_CREATED, REASON_JOB_RUNNING},
        testing::TestReconciler,
    };

    struct TestController {
        test: TestReconciler,
        dispatcher: Arc<Dispatcher>,
        shutdown_tx: watch::Sender<()>,
        handle: tokio::task::JoinHandle<()>,
    }

    impl TestController {
        fn start(test: TestReconciler) -> Self {
            let dispatcher = Dispatcher::new(test.reconciler.clone(), DispatcherConfig::default());
            let runner = ControllerRunner::new(test.store.clone(), dispatcher.clone());
            let (shutdown_tx, shutdown_rx) = watch::channel(());
            let handle = tokio::spawn(async move { runner.start(shutdown_rx).await });
            Self {
                test,
                dispatcher,
                shutdown_tx,
                handle,
            }
        }

        async fn wait_for_reason(&self, name: &str, reason: &str) -> Result<()> {
            for _ in 0..500 {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let request = self.test.store.get_request(&test_key(name)).await?;
                if request.status.reason() == Some(reason) {
                    return Ok(());
                }
            }
            anyhow::bail!("request {name} never reached {reason}")
        }

        async fn stop(self) -> Result<()> {
            self.shutdown_tx.send(())?;
            self.handle.await?;
            assert!(self.dispatcher.is_shutdown());
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_requests_are_picked_up() -> Result<()> {
        let test = TestReconciler::new()?;
        test.create(mock_initialized_request("diag-1")).await?;
        let controller = TestController::start(test);

        controller.wait_for_reason("diag-1", REASON_JOB_CREATED).await?;
        controller.stop().await
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_status_changes_reach_request() -> Result<()> {
        let controller = TestController::start(TestReconciler::new()?);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let key = controller
            .test
            .create(mock_initialized_request("diag-1"))
            .await?;
        controller.wait_for_reason("diag-1", REASON_JOB_CREATED).await?;

        controller
            .test
            .store
            .set_job_status(&key, running_job_status())
            .await?;
        controller.wait_for_reason("diag-1", REASON_JOB_RUNNING).await?;
        assert_eq!(controller.test.store.counts().job_creates, 1);
        controller.stop().await
    }
}
