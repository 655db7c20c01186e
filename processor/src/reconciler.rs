use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use data_model::{GatherRequest, JobPhase, ObjectKey, ProxySpec, ReconcileCondition};
use gather_utils::Clock;
use metrics::{reconciler_metrics, Timer};
use state_store::ResourceStore;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    error::ReconcileError,
    gc,
    initializer,
    job_materializer::{self, TemplateEngine},
    job_reconciler::{self, JobPresence},
    status_propagator,
    validator,
};

pub const REASON_VALIDATION_FAILED: &str = "ValidationFailed";

/// Read-only settings fixed at startup.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub default_image: String,
    pub retention: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The request no longer exists.
    NotFound,
    /// The request failed validation and waits for a spec change.
    Invalid,
    /// The request and its job were deleted.
    Collected,
    /// Defaults were persisted; the resulting update triggers the next pass.
    Initialized,
    JobCreated,
    Observed(JobPhase),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileResult {
    pub outcome: ReconcileOutcome,
    pub requeue_after: Option<Duration>,
}

impl ReconcileResult {
    fn done(outcome: ReconcileOutcome) -> Self {
        Self {
            outcome,
            requeue_after: None,
        }
    }
}

/// Unit of work the dispatcher drives.
#[async_trait]
pub trait ReconcileHandler: Send + Sync + 'static {
    async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileResult, ReconcileError>;
}

/// Maps the observed state of one gather request to the next corrective
/// action. Holds no per-request state, so passes for different requests can
/// run concurrently.
pub struct Reconciler {
    store: Arc<dyn ResourceStore>,
    template_engine: Arc<dyn TemplateEngine>,
    clock: Arc<dyn Clock>,
    metrics: Arc<reconciler_metrics::Metrics>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        template_engine: Arc<dyn TemplateEngine>,
        clock: Arc<dyn Clock>,
        metrics: Arc<reconciler_metrics::Metrics>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            template_engine,
            clock,
            metrics,
            config,
        }
    }

    pub fn metrics(&self) -> &reconciler_metrics::Metrics {
        &self.metrics
    }

    /// One reconciliation pass. Performs at most one request read, one spec
    /// update, one job read, one job create and one status update.
    pub async fn reconcile_request(
        &self,
        key: &ObjectKey,
    ) -> Result<ReconcileResult, ReconcileError> {
        let _timer = Timer::start(&self.metrics.reconcile_duration);
        let span = info_span!("reconcile", namespace = %key.namespace, name = %key.name);
        self.run_pass(key).instrument(span).await
    }

    async fn run_pass(&self, key: &ObjectKey) -> Result<ReconcileResult, ReconcileError> {
        let mut request = match self.store.get_request(key).await {
            Ok(request) => request,
            Err(err) if err.is_not_found() => {
                debug!("gather request no longer exists");
                return Ok(ReconcileResult::done(ReconcileOutcome::NotFound));
            }
            Err(err) => {
                error!(error = %err, "unable to read gather request");
                self.metrics.record_error("store");
                return Err(err.into());
            }
        };
        info!("reconciling gather request");
        let now = self.clock.now_ms();

        if let Err(err) = validator::validate(&request) {
            warn!(error = %err, "gather request is invalid");
            self.metrics.record_error("validation");
            let condition = ReconcileCondition::error(REASON_VALIDATION_FAILED, err.to_string(), now);
            self.persist_condition(&mut request, condition).await?;
            return Ok(ReconcileResult::done(ReconcileOutcome::Invalid));
        }

        if gc::should_collect(&request, now, self.config.retention) {
            info!(retention = ?self.config.retention, "retention elapsed, collecting gather request");
            if let Err(err) = gc::collect(self.store.as_ref(), &request).await {
                return self.manage_error(request, err.into(), now).await;
            }
            return Ok(ReconcileResult::done(ReconcileOutcome::Collected));
        }

        let platform_proxy = self.platform_proxy_for(&request).await;
        if initializer::initialize(
            &mut request,
            &self.config.default_image,
            platform_proxy.as_ref(),
        ) {
            info!("applying defaults to gather request");
            if let Err(err) = self.store.update_request_spec(&request).await {
                error!(error = %err, "unable to update gather request");
                return self.manage_error(request, err.into(), now).await;
            }
            return Ok(ReconcileResult::done(ReconcileOutcome::Initialized));
        }

        let job = match job_materializer::materialize(self.template_engine.as_ref(), &request) {
            Ok(job) => job,
            Err(err) => {
                error!(error = %err, "unable to render execution job");
                return self.manage_error(request, err.into(), now).await;
            }
        };

        let presence =
            match job_reconciler::ensure_job(self.store.as_ref(), job, &self.metrics.lifecycle)
                .await
            {
                Ok(presence) => presence,
                Err(err) => return self.manage_error(request, err.into(), now).await,
            };

        let before = request.status.clone();
        let (outcome, changed) = match presence {
            JobPresence::Created => (
                ReconcileOutcome::JobCreated,
                status_propagator::job_created(&mut request.status, now),
            ),
            JobPresence::AlreadyExists(job_status) => (
                ReconcileOutcome::Observed(job_status.phase()),
                status_propagator::propagate(&mut request.status, &job_status, now),
            ),
        };

        if changed {
            if let Err(err) = self.store.update_request_status(&request).await {
                error!(error = %err, "unable to update gather request status");
                self.metrics.record_error("store");
                return Err(err.into());
            }
            if status_propagator::newly_failed(&before, &request.status) {
                self.metrics.lifecycle.request_errored();
            }
        }

        Ok(ReconcileResult {
            outcome,
            requeue_after: gc::requeue_after(&request, now, self.config.retention),
        })
    }

    /// The platform proxy is only consulted while the request has no proxy of
    /// its own and no job yet. A failed lookup leaves the proxy unset for this
    /// pass.
    async fn platform_proxy_for(&self, request: &GatherRequest) -> Option<ProxySpec> {
        if request.status.job_created || !request.spec.proxy.is_unset() {
            return None;
        }
        match self.store.get_platform_proxy().await {
            Ok(proxy) => Some(proxy),
            Err(err) => {
                warn!(error = %err, "unable to find platform proxy configuration");
                None
            }
        }
    }

    /// Records the error on the request status and hands it back to the
    /// dispatcher for a retry.
    async fn manage_error(
        &self,
        mut request: GatherRequest,
        err: ReconcileError,
        now_ms: u64,
    ) -> Result<ReconcileResult, ReconcileError> {
        self.metrics.record_error(err.kind());
        let condition = ReconcileCondition::error(err.reason(), err.to_string(), now_ms);
        if let Err(status_err) = self.persist_condition(&mut request, condition).await {
            warn!(error = %status_err, "unable to record error on gather request status");
        }
        Err(err)
    }

    async fn persist_condition(
        &self,
        request: &mut GatherRequest,
        condition: ReconcileCondition,
    ) -> Result<(), ReconcileError> {
        let before = request.status.clone();
        request.status.set_condition(condition);
        if request.status == before {
            return Ok(());
        }
        self.store.update_request_status(request).await?;
        Ok(())
    }
}

#[async_trait]
impl ReconcileHandler for Reconciler {
    async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileResult, ReconcileError> {
        self.reconcile_request(key).await
    }
}
