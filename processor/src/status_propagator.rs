use data_model::{GatherRequestStatus, JobPhase, JobStatus, ReconcileCondition};
use tracing::info;

pub const REASON_JOB_CREATED: &str = "JobCreated";
pub const REASON_JOB_PENDING: &str = "JobPending";
pub const REASON_JOB_RUNNING: &str = "JobRunning";
pub const REASON_JOB_SUCCEEDED: &str = "JobSucceeded";
pub const REASON_JOB_FAILED: &str = "JobFailed";

/// Status right after the job was created. Returns true if it changed.
pub fn job_created(status: &mut GatherRequestStatus, now_ms: u64) -> bool {
    let before = status.clone();
    status.job_created = true;
    status.set_condition(ReconcileCondition::success(
        REASON_JOB_CREATED,
        "execution job created",
        now_ms,
    ));
    *status != before
}

/// Derives the request status from the job status. `completed` and
/// `failure_recorded` only ever go from false to true. Returns true if the
/// status changed.
pub fn propagate(status: &mut GatherRequestStatus, job_status: &JobStatus, now_ms: u64) -> bool {
    let before = status.clone();
    status.job_created = true;
    status.completed = status.completed || job_status.is_finished();

    let (reason, message) = match job_status.phase() {
        JobPhase::Active => {
            info!(active = job_status.active, "gather job pods are still running");
            (REASON_JOB_RUNNING, "execution job is running")
        }
        JobPhase::Succeeded => {
            info!(succeeded = job_status.succeeded, "gather job pods succeeded");
            (REASON_JOB_SUCCEEDED, "execution job succeeded")
        }
        JobPhase::Failed => {
            info!(failed = job_status.failed, "gather job pods failed");
            status.failure_recorded = true;
            (REASON_JOB_FAILED, "execution job failed")
        }
        JobPhase::Pending => (REASON_JOB_PENDING, "execution job has not started"),
    };
    status.set_condition(ReconcileCondition::success(reason, message, now_ms));

    *status != before
}

/// True when `after` is the first status to record a failed job.
pub fn newly_failed(before: &GatherRequestStatus, after: &GatherRequestStatus) -> bool {
    !before.failure_recorded && after.failure_recorded
}
