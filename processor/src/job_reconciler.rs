use data_model::{ExecutionJob, JobStatus};
use metrics::reconciler_metrics::LifecycleCounters;
use state_store::{ResourceStore, StoreError};
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPresence {
    Created,
    AlreadyExists(JobStatus),
}

/// Makes sure the job exists. An existing job is only read: its spec is never
/// updated, whatever its outcome was.
pub async fn ensure_job(
    store: &dyn ResourceStore,
    job: ExecutionJob,
    lifecycle: &LifecycleCounters,
) -> Result<JobPresence, StoreError> {
    let key = job.key();
    match store.get_job(&key).await {
        Ok(existing) => return Ok(JobPresence::AlreadyExists(existing.status)),
        Err(err) if err.is_not_found() => {}
        Err(err) => {
            error!(job = %key, error = %err, "unable to look up execution job");
            return Err(err);
        }
    }

    match store.create_job(job).await {
        Ok(_) => {
            lifecycle.request_started();
            info!(job = %key, "created execution job");
            Ok(JobPresence::Created)
        }
        Err(err) if err.is_already_exists() => {
            // someone else created it between the lookup and the create, its
            // status is picked up on the next pass
            warn!(job = %key, "execution job appeared while creating it");
            Ok(JobPresence::Created)
        }
        Err(err) => {
            error!(job = %key, error = %err, "unable to create execution job");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use data_model::{
        test_objects::tests::{failed_job_status, mock_request, test_key},
        ObjectMeta,
        OwnerReference,
    };
    use state_store::{InMemoryStore, StoreOperation};

    use super::*;

    fn job(name: &str) -> ExecutionJob {
        ExecutionJob {
            metadata: ObjectMeta::new(&test_key(name)),
            owner: OwnerReference {
                name: name.to_string(),
                uid: "uid".to_string(),
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_creates_missing_job_once() -> Result<()> {
        let store = Arc::new(InMemoryStore::default());
        let lifecycle = LifecycleCounters::default();
        store.create_request(mock_request("diag-1")).await?;

        let presence = ensure_job(store.as_ref(), job("diag-1"), &lifecycle).await?;
        assert_eq!(presence, JobPresence::Created);
        assert_eq!(lifecycle.requests_started(), 1);

        let presence = ensure_job(store.as_ref(), job("diag-1"), &lifecycle).await?;
        assert_eq!(presence, JobPresence::AlreadyExists(JobStatus::default()));
        assert_eq!(lifecycle.requests_started(), 1);
        assert_eq!(store.counts().job_creates, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_job_is_not_recreated() -> Result<()> {
        let store = InMemoryStore::default();
        let lifecycle = LifecycleCounters::default();
        ensure_job(&store, job("diag-1"), &lifecycle).await?;
        store
            .set_job_status(&test_key("diag-1"), failed_job_status(Some(10)))
            .await?;

        let presence = ensure_job(&store, job("diag-1"), &lifecycle).await?;
        assert_eq!(
            presence,
            JobPresence::AlreadyExists(failed_job_status(Some(10)))
        );
        assert_eq!(store.counts().job_creates, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_lookup_failure_is_propagated() {
        let store = InMemoryStore::default();
        let lifecycle = LifecycleCounters::default();
        store.fail_next(StoreOperation::GetJob);

        let err = ensure_job(&store, job("diag-1"), &lifecycle)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert_eq!(store.counts().job_creates, 0);
        assert_eq!(lifecycle.requests_started(), 0);
    }

    #[tokio::test]
    async fn test_create_failure_does_not_count_as_started() {
        let store = InMemoryStore::default();
        let lifecycle = LifecycleCounters::default();
        store.fail_next(StoreOperation::CreateJob);

        assert!(ensure_job(&store, job("diag-1"), &lifecycle).await.is_err());
        assert_eq!(lifecycle.requests_started(), 0);
    }
}
