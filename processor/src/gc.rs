use std::time::Duration;

use data_model::GatherRequest;
use gather_utils::elapsed_since;
use state_store::{ResourceStore, StoreError};
use tracing::{debug, info};

use crate::job_materializer::job_identity;

/// True once a completed request is strictly older than `retention`.
pub fn should_collect(request: &GatherRequest, now_ms: u64, retention: Duration) -> bool {
    request.status.completed &&
        elapsed_since(request.metadata.creation_timestamp, now_ms) > retention
}

/// How long until a completed request becomes collectable, so the dispatcher
/// can come back without waiting for an event. `None` for requests that are
/// not completed yet.
pub fn requeue_after(request: &GatherRequest, now_ms: u64, retention: Duration) -> Option<Duration> {
    if !request.status.completed {
        return None;
    }
    let age = elapsed_since(request.metadata.creation_timestamp, now_ms);
    Some(retention.saturating_sub(age) + Duration::from_secs(1))
}

/// Deletes the request. Without cascading deletion in the store the job is
/// deleted first so it is never orphaned. Objects that are already gone are
/// skipped.
pub async fn collect(store: &dyn ResourceStore, request: &GatherRequest) -> Result<(), StoreError> {
    if !store.supports_cascading_delete() {
        let job_key = job_identity(request);
        match store.delete_job(&job_key).await {
            Ok(()) => info!(job = %job_key, "deleted execution job"),
            Err(err) if err.is_not_found() => debug!(job = %job_key, "execution job already gone"),
            Err(err) => return Err(err),
        }
    }

    match store.delete_request(&request.key()).await {
        Ok(()) => {
            info!("deleted gather request");
            Ok(())
        }
        Err(err) if err.is_not_found() => Ok(()),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use data_model::{
        test_objects::tests::{mock_initialized_request, test_key},
        ExecutionJob,
        ObjectMeta,
        OwnerReference,
    };
    use state_store::{InMemoryStore, StoreOperation};

    use super::*;

    const RETENTION: Duration = Duration::from_secs(6 * 60 * 60);
    const CREATED_AT: u64 = 1_000_000;

    fn completed_request() -> GatherRequest {
        let mut request = mock_initialized_request("diag-1");
        request.metadata.creation_timestamp = CREATED_AT;
        request.status.completed = true;
        request
    }

    fn boundary() -> u64 {
        CREATED_AT + RETENTION.as_millis() as u64
    }

    #[test]
    fn test_retention_boundary() {
        let request = completed_request();
        assert!(!should_collect(&request, boundary() - 1_000, RETENTION));
        assert!(!should_collect(&request, boundary(), RETENTION));
        assert!(should_collect(&request, boundary() + 1_000, RETENTION));
    }

    #[test]
    fn test_incomplete_request_is_never_collected() {
        let mut request = completed_request();
        request.status.completed = false;
        assert!(!should_collect(&request, boundary() * 10, RETENTION));
        assert_eq!(requeue_after(&request, boundary(), RETENTION), None);
    }

    #[test]
    fn test_requeue_after_lands_past_boundary() {
        let request = completed_request();
        let now = CREATED_AT + 60_000;
        let delay = requeue_after(&request, now, RETENTION).unwrap();
        assert!(should_collect(
            &request,
            now + delay.as_millis() as u64,
            RETENTION
        ));
    }

    async fn seeded_store(store: InMemoryStore) -> Result<(InMemoryStore, GatherRequest)> {
        let request = store
            .create_request(mock_initialized_request("diag-1"))
            .await?;
        store
            .create_job(ExecutionJob {
                metadata: ObjectMeta::new(&request.key()),
                owner: OwnerReference {
                    name: request.metadata.name.clone(),
                    uid: request.metadata.uid.clone(),
                },
                ..Default::default()
            })
            .await?;
        Ok((store, request))
    }

    #[tokio::test]
    async fn test_collect_deletes_job_then_request() -> Result<()> {
        let (store, request) = seeded_store(InMemoryStore::default()).await?;
        collect(&store, &request).await?;
        assert!(!store.contains_job(&test_key("diag-1")).await);
        assert!(!store.contains_request(&test_key("diag-1")).await);
        assert_eq!(store.counts().job_deletes, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_collect_relies_on_cascade_when_available() -> Result<()> {
        let (store, request) =
            seeded_store(InMemoryStore::default().with_cascading_delete()).await?;
        collect(&store, &request).await?;
        assert_eq!(store.counts().job_deletes, 0);
        assert!(!store.contains_job(&test_key("diag-1")).await);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_job_delete_keeps_request() -> Result<()> {
        let (store, request) = seeded_store(InMemoryStore::default()).await?;
        store.fail_next(StoreOperation::DeleteJob);
        assert!(collect(&store, &request).await.is_err());
        assert!(store.contains_request(&test_key("diag-1")).await);

        collect(&store, &request).await?;
        collect(&store, &request).await?;
        assert!(!store.contains_request(&test_key("diag-1")).await);
        Ok(())
    }
}
