use async_trait::async_trait;
use data_model::{ExecutionJob, GatherRequest, ObjectKey, ProxySpec, WatchEvent};
use strum::{AsRefStr, Display};
use thiserror::Error;
use tokio::sync::broadcast;

pub mod in_memory;

pub use in_memory::{InMemoryStore, OperationCounts, StoreOperation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
pub enum ResourceKind {
    GatherRequest,
    ExecutionJob,
    PlatformProxy,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: ResourceKind, key: ObjectKey },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: ResourceKind, key: ObjectKey },

    #[error("conflict writing {kind} {key}: resource version {expected} is stale, current is {current}")]
    Conflict {
        kind: ResourceKind,
        key: ObjectKey,
        expected: u64,
        current: u64,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn not_found(kind: ResourceKind, key: &ObjectKey) -> Self {
        StoreError::NotFound {
            kind,
            key: key.clone(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Resource store consumed by the reconciler. Every call is a single
/// round-trip; the reconciler never retries locally.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_request(&self, key: &ObjectKey) -> StoreResult<GatherRequest>;

    async fn list_requests(&self) -> StoreResult<Vec<GatherRequest>>;

    async fn create_request(&self, request: GatherRequest) -> StoreResult<GatherRequest>;

    /// Persists `request.spec`. The status of the stored object is left
    /// untouched. Fails with `Conflict` when `request` was read at an older
    /// resource version.
    async fn update_request_spec(&self, request: &GatherRequest) -> StoreResult<GatherRequest>;

    /// Persists `request.status` only.
    async fn update_request_status(&self, request: &GatherRequest) -> StoreResult<GatherRequest>;

    async fn delete_request(&self, key: &ObjectKey) -> StoreResult<()>;

    async fn get_job(&self, key: &ObjectKey) -> StoreResult<ExecutionJob>;

    async fn create_job(&self, job: ExecutionJob) -> StoreResult<ExecutionJob>;

    async fn delete_job(&self, key: &ObjectKey) -> StoreResult<()>;

    /// Cluster-wide proxy settings.
    async fn get_platform_proxy(&self) -> StoreResult<ProxySpec>;

    /// Whether deleting a request also removes the job it owns.
    fn supports_cascading_delete(&self) -> bool;

    fn watch(&self) -> broadcast::Receiver<WatchEvent>;
}
