use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
        Mutex,
    },
};

use async_trait::async_trait;
use data_model::{
    ExecutionJob,
    GatherRequest,
    JobStatus,
    ObjectKey,
    ProxySpec,
    Resource,
    WatchEvent,
};
use gather_utils::{Clock, SystemClock};
use strum::Display;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, trace};

use crate::{ResourceKind, ResourceStore, StoreError, StoreResult};

const WATCH_CHANNEL_CAPACITY: usize = 1024;

/// Store calls that can be failed on purpose with [`InMemoryStore::fail_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum StoreOperation {
    GetRequest,
    UpdateRequestSpec,
    UpdateRequestStatus,
    DeleteRequest,
    GetJob,
    CreateJob,
    DeleteJob,
    GetPlatformProxy,
}

/// Snapshot of how many times each store call was made.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationCounts {
    pub request_reads: u64,
    pub request_spec_updates: u64,
    pub request_status_updates: u64,
    pub request_deletes: u64,
    pub job_reads: u64,
    pub job_creates: u64,
    pub job_deletes: u64,
    pub proxy_reads: u64,
}

impl OperationCounts {
    /// Calls that write to the store.
    pub fn mutations(&self) -> u64 {
        self.request_spec_updates +
            self.request_status_updates +
            self.request_deletes +
            self.job_creates +
            self.job_deletes
    }

    /// Per-field difference against an earlier snapshot.
    pub fn since(&self, earlier: &OperationCounts) -> OperationCounts {
        OperationCounts {
            request_reads: self.request_reads - earlier.request_reads,
            request_spec_updates: self.request_spec_updates - earlier.request_spec_updates,
            request_status_updates: self.request_status_updates - earlier.request_status_updates,
            request_deletes: self.request_deletes - earlier.request_deletes,
            job_reads: self.job_reads - earlier.job_reads,
            job_creates: self.job_creates - earlier.job_creates,
            job_deletes: self.job_deletes - earlier.job_deletes,
            proxy_reads: self.proxy_reads - earlier.proxy_reads,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    request_reads: AtomicU64,
    request_spec_updates: AtomicU64,
    request_status_updates: AtomicU64,
    request_deletes: AtomicU64,
    job_reads: AtomicU64,
    job_creates: AtomicU64,
    job_deletes: AtomicU64,
    proxy_reads: AtomicU64,
}

impl Counters {
    fn counter(&self, op: StoreOperation) -> &AtomicU64 {
        match op {
            StoreOperation::GetRequest => &self.request_reads,
            StoreOperation::UpdateRequestSpec => &self.request_spec_updates,
            StoreOperation::UpdateRequestStatus => &self.request_status_updates,
            StoreOperation::DeleteRequest => &self.request_deletes,
            StoreOperation::GetJob => &self.job_reads,
            StoreOperation::CreateJob => &self.job_creates,
            StoreOperation::DeleteJob => &self.job_deletes,
            StoreOperation::GetPlatformProxy => &self.proxy_reads,
        }
    }

    fn snapshot(&self) -> OperationCounts {
        OperationCounts {
            request_reads: self.request_reads.load(Ordering::SeqCst),
            request_spec_updates: self.request_spec_updates.load(Ordering::SeqCst),
            request_status_updates: self.request_status_updates.load(Ordering::SeqCst),
            request_deletes: self.request_deletes.load(Ordering::SeqCst),
            job_reads: self.job_reads.load(Ordering::SeqCst),
            job_creates: self.job_creates.load(Ordering::SeqCst),
            job_deletes: self.job_deletes.load(Ordering::SeqCst),
            proxy_reads: self.proxy_reads.load(Ordering::SeqCst),
        }
    }
}

#[derive(Default)]
struct Inner {
    requests: HashMap<ObjectKey, GatherRequest>,
    jobs: HashMap<ObjectKey, ExecutionJob>,
    platform_proxy: Option<ProxySpec>,
    last_resource_version: u64,
}

impl Inner {
    fn next_resource_version(&mut self) -> u64 {
        self.last_resource_version += 1;
        self.last_resource_version
    }
}

/// Process-local resource store. Assigns store-owned metadata the way a
/// cluster API server would and broadcasts a [`WatchEvent`] for every write.
pub struct InMemoryStore {
    inner: RwLock<Inner>,
    events_tx: broadcast::Sender<WatchEvent>,
    counters: Counters,
    failures: Mutex<HashSet<StoreOperation>>,
    cascading_delete: bool,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl InMemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (events_tx, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(Inner::default()),
            events_tx,
            counters: Counters::default(),
            failures: Mutex::new(HashSet::new()),
            cascading_delete: false,
            clock,
        }
    }

    /// Makes request deletion remove the owned job as well.
    pub fn with_cascading_delete(mut self) -> Self {
        self.cascading_delete = true;
        self
    }

    pub fn counts(&self) -> OperationCounts {
        self.counters.snapshot()
    }

    /// The next call of `op` fails with [`StoreError::Unavailable`].
    pub fn fail_next(&self, op: StoreOperation) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(op);
        }
    }

    pub async fn set_platform_proxy(&self, proxy: ProxySpec) {
        self.inner.write().await.platform_proxy = Some(proxy);
    }

    /// Writes a job status the way the job runtime would.
    pub async fn set_job_status(&self, key: &ObjectKey, status: JobStatus) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let resource_version = inner.next_resource_version();
        let job = inner
            .jobs
            .get_mut(key)
            .ok_or_else(|| StoreError::not_found(ResourceKind::ExecutionJob, key))?;
        let previous = job.clone();
        job.status = status;
        job.metadata.resource_version = resource_version;
        let current = job.clone();
        self.emit(WatchEvent::modified(
            Resource::Job(previous),
            Resource::Job(current),
        ));
        Ok(())
    }

    pub async fn contains_job(&self, key: &ObjectKey) -> bool {
        self.inner.read().await.jobs.contains_key(key)
    }

    pub async fn contains_request(&self, key: &ObjectKey) -> bool {
        self.inner.read().await.requests.contains_key(key)
    }

    fn record(&self, op: StoreOperation) -> StoreResult<()> {
        self.counters.counter(op).fetch_add(1, Ordering::SeqCst);
        let injected = self
            .failures
            .lock()
            .map(|mut failures| failures.remove(&op))
            .unwrap_or(false);
        if injected {
            debug!(operation = %op, "injected store failure");
            return Err(StoreError::Unavailable(format!("injected failure on {op}")));
        }
        Ok(())
    }

    fn emit(&self, event: WatchEvent) {
        trace!(kind = %event.kind, key = %event.object.key(), "emitting watch event");
        // no receivers is not an error, the controller may not be running yet
        let _ = self.events_tx.send(event);
    }

    fn check_version(
        kind: ResourceKind,
        key: &ObjectKey,
        expected: u64,
        current: u64,
    ) -> StoreResult<()> {
        if expected != current {
            return Err(StoreError::Conflict {
                kind,
                key: key.clone(),
                expected,
                current,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn get_request(&self, key: &ObjectKey) -> StoreResult<GatherRequest> {
        self.record(StoreOperation::GetRequest)?;
        self.inner
            .read()
            .await
            .requests
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(ResourceKind::GatherRequest, key))
    }

    async fn list_requests(&self) -> StoreResult<Vec<GatherRequest>> {
        let mut requests: Vec<GatherRequest> =
            self.inner.read().await.requests.values().cloned().collect();
        requests.sort_by_key(|r| r.key());
        Ok(requests)
    }

    async fn create_request(&self, mut request: GatherRequest) -> StoreResult<GatherRequest> {
        let key = request.key();
        let mut inner = self.inner.write().await;
        if inner.requests.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: ResourceKind::GatherRequest,
                key,
            });
        }
        request.metadata.uid = uuid::Uuid::new_v4().to_string();
        request.metadata.generation = 1;
        request.metadata.resource_version = inner.next_resource_version();
        request.metadata.creation_timestamp = self.clock.now_ms();
        inner.requests.insert(key, request.clone());
        self.emit(WatchEvent::added(Resource::Request(request.clone())));
        Ok(request)
    }

    async fn update_request_spec(&self, request: &GatherRequest) -> StoreResult<GatherRequest> {
        self.record(StoreOperation::UpdateRequestSpec)?;
        let key = request.key();
        let mut inner = self.inner.write().await;
        let resource_version = inner.next_resource_version();
        let stored = inner
            .requests
            .get_mut(&key)
            .ok_or_else(|| StoreError::not_found(ResourceKind::GatherRequest, &key))?;
        Self::check_version(
            ResourceKind::GatherRequest,
            &key,
            request.metadata.resource_version,
            stored.metadata.resource_version,
        )?;
        let previous = stored.clone();
        if stored.spec != request.spec {
            stored.spec = request.spec.clone();
            stored.metadata.generation += 1;
        }
        stored.metadata.resource_version = resource_version;
        let current = stored.clone();
        self.emit(WatchEvent::modified(
            Resource::Request(previous),
            Resource::Request(current.clone()),
        ));
        Ok(current)
    }

    async fn update_request_status(&self, request: &GatherRequest) -> StoreResult<GatherRequest> {
        self.record(StoreOperation::UpdateRequestStatus)?;
        let key = request.key();
        let mut inner = self.inner.write().await;
        let resource_version = inner.next_resource_version();
        let stored = inner
            .requests
            .get_mut(&key)
            .ok_or_else(|| StoreError::not_found(ResourceKind::GatherRequest, &key))?;
        Self::check_version(
            ResourceKind::GatherRequest,
            &key,
            request.metadata.resource_version,
            stored.metadata.resource_version,
        )?;
        let previous = stored.clone();
        stored.status = request.status.clone();
        stored.metadata.resource_version = resource_version;
        let current = stored.clone();
        self.emit(WatchEvent::modified(
            Resource::Request(previous),
            Resource::Request(current.clone()),
        ));
        Ok(current)
    }

    async fn delete_request(&self, key: &ObjectKey) -> StoreResult<()> {
        self.record(StoreOperation::DeleteRequest)?;
        let mut inner = self.inner.write().await;
        let request = inner
            .requests
            .remove(key)
            .ok_or_else(|| StoreError::not_found(ResourceKind::GatherRequest, key))?;
        if self.cascading_delete {
            let owned = inner
                .jobs
                .iter()
                .find(|(_, job)| job.owner.uid == request.metadata.uid)
                .map(|(job_key, _)| job_key.clone());
            if let Some(job_key) = owned {
                if let Some(job) = inner.jobs.remove(&job_key) {
                    self.emit(WatchEvent::deleted(Resource::Job(job)));
                }
            }
        }
        self.emit(WatchEvent::deleted(Resource::Request(request)));
        Ok(())
    }

    async fn get_job(&self, key: &ObjectKey) -> StoreResult<ExecutionJob> {
        self.record(StoreOperation::GetJob)?;
        self.inner
            .read()
            .await
            .jobs
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(ResourceKind::ExecutionJob, key))
    }

    async fn create_job(&self, mut job: ExecutionJob) -> StoreResult<ExecutionJob> {
        self.record(StoreOperation::CreateJob)?;
        let key = job.key();
        let mut inner = self.inner.write().await;
        if inner.jobs.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: ResourceKind::ExecutionJob,
                key,
            });
        }
        job.metadata.uid = uuid::Uuid::new_v4().to_string();
        job.metadata.generation = 1;
        job.metadata.resource_version = inner.next_resource_version();
        job.metadata.creation_timestamp = self.clock.now_ms();
        inner.jobs.insert(key, job.clone());
        self.emit(WatchEvent::added(Resource::Job(job.clone())));
        Ok(job)
    }

    async fn delete_job(&self, key: &ObjectKey) -> StoreResult<()> {
        self.record(StoreOperation::DeleteJob)?;
        let job = self
            .inner
            .write()
            .await
            .jobs
            .remove(key)
            .ok_or_else(|| StoreError::not_found(ResourceKind::ExecutionJob, key))?;
        self.emit(WatchEvent::deleted(Resource::Job(job)));
        Ok(())
    }

    async fn get_platform_proxy(&self) -> StoreResult<ProxySpec> {
        self.record(StoreOperation::GetPlatformProxy)?;
        self.inner
            .read()
            .await
            .platform_proxy
            .clone()
            .ok_or_else(|| {
                StoreError::not_found(ResourceKind::PlatformProxy, &ObjectKey::new("", "cluster"))
            })
    }

    fn supports_cascading_delete(&self) -> bool {
        self.cascading_delete
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.events_tx.subscribe()
    }
}
