pub mod test_objects;

use std::fmt::{self, Display};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display as StrumDisplay};

/// Identity given to a request when its spec leaves the execution identity
/// empty.
pub const DEFAULT_EXECUTION_IDENTITY: &str = "default";

/// Namespace-qualified name of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Store-managed metadata. `uid`, `creation_timestamp`, `generation` and
/// `resource_version` are assigned by the store and never written by the
/// reconciler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub uid: String,
    /// Bumped only when the spec changes.
    #[serde(default)]
    pub generation: u64,
    /// Bumped on every write, spec or status.
    #[serde(default)]
    pub resource_version: u64,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub creation_timestamp: u64,
}

impl ObjectMeta {
    pub fn new(key: &ObjectKey) -> Self {
        Self {
            name: key.name.clone(),
            namespace: key.namespace.clone(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRef {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_proxy: Option<String>,
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(str::is_empty)
}

impl ProxySpec {
    /// True when none of the three settings carries a value.
    pub fn is_unset(&self) -> bool {
        is_blank(&self.http_proxy) && is_blank(&self.https_proxy) && is_blank(&self.no_proxy)
    }

    /// Copy with empty strings folded into `None`.
    pub fn normalized(&self) -> ProxySpec {
        let keep = |value: &Option<String>| value.clone().filter(|v| !v.is_empty());
        ProxySpec {
            http_proxy: keep(&self.http_proxy),
            https_proxy: keep(&self.https_proxy),
            no_proxy: keep(&self.no_proxy),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatherRequestSpec {
    #[serde(default)]
    pub execution_images: Vec<String>,
    #[serde(default)]
    pub execution_identity_ref: IdentityRef,
    #[serde(default)]
    pub proxy: ProxySpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, StrumDisplay, AsRefStr)]
pub enum ConditionKind {
    ReconcileSuccess,
    ReconcileError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileCondition {
    pub kind: ConditionKind,
    pub reason: String,
    pub message: String,
    pub last_transition_time: u64,
}

impl ReconcileCondition {
    pub fn success(reason: impl Into<String>, message: impl Into<String>, now_ms: u64) -> Self {
        Self {
            kind: ConditionKind::ReconcileSuccess,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: now_ms,
        }
    }

    pub fn error(reason: impl Into<String>, message: impl Into<String>, now_ms: u64) -> Self {
        Self {
            kind: ConditionKind::ReconcileError,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: now_ms,
        }
    }

    /// Compares everything but the transition time.
    pub fn same_state(&self, other: &ReconcileCondition) -> bool {
        self.kind == other.kind && self.reason == other.reason && self.message == other.message
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatherRequestStatus {
    #[serde(default)]
    pub completed: bool,
    /// Set once the execution job exists. Defaults are frozen from then on.
    #[serde(default)]
    pub job_created: bool,
    /// Set once a failed job has been counted.
    #[serde(default)]
    pub failure_recorded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ReconcileCondition>,
}

impl GatherRequestStatus {
    /// Replaces the current condition unless it already describes the same
    /// state, in which case the original transition time is kept.
    pub fn set_condition(&mut self, condition: ReconcileCondition) {
        match &self.condition {
            Some(current) if current.same_state(&condition) => {}
            _ => self.condition = Some(condition),
        }
    }

    pub fn reason(&self) -> Option<&str> {
        self.condition.as_ref().map(|c| c.reason.as_str())
    }
}

/// A user-declared request to collect diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[builder(default)]
pub struct GatherRequest {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: GatherRequestSpec,
    #[serde(default)]
    pub status: GatherRequestStatus,
}

impl GatherRequest {
    pub fn new(key: &ObjectKey, spec: GatherRequestSpec) -> Self {
        Self {
            metadata: ObjectMeta::new(key),
            spec,
            status: Default::default(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub name: String,
    pub uid: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, StrumDisplay, AsRefStr)]
pub enum JobPhase {
    Pending,
    Active,
    Succeeded,
    Failed,
}

/// Status written by the job runtime; the reconciler only reads it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    #[serde(default)]
    pub active: u32,
    #[serde(default)]
    pub succeeded: u32,
    #[serde(default)]
    pub failed: u32,
    /// Milliseconds since the Unix epoch, absent until the job finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<u64>,
}

impl JobStatus {
    /// Running pods win over finished ones, successes over failures.
    pub fn phase(&self) -> JobPhase {
        if self.active > 0 {
            JobPhase::Active
        } else if self.succeeded > 0 {
            JobPhase::Succeeded
        } else if self.failed > 0 {
            JobPhase::Failed
        } else {
            JobPhase::Pending
        }
    }

    pub fn is_finished(&self) -> bool {
        self.completion_time.is_some_and(|t| t > 0)
    }
}

/// One-shot workload materialized for a [`GatherRequest`]. Shares its
/// identity with the owning request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionJob {
    pub metadata: ObjectMeta,
    pub owner: OwnerReference,
    /// Rendered job body, opaque to the reconciler.
    #[serde(default)]
    pub template: serde_json::Value,
    #[serde(default)]
    pub status: JobStatus,
}

impl ExecutionJob {
    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    pub fn owner_key(&self) -> ObjectKey {
        ObjectKey::new(self.metadata.namespace.clone(), self.owner.name.clone())
    }
}

#[derive(Debug, Clone, PartialEq, StrumDisplay)]
pub enum Resource {
    Request(GatherRequest),
    Job(ExecutionJob),
}

impl Resource {
    pub fn key(&self) -> ObjectKey {
        match self {
            Resource::Request(request) => request.key(),
            Resource::Job(job) => job.key(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay)]
pub enum EventKind {
    Added,
    Modified,
    Deleted,
}

/// Change notification emitted by the store. `previous` is only set for
/// `Modified` events.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchEvent {
    pub kind: EventKind,
    pub object: Resource,
    pub previous: Option<Resource>,
}

impl WatchEvent {
    pub fn added(object: Resource) -> Self {
        Self {
            kind: EventKind::Added,
            object,
            previous: None,
        }
    }

    pub fn modified(previous: Resource, object: Resource) -> Self {
        Self {
            kind: EventKind::Modified,
            object,
            previous: Some(previous),
        }
    }

    pub fn deleted(object: Resource) -> Self {
        Self {
            kind: EventKind::Deleted,
            object,
            previous: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_unset_treats_empty_strings_as_unset() {
        assert!(ProxySpec::default().is_unset());
        let empty = ProxySpec {
            http_proxy: Some(String::new()),
            ..Default::default()
        };
        assert!(empty.is_unset());
        assert_eq!(empty.normalized(), ProxySpec::default());

        let set = ProxySpec {
            no_proxy: Some(".cluster.local".to_string()),
            ..Default::default()
        };
        assert!(!set.is_unset());
    }

    #[test]
    fn test_job_phase_precedence() {
        let status = JobStatus {
            active: 1,
            succeeded: 1,
            failed: 1,
            completion_time: None,
        };
        assert_eq!(status.phase(), JobPhase::Active);

        let status = JobStatus {
            succeeded: 1,
            failed: 2,
            ..Default::default()
        };
        assert_eq!(status.phase(), JobPhase::Succeeded);

        let status = JobStatus {
            failed: 2,
            ..Default::default()
        };
        assert_eq!(status.phase(), JobPhase::Failed);
        assert_eq!(JobStatus::default().phase(), JobPhase::Pending);
    }

    #[test]
    fn test_set_condition_keeps_transition_time() {
        let mut status = GatherRequestStatus::default();
        status.set_condition(ReconcileCondition::success("JobRunning", "running", 10));
        status.set_condition(ReconcileCondition::success("JobRunning", "running", 20));
        assert_eq!(status.condition.as_ref().unwrap().last_transition_time, 10);

        status.set_condition(ReconcileCondition::success("JobSucceeded", "done", 30));
        assert_eq!(status.reason(), Some("JobSucceeded"));
        assert_eq!(status.condition.as_ref().unwrap().last_transition_time, 30);
    }

    #[test]
    fn test_request_spec_uses_schema_field_names() {
        let yaml = r#"
metadata:
  name: diag-1
  namespace: support
spec:
  executionImages: ["quay.io/acme/gather:1"]
  executionIdentityRef:
    name: collector
  proxy:
    httpsProxy: http://proxy:3128
"#;
        let request: GatherRequest = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(request.key(), ObjectKey::new("support", "diag-1"));
        assert_eq!(request.spec.execution_identity_ref.name, "collector");
        assert_eq!(
            request.spec.proxy.https_proxy.as_deref(),
            Some("http://proxy:3128")
        );
        assert!(!request.status.completed);
    }
}
