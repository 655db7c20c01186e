use std::{sync::Arc, time::Duration};

use anyhow::Result;
use data_model::{test_objects::tests::TEST_DEFAULT_IMAGE, GatherRequest, ObjectKey};
use gather_utils::ManualClock;
use metrics::reconciler_metrics;
use state_store::{InMemoryStore, ResourceStore};

use crate::{
    job_materializer::JinjaTemplateEngine,
    reconciler::{Reconciler, ReconcilerConfig},
};

pub const RETENTION: Duration = Duration::from_secs(6 * 60 * 60);
pub const START_TIME_MS: u64 = 1_700_000_000_000;

pub const TEST_TEMPLATE: &str = r#"
apiVersion: batch/v1
kind: Job
metadata:
  name: {{ metadata.name|tojson }}
  namespace: {{ metadata.namespace|tojson }}
spec:
  backoffLimit: 6
  template:
    spec:
      serviceAccountName: {{ spec.executionIdentityRef.name|tojson }}
      containers:
{% for image in spec.executionImages %}
      - name: gather-{{ loop.index0 }}
        image: {{ image|tojson }}
        env:
{% if spec.proxy.httpProxy is defined %}
        - name: HTTP_PROXY
          value: {{ spec.proxy.httpProxy|tojson }}
{% endif %}
{% if spec.proxy.noProxy is defined %}
        - name: NO_PROXY
          value: {{ spec.proxy.noProxy|tojson }}
{% endif %}
{% endfor %}
"#;

/// A reconciler over an in-memory store whose clock only moves when the test
/// says so.
pub struct TestReconciler {
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<ManualClock>,
    pub reconciler: Arc<Reconciler>,
}

impl TestReconciler {
    pub fn new() -> Result<Self> {
        Self::with_template(TEST_TEMPLATE)
    }

    pub fn with_template(template: &str) -> Result<Self> {
        let clock = Arc::new(ManualClock::new(START_TIME_MS));
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        let reconciler = Reconciler::new(
            store.clone(),
            Arc::new(JinjaTemplateEngine::new(template)?),
            clock.clone(),
            Arc::new(reconciler_metrics::Metrics::new()),
            ReconcilerConfig {
                default_image: TEST_DEFAULT_IMAGE.to_string(),
                retention: RETENTION,
            },
        );
        Ok(Self {
            store,
            clock,
            reconciler: Arc::new(reconciler),
        })
    }

    pub async fn create(&self, request: GatherRequest) -> Result<ObjectKey> {
        Ok(self.store.create_request(request).await?.key())
    }

    pub fn metrics(&self) -> &reconciler_metrics::Metrics {
        self.reconciler.metrics()
    }
}
