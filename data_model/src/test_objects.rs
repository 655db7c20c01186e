pub mod tests {
    use crate::{
        GatherRequest,
        GatherRequestBuilder,
        GatherRequestSpec,
        IdentityRef,
        JobStatus,
        ObjectKey,
        ObjectMeta,
        ProxySpec,
    };

    pub const TEST_NAMESPACE: &str = "test_ns";
    pub const TEST_DEFAULT_IMAGE: &str = "quay.io/test/must-gather:latest";
    pub const TEST_EXTRA_IMAGE: &str = "quay.io/test/extra-gather:v1";
    pub const TEST_HTTP_PROXY: &str = "http://proxy.test:3128";
    pub const TEST_NO_PROXY: &str = ".cluster.local,.svc";

    pub fn test_key(name: &str) -> ObjectKey {
        ObjectKey::new(TEST_NAMESPACE, name)
    }

    /// A request exactly as a user would submit it: no defaults applied.
    pub fn mock_request(name: &str) -> GatherRequest {
        GatherRequestBuilder::default()
            .metadata(ObjectMeta::new(&test_key(name)))
            .build()
            .unwrap()
    }

    pub fn mock_request_with_spec(name: &str, spec: GatherRequestSpec) -> GatherRequest {
        GatherRequestBuilder::default()
            .metadata(ObjectMeta::new(&test_key(name)))
            .spec(spec)
            .build()
            .unwrap()
    }

    /// A request whose spec already satisfies every default.
    pub fn mock_initialized_request(name: &str) -> GatherRequest {
        mock_request_with_spec(
            name,
            GatherRequestSpec {
                execution_images: vec![TEST_DEFAULT_IMAGE.to_string()],
                execution_identity_ref: IdentityRef {
                    name: "default".to_string(),
                },
                proxy: mock_platform_proxy(),
            },
        )
    }

    pub fn mock_platform_proxy() -> ProxySpec {
        ProxySpec {
            http_proxy: Some(TEST_HTTP_PROXY.to_string()),
            https_proxy: Some(TEST_HTTP_PROXY.to_string()),
            no_proxy: Some(TEST_NO_PROXY.to_string()),
        }
    }

    pub fn running_job_status() -> JobStatus {
        JobStatus {
            active: 1,
            ..Default::default()
        }
    }

    pub fn succeeded_job_status(completion_time: u64) -> JobStatus {
        JobStatus {
            succeeded: 1,
            completion_time: Some(completion_time),
            ..Default::default()
        }
    }

    pub fn failed_job_status(completion_time: Option<u64>) -> JobStatus {
        JobStatus {
            failed: 1,
            completion_time,
            ..Default::default()
        }
    }
}
