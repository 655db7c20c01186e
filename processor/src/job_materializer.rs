use std::path::Path;

use anyhow::{Context, Result};
use data_model::{ExecutionJob, GatherRequest, ObjectKey, ObjectMeta, OwnerReference};
use minijinja::{Environment, UndefinedBehavior, Value};
use serde_json::Value as JsonValue;

use crate::error::TemplateRenderError;

/// Renders the manifest of the execution job for a request.
pub trait TemplateEngine: Send + Sync {
    fn render(&self, request: &GatherRequest) -> Result<JsonValue, TemplateRenderError>;
}

/// Jinja-syntax job template. The request is the root of the render context,
/// serialized with its schema field names (`metadata.name`,
/// `spec.executionImages`, `spec.proxy.httpProxy`, ...). Referencing a field
/// that is absent fails the render. Values should go through `tojson` so they
/// land in the manifest as quoted scalars.
pub struct JinjaTemplateEngine {
    env: Environment<'static>,
}

const TEMPLATE_NAME: &str = "job";

impl JinjaTemplateEngine {
    /// Compiles `source` once; every render reuses the parsed template.
    pub fn new(source: impl Into<String>) -> Result<Self, TemplateRenderError> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.add_template_owned(TEMPLATE_NAME, source.into())
            .map_err(TemplateRenderError::Syntax)?;
        Ok(Self { env })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("error reading job template {}", path.display()))?;
        let engine = Self::new(source)
            .with_context(|| format!("error parsing job template {}", path.display()))?;
        Ok(engine)
    }
}

impl TemplateEngine for JinjaTemplateEngine {
    fn render(&self, request: &GatherRequest) -> Result<JsonValue, TemplateRenderError> {
        let template = self
            .env
            .get_template(TEMPLATE_NAME)
            .map_err(TemplateRenderError::Syntax)?;
        let rendered = template
            .render(Value::from_serialize(request))
            .map_err(TemplateRenderError::Render)?;
        let manifest: JsonValue =
            serde_yaml::from_str(&rendered).map_err(TemplateRenderError::Parse)?;
        if !manifest.is_object() {
            return Err(TemplateRenderError::NotAMapping);
        }
        Ok(manifest)
    }
}

/// Execution jobs share the identity of the request that owns them.
pub fn job_identity(request: &GatherRequest) -> ObjectKey {
    request.key()
}

/// Renders `request` into the job that should exist for it. The manifest's
/// `metadata.name` and `metadata.namespace` are overwritten with the job
/// identity so a template can never point the job elsewhere.
pub fn materialize(
    engine: &dyn TemplateEngine,
    request: &GatherRequest,
) -> Result<ExecutionJob, TemplateRenderError> {
    let key = job_identity(request);
    let mut manifest = engine.render(request)?;

    if let Some(root) = manifest.as_object_mut() {
        let metadata = root
            .entry("metadata")
            .or_insert_with(|| JsonValue::Object(Default::default()));
        if let Some(metadata) = metadata.as_object_mut() {
            metadata.insert("name".to_string(), JsonValue::from(key.name.clone()));
            metadata.insert(
                "namespace".to_string(),
                JsonValue::from(key.namespace.clone()),
            );
        }
    }

    Ok(ExecutionJob {
        metadata: ObjectMeta::new(&key),
        owner: OwnerReference {
            name: request.metadata.name.clone(),
            uid: request.metadata.uid.clone(),
        },
        template: manifest,
        status: Default::default(),
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use data_model::test_objects::tests::{
        mock_initialized_request,
        test_key,
        TEST_DEFAULT_IMAGE,
        TEST_HTTP_PROXY,
    };

    use super::*;
    use crate::testing::TEST_TEMPLATE;

    #[test]
    fn test_materialize_renders_request_fields() -> anyhow::Result<()> {
        let engine = JinjaTemplateEngine::new(TEST_TEMPLATE)?;
        let request = mock_initialized_request("diag-1");

        let job = materialize(&engine, &request)?;
        assert_eq!(job.key(), test_key("diag-1"));
        assert_eq!(job.owner.name, "diag-1");

        let pod_spec = &job.template["spec"]["template"]["spec"];
        assert_eq!(pod_spec["serviceAccountName"], "default");
        assert_eq!(pod_spec["containers"][0]["image"], TEST_DEFAULT_IMAGE);
        assert_eq!(
            pod_spec["containers"][0]["env"][0]["value"],
            TEST_HTTP_PROXY
        );
        Ok(())
    }

    #[test]
    fn test_identity_is_deterministic() -> anyhow::Result<()> {
        let engine = JinjaTemplateEngine::new(TEST_TEMPLATE)?;
        let request = mock_initialized_request("diag-1");
        let first = materialize(&engine, &request)?;
        let second = materialize(&engine, &request)?;
        assert_eq!(first.key(), second.key());
        assert_eq!(first.template, second.template);
        Ok(())
    }

    #[test]
    fn test_request_values_are_quoted_in_manifest() -> anyhow::Result<()> {
        let engine = JinjaTemplateEngine::new(TEST_TEMPLATE)?;
        let mut request = mock_initialized_request("diag-1");
        let no_proxy = "x\"\n        - name: INJECTED\n          value: \"pwned";
        request.spec.proxy.no_proxy = Some(no_proxy.to_string());
        request.spec.execution_images = vec!["a:{b}".to_string(), "it's: #1".to_string()];

        let job = materialize(&engine, &request)?;
        let containers = &job.template["spec"]["template"]["spec"]["containers"];
        assert_eq!(containers[0]["image"], "a:{b}");
        assert_eq!(containers[1]["image"], "it's: #1");

        let env = containers[0]["env"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        assert_eq!(env.len(), 2);
        assert_eq!(env[1]["name"], "NO_PROXY");
        assert_eq!(env[1]["value"], no_proxy);
        Ok(())
    }

    #[test]
    fn test_repeated_renders_reuse_template() -> anyhow::Result<()> {
        let engine = JinjaTemplateEngine::new(TEST_TEMPLATE)?;
        let first = engine.render(&mock_initialized_request("diag-1"))?;
        let second = engine.render(&mock_initialized_request("diag-2"))?;
        assert_eq!(first["metadata"]["name"], "diag-1");
        assert_eq!(second["metadata"]["name"], "diag-2");
        Ok(())
    }

    #[test]
    fn test_template_cannot_rename_job() -> anyhow::Result<()> {
        let engine = JinjaTemplateEngine::new("kind: Job\nmetadata:\n  name: elsewhere\n")?;
        let job = materialize(&engine, &mock_initialized_request("diag-1"))?;
        assert_eq!(job.template["metadata"]["name"], "diag-1");
        assert_eq!(job.template["metadata"]["namespace"], "test_ns");
        Ok(())
    }

    #[test]
    fn test_syntax_error_is_caught_at_construction() {
        let err = JinjaTemplateEngine::new("name: {{ metadata.name ").err();
        assert!(matches!(err, Some(TemplateRenderError::Syntax(_))));
    }

    #[test]
    fn test_missing_field_fails_render() -> anyhow::Result<()> {
        let engine = JinjaTemplateEngine::new("name: {{ spec.doesNotExist }}\n")?;
        let err = materialize(&engine, &mock_initialized_request("diag-1")).unwrap_err();
        assert!(matches!(err, TemplateRenderError::Render(_)));
        Ok(())
    }

    #[test]
    fn test_scalar_manifest_is_rejected() -> anyhow::Result<()> {
        let engine = JinjaTemplateEngine::new("just a string")?;
        let err = materialize(&engine, &mock_initialized_request("diag-1")).unwrap_err();
        assert!(matches!(err, TemplateRenderError::NotAMapping));
        Ok(())
    }

    #[test]
    fn test_from_file() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(TEST_TEMPLATE.as_bytes())?;
        let engine = JinjaTemplateEngine::from_file(file.path())?;
        materialize(&engine, &mock_initialized_request("diag-1"))?;

        assert!(JinjaTemplateEngine::from_file(Path::new("/does/not/exist.yaml")).is_err());
        Ok(())
    }
}
