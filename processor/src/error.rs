use state_store::StoreError;
use thiserror::Error;

/// Structural problems with a request. Never retried: only a spec change can
/// clear them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("request name must not be empty")]
    EmptyName,

    #[error("request namespace must not be empty")]
    EmptyNamespace,

    #[error("execution image at index {index} is empty")]
    EmptyImage { index: usize },

    #[error("execution image {image:?} contains whitespace")]
    MalformedImage { image: String },

    #[error("execution identity {name:?} is invalid: {reason}")]
    InvalidIdentity { name: String, reason: &'static str },

    #[error("proxy setting {field} {value:?} is invalid: {reason}")]
    InvalidProxy {
        field: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum TemplateRenderError {
    #[error("job template does not compile: {0}")]
    Syntax(#[source] minijinja::Error),

    #[error("failed to render job template: {0}")]
    Render(#[source] minijinja::Error),

    #[error("rendered job manifest is not valid yaml: {0}")]
    Parse(#[source] serde_yaml::Error),

    #[error("rendered job manifest must be a mapping")]
    NotAMapping,
}

/// Errors that end a pass and hand the request back to the dispatcher.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("store operation failed: {0}")]
    Store(#[from] StoreError),

    /// Persists until the template in the operator configuration is fixed.
    #[error(transparent)]
    Template(#[from] TemplateRenderError),
}

impl ReconcileError {
    /// Label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileError::Store(_) => "store",
            ReconcileError::Template(_) => "template",
        }
    }

    /// Reason recorded on the request's error condition.
    pub fn reason(&self) -> &'static str {
        match self {
            ReconcileError::Store(_) => "StoreError",
            ReconcileError::Template(_) => "TemplateRenderFailed",
        }
    }
}
