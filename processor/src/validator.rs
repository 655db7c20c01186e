use data_model::{GatherRequest, ProxySpec};
use url::Url;

use crate::error::ValidationError;

const MAX_IDENTITY_NAME_LEN: usize = 253;

/// Structural acceptance check. Empty fields that the initializer fills in
/// are accepted here.
pub fn validate(request: &GatherRequest) -> Result<(), ValidationError> {
    if request.metadata.name.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if request.metadata.namespace.is_empty() {
        return Err(ValidationError::EmptyNamespace);
    }

    for (index, image) in request.spec.execution_images.iter().enumerate() {
        if image.is_empty() {
            return Err(ValidationError::EmptyImage { index });
        }
        if image.chars().any(char::is_whitespace) {
            return Err(ValidationError::MalformedImage {
                image: image.clone(),
            });
        }
    }

    let identity = &request.spec.execution_identity_ref.name;
    if !identity.is_empty() {
        validate_identity_name(identity)?;
    }

    validate_proxy(&request.spec.proxy)
}

/// Lowercase RFC 1123 subdomain.
fn validate_identity_name(name: &str) -> Result<(), ValidationError> {
    let invalid = |reason| ValidationError::InvalidIdentity {
        name: name.to_string(),
        reason,
    };
    if name.len() > MAX_IDENTITY_NAME_LEN {
        return Err(invalid("longer than 253 characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return Err(invalid(
            "only lowercase alphanumerics, '-' and '.' are allowed",
        ));
    }
    let alphanumeric = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    if !alphanumeric(name.chars().next()) || !alphanumeric(name.chars().last()) {
        return Err(invalid("must start and end with an alphanumeric character"));
    }
    Ok(())
}

fn validate_proxy(proxy: &ProxySpec) -> Result<(), ValidationError> {
    for (field, value) in [
        ("httpProxy", &proxy.http_proxy),
        ("httpsProxy", &proxy.https_proxy),
        ("noProxy", &proxy.no_proxy),
    ] {
        let Some(value) = value.as_deref().filter(|v| !v.is_empty()) else {
            continue;
        };
        let invalid = |reason: String| ValidationError::InvalidProxy {
            field,
            value: value.to_string(),
            reason,
        };
        if let Some(c) = value
            .chars()
            .find(|c| c.is_control() || *c == '"' || *c == '\'' || *c == '\\')
        {
            return Err(invalid(format!("forbidden character {c:?}")));
        }
        if field == "noProxy" {
            continue;
        }
        let url = Url::parse(value).map_err(|e| invalid(e.to_string()))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(invalid(format!("unsupported scheme {}", url.scheme())));
        }
        if url.host_str().is_none() {
            return Err(invalid("missing host".to_string()));
        }
    }
    Ok(())
}
