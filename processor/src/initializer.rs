use std::collections::HashSet;

use data_model::{GatherRequest, ProxySpec, DEFAULT_EXECUTION_IDENTITY};
use tracing::debug;

/// Fills in the defaults a request needs before a job can be rendered for
/// it. Returns true when the spec was modified and has to be persisted.
///
/// Running it again on its own output returns false.
pub fn initialize(
    request: &mut GatherRequest,
    default_image: &str,
    platform_proxy: Option<&ProxySpec>,
) -> bool {
    let mut changed = false;
    let spec = &mut request.spec;

    let images = with_default_image(&spec.execution_images, default_image);
    if images != spec.execution_images {
        debug!(image = default_image, "normalizing execution images");
        spec.execution_images = images;
        changed = true;
    }

    if spec.execution_identity_ref.name.is_empty() {
        debug!("defaulting execution identity");
        spec.execution_identity_ref.name = DEFAULT_EXECUTION_IDENTITY.to_string();
        changed = true;
    }

    if spec.proxy.is_unset() {
        if let Some(platform_proxy) = platform_proxy {
            let snapshot = platform_proxy.normalized();
            if snapshot != spec.proxy {
                debug!("copying platform proxy settings");
                spec.proxy = snapshot;
                changed = true;
            }
        }
    }

    changed
}

/// Deduplicated image list (first occurrence wins) that ends with the default
/// image unless it was already present.
fn with_default_image(images: &[String], default_image: &str) -> Vec<String> {
    let mut seen = HashSet::with_capacity(images.len() + 1);
    let mut result: Vec<String> = images
        .iter()
        .filter(|image| seen.insert(image.as_str()))
        .cloned()
        .collect();
    if !seen.contains(default_image) {
        result.push(default_image.to_string());
    }
    result
}
