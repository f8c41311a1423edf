use std::collections::HashSet;

use addonhub_core::{Addon, ConfigGroupResource};

/// Check every desired config kind against the supported set recorded in status.
///
/// Returns the first unsupported kind, in declaration order.
pub fn is_configuration_supported(addon: &Addon) -> Result<(), ConfigGroupResource> {
    let supported: HashSet<&ConfigGroupResource> = addon
        .status
        .as_ref()
        .map(|s| s.supported_configs.iter().collect())
        .unwrap_or_default();

    match addon.spec.configs.iter().find(|c| !supported.contains(&c.gr)) {
        Some(unsupported) => Err(unsupported.gr.clone()),
        None => Ok(()),
    }
}
