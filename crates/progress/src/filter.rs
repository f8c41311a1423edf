//! Ownership predicate: which add-ons this controller instance manages.

use std::collections::HashSet;

use addonhub_core::AddonDefinition;
use kube::ResourceExt;

pub trait ShouldReconcile: Send + Sync {
    fn should_reconcile(&self, definition: &AddonDefinition) -> bool;
}

impl<F> ShouldReconcile for F
where
    F: Fn(&AddonDefinition) -> bool + Send + Sync,
{
    fn should_reconcile(&self, definition: &AddonDefinition) -> bool {
        self(definition)
    }
}

/// Owns the named add-ons; an empty set owns all of them.
#[derive(Debug, Clone, Default)]
pub struct ManagedBySelf {
    names: HashSet<String>,
}

impl ManagedBySelf {
    pub fn new(names: impl IntoIterator<Item = String>) -> Self {
        Self { names: names.into_iter().collect() }
    }

    pub fn all() -> Self {
        Self::default()
    }
}

impl ShouldReconcile for ManagedBySelf {
    fn should_reconcile(&self, definition: &AddonDefinition) -> bool {
        self.names.is_empty() || self.names.contains(&definition.name_any())
    }
}
