//! addonhub core types: add-on resources, condition helpers, keys and errors.

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod conditions;
pub mod resources;

pub use conditions::{find_condition, new_condition, set_condition, ConditionExt};
pub use resources::{
    Addon, AddonConfig, AddonDefinition, AddonDefinitionSpec, AddonMeta, AddonSpec, AddonStatus,
    ConfigGroupResource, ConfigMeta, ConfigReference, ConfigReferent, ConfigSpecHash,
    DispatchRecord, DispatchSpec, DispatchStatus, Workload,
};

/// Label on a dispatch record naming the add-on it belongs to.
pub const ADDON_LABEL: &str = "open-cluster-management.io/addon-name";

/// Annotation on a dispatch record holding the JSON map of config identity -> spec hash
/// that was embedded in the dispatched bundle.
pub const CONFIG_SPEC_HASH_ANNOTATION: &str = "open-cluster-management.io/config-spec-hash";

pub const CONDITION_PROGRESSING: &str = "Progressing";
pub const CONDITION_MANIFEST_APPLIED: &str = "ManifestApplied";
pub const CONDITION_WORK_APPLIED: &str = "Applied";
pub const CONDITION_WORK_AVAILABLE: &str = "Available";

pub const STATUS_TRUE: &str = "True";
pub const STATUS_FALSE: &str = "False";

/// Reasons carried by the `Progressing` condition.
pub mod reasons {
    pub const INSTALLING: &str = "Installing";
    pub const INSTALL_SUCCEED: &str = "InstallSucceed";
    pub const INSTALL_FAILED: &str = "InstallFailed";
    pub const UPGRADING: &str = "Upgrading";
    pub const UPGRADE_SUCCEED: &str = "UpgradeSucceed";
    pub const UPGRADE_FAILED: &str = "UpgradeFailed";
    pub const CONFIGURATION_UNSUPPORTED: &str = "ConfigurationUnsupported";
    pub const WAITING_FOR_MANIFEST_APPLIED: &str = "WaitingForManifestApplied";
}

/// Name prefix of dispatch records that carry pre-delete hook jobs for an add-on.
pub fn pre_delete_hook_record_name(addon_name: &str) -> String {
    format!("addon-{}-pre-delete", addon_name)
}

/// Identity string of a configuration object, as used in the spec-hash annotation:
/// `<resource>.<group>/<namespace>/<name>`, with the `.<group>` part omitted for the core group.
pub fn config_identity(gr: &ConfigGroupResource, referent: &ConfigReferent) -> String {
    if gr.group.is_empty() {
        format!("{}/{}/{}", gr.resource, referent.namespace, referent.name)
    } else {
        format!("{}.{}/{}/{}", gr.resource, gr.group, referent.namespace, referent.name)
    }
}

/// Reconcile key: `(namespace, name)` of an Addon.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }

    /// Parse `namespace/name` (or a bare `name` for cluster-scoped objects).
    pub fn parse(key: &str) -> HubResult<Self> {
        let parts: Vec<&str> = key.split('/').collect();
        match parts.as_slice() {
            [name] if !name.is_empty() => Ok(Self::new("", *name)),
            [ns, name] if !name.is_empty() => Ok(Self::new(*ns, *name)),
            _ => Err(HubError::InvalidKey(key.to_string())),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// Watch-side change for a cached resource kind.
#[derive(Debug, Clone)]
pub enum Delta<K> {
    Applied(K),
    Deleted(K),
    /// Full relist after a watch (re)start; replaces everything cached for the kind.
    Restarted(Vec<K>),
}

/// Errors shared across addonhub crates.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid_key: {0}")]
    InvalidKey(String),
    #[error("store: {0}")]
    Store(String),
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("kube: {0}")]
    Kube(String),
}

impl HubError {
    /// Optimistic-concurrency failures are expected under concurrent writers and only need a requeue.
    pub fn is_conflict(&self) -> bool {
        matches!(self, HubError::Conflict(_))
    }
}

impl From<kube::Error> for HubError {
    fn from(e: kube::Error) -> Self {
        match &e {
            kube::Error::Api(resp) if resp.code == 409 => HubError::Conflict(resp.message.clone()),
            kube::Error::Api(resp) if resp.code == 404 => HubError::NotFound(resp.message.clone()),
            _ => HubError::Kube(e.to_string()),
        }
    }
}

pub type HubResult<T> = Result<T, HubError>;
