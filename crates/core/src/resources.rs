//! Resource types watched and written by addonhub.
//!
//! - [`Addon`] (`ManagedClusterAddOn`): one per (cluster namespace, add-on name).
//! - [`AddonDefinition`] (`ClusterManagementAddOn`): fleet-wide, cluster-scoped.
//! - [`DispatchRecord`] (`ManifestWork`): bundles deployed to a cluster, read-only for us.
//!
//! Only the fields the convergence controller reads or owns are modelled. Unknown fields are
//! ignored on read; status writes are merge patches over owned fields, so nothing else is lost.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Group and resource of a configuration kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigGroupResource {
    #[serde(default)]
    pub group: String,
    pub resource: String,
}

/// Namespace/name of a configuration object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigReferent {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
}

/// A configuration referent plus the content hash of its spec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSpecHash {
    #[serde(flatten)]
    pub referent: ConfigReferent,
    #[serde(default)]
    pub spec_hash: String,
}

/// Desired configuration entry in `Addon.spec.configs`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddonConfig {
    #[serde(flatten)]
    pub gr: ConfigGroupResource,
    #[serde(flatten)]
    pub referent: ConfigReferent,
}

/// Resolved configuration in `Addon.status.configReferences`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigReference {
    #[serde(flatten)]
    pub gr: ConfigGroupResource,
    /// Deprecated inline referent, kept for readers that predate `desiredConfig`.
    #[serde(flatten)]
    pub referent: ConfigReferent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_config: Option<ConfigSpecHash>,
    /// Owned by the convergence controller: only ever set to a copy of `desired_config`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied_config: Option<ConfigSpecHash>,
    #[serde(default)]
    pub last_observed_generation: i64,
}

impl ConfigReference {
    /// Whether the recorded last-applied config already equals the desired one.
    pub fn is_converged(&self) -> bool {
        self.last_applied_config == self.desired_config
    }

    /// A last-applied config with a non-empty hash means this add-on was installed before.
    pub fn has_applied_hash(&self) -> bool {
        self.last_applied_config.as_ref().is_some_and(|c| !c.spec_hash.is_empty())
    }
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "addon.open-cluster-management.io",
    version = "v1alpha1",
    kind = "ManagedClusterAddOn",
    root = "Addon",
    namespaced,
    status = "AddonStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct AddonSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configs: Vec<AddonConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddonStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_configs: Vec<ConfigGroupResource>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_references: Vec<ConfigReference>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddonMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Configuration kind an add-on accepts, with an optional fleet-wide default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMeta {
    #[serde(flatten)]
    pub gr: ConfigGroupResource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_config: Option<ConfigReferent>,
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "addon.open-cluster-management.io",
    version = "v1alpha1",
    kind = "ClusterManagementAddOn",
    root = "AddonDefinition",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct AddonDefinitionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addon_meta: Option<AddonMeta>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_configs: Vec<ConfigMeta>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Workload {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manifests: Vec<serde_json::Value>,
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "work.open-cluster-management.io",
    version = "v1",
    kind = "ManifestWork",
    root = "DispatchRecord",
    namespaced,
    status = "DispatchStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct DispatchSpec {
    #[serde(default)]
    pub workload: Workload,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DispatchStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}
