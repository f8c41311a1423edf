//! Reconcile driver: resolves a key against the caches, runs the convergence pipeline and
//! writes the resulting status patch. Also hosts the event -> key mappers.

use std::sync::Arc;

use addonhub_core::{Addon, AddonDefinition, DispatchRecord, HubResult, ObjectKey, ADDON_LABEL};
use addonhub_store::{AddonLister, Cache, DefinitionLister, DispatchLister, StatusWriter};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use metrics::counter;
use serde_json::Value as Json;
use tracing::{debug, info, warn};

use crate::filter::ShouldReconcile;
use crate::machine::{converge, Decision};
use crate::patch::status_patch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    InvalidKey,
    AddonNotFound,
    DefinitionNotFound,
    NotOwned,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Skipped(SkipReason),
    /// Evaluated, but the status already says what it should.
    Unchanged(Decision),
    Patched { decision: Decision, patch: Json },
}

pub struct Controller {
    addons: Arc<dyn AddonLister>,
    definitions: Arc<dyn DefinitionLister>,
    records: Arc<dyn DispatchLister>,
    writer: Arc<dyn StatusWriter>,
    filter: Arc<dyn ShouldReconcile>,
}

impl Controller {
    pub fn new(
        addons: Arc<dyn AddonLister>,
        definitions: Arc<dyn DefinitionLister>,
        records: Arc<dyn DispatchLister>,
        writer: Arc<dyn StatusWriter>,
        filter: Arc<dyn ShouldReconcile>,
    ) -> Self {
        Self { addons, definitions, records, writer, filter }
    }

    /// All three listers served by one shared cache.
    pub fn from_cache(cache: Arc<Cache>, writer: Arc<dyn StatusWriter>, filter: Arc<dyn ShouldReconcile>) -> Self {
        Self::new(cache.clone(), cache.clone(), cache, writer, filter)
    }

    pub fn addon_lister(&self) -> &dyn AddonLister {
        self.addons.as_ref()
    }

    /// Reconcile one Addon. A missing Addon or definition is not an error.
    pub async fn sync(&self, key: &ObjectKey) -> HubResult<SyncOutcome> {
        debug!(key = %key, "reconciling addon");

        let Some(addon) = self.addons.get_addon(&key.namespace, &key.name)? else {
            return Ok(SyncOutcome::Skipped(SkipReason::AddonNotFound));
        };
        let Some(definition) = self.definitions.get_definition(&key.name)? else {
            return Ok(SyncOutcome::Skipped(SkipReason::DefinitionNotFound));
        };
        if !self.filter.should_reconcile(&definition) {
            return Ok(SyncOutcome::Skipped(SkipReason::NotOwned));
        }

        let now = Time(chrono::Utc::now());
        let out = converge(&addon, &now, || self.records.list_dispatch_records(&key.namespace, &key.name));
        self.persist(&addon, out.addon, out.decision).await
    }

    /// Like [`Controller::sync`], for a raw `namespace/name` key. Malformed keys are dropped.
    pub async fn sync_key(&self, raw: &str) -> HubResult<SyncOutcome> {
        match ObjectKey::parse(raw) {
            Ok(key) => self.sync(&key).await,
            Err(e) => {
                debug!(key = %raw, error = %e, "ignoring invalid key");
                Ok(SyncOutcome::Skipped(SkipReason::InvalidKey))
            }
        }
    }

    async fn persist(&self, old: &Addon, new: Addon, decision: Decision) -> HubResult<SyncOutcome> {
        let Some(patch) = status_patch(old, &new)? else {
            counter!("status_patch_noop_total", 1u64);
            return Ok(SyncOutcome::Unchanged(decision));
        };

        let ns = old.namespace().unwrap_or_default();
        let name = old.name_any();
        info!(ns = %ns, name = %name, patch = %patch, "patching addon status");
        match self.writer.patch_status(&ns, &name, &patch).await {
            Ok(_) => {
                counter!("status_patch_total", 1u64);
                Ok(SyncOutcome::Patched { decision, patch })
            }
            Err(e) => {
                counter!("status_patch_err_total", 1u64);
                warn!(ns = %ns, name = %name, error = %e, "status patch failed");
                Err(e)
            }
        }
    }
}

pub fn addon_key(addon: &Addon) -> ObjectKey {
    ObjectKey::new(addon.namespace().unwrap_or_default(), addon.name_any())
}

/// Every Addon instance of the defined add-on, across cluster namespaces.
pub fn definition_keys(definition: &AddonDefinition, addons: &dyn AddonLister) -> Vec<ObjectKey> {
    match addons.list_addons_named(&definition.name_any()) {
        Ok(list) => list.iter().map(|a| addon_key(a)).collect(),
        Err(e) => {
            warn!(definition = %definition.name_any(), error = %e, "listing addons for definition failed");
            Vec::new()
        }
    }
}

/// `(record namespace, addon-name label)`; unlabelled records map to nothing.
pub fn dispatch_key(record: &DispatchRecord) -> Option<ObjectKey> {
    let addon = record.labels().get(ADDON_LABEL).filter(|v| !v.is_empty())?;
    Some(ObjectKey::new(record.namespace().unwrap_or_default(), addon.clone()))
}
