//! addonhub store: in-RAM object caches behind lister traits.
//!
//! Caches are fed by watch streams applying [`Delta`]s; readers get cheap `Arc` snapshots
//! and never block writers. The Addon lister is also implemented for the kube runtime's
//! reflector [`Store`], which the controller owns.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use addonhub_core::{Addon, AddonDefinition, Delta, DispatchRecord, HubResult, ObjectKey, ADDON_LABEL};
use arc_swap::ArcSwap;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Resource, ResourceExt};

/// Read access to cached Addons.
pub trait AddonLister: Send + Sync {
    fn get_addon(&self, namespace: &str, name: &str) -> HubResult<Option<Arc<Addon>>>;
    /// All Addons with the given add-on name, across cluster namespaces.
    fn list_addons_named(&self, name: &str) -> HubResult<Vec<Arc<Addon>>>;
}

/// Read access to cached AddonDefinitions (cluster-scoped).
pub trait DefinitionLister: Send + Sync {
    fn get_definition(&self, name: &str) -> HubResult<Option<Arc<AddonDefinition>>>;
}

/// Read access to cached DispatchRecords.
pub trait DispatchLister: Send + Sync {
    /// Records in `namespace` labelled for `addon_name`, ordered by record name.
    fn list_dispatch_records(&self, namespace: &str, addon_name: &str) -> HubResult<Vec<Arc<DispatchRecord>>>;
}

/// Partial status write on the Addon `status` subresource.
#[async_trait::async_trait]
pub trait StatusWriter: Send + Sync {
    /// Submit a JSON merge patch and return the updated object.
    async fn patch_status(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> HubResult<Addon>;
}

type Index<K> = BTreeMap<ObjectKey, Arc<K>>;

/// Snapshot cache for one resource kind, keyed by `(namespace, name)`.
pub struct ObjectCache<K> {
    snap: ArcSwap<Index<K>>,
    synced: AtomicBool,
}

impl<K> Default for ObjectCache<K> {
    fn default() -> Self {
        Self { snap: ArcSwap::from_pointee(Index::new()), synced: AtomicBool::new(false) }
    }
}

impl<K: Resource + Clone> ObjectCache<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_of(obj: &K) -> ObjectKey {
        ObjectKey::new(obj.namespace().unwrap_or_default(), obj.name_any())
    }

    /// Apply a watch delta and return the objects it touched (old and new).
    pub fn apply(&self, delta: Delta<K>) -> Vec<Arc<K>> {
        match delta {
            Delta::Applied(obj) => {
                let obj = Arc::new(obj);
                let key = Self::key_of(&obj);
                self.snap.rcu(|cur| {
                    let mut next = Index::clone(cur);
                    next.insert(key.clone(), Arc::clone(&obj));
                    next
                });
                vec![obj]
            }
            Delta::Deleted(obj) => {
                let key = Self::key_of(&obj);
                self.snap.rcu(|cur| {
                    let mut next = Index::clone(cur);
                    next.remove(&key);
                    next
                });
                vec![Arc::new(obj)]
            }
            Delta::Restarted(list) => {
                let next: Index<K> = list.into_iter().map(|o| (Self::key_of(&o), Arc::new(o))).collect();
                let prev = self.snap.swap(Arc::new(next));
                let cur = self.snap.load();
                let mut touched: Vec<Arc<K>> = cur.values().cloned().collect();
                touched.extend(prev.iter().filter(|(k, _)| !cur.contains_key(*k)).map(|(_, v)| Arc::clone(v)));
                self.synced.store(true, Ordering::Release);
                touched
            }
        }
    }

    pub fn get(&self, key: &ObjectKey) -> Option<Arc<K>> {
        self.snap.load().get(key).cloned()
    }

    pub fn list(&self) -> Vec<Arc<K>> {
        self.snap.load().values().cloned().collect()
    }

    /// Objects of one namespace, in name order.
    pub fn list_namespace(&self, namespace: &str) -> Vec<Arc<K>> {
        let snap = self.snap.load();
        snap.range(ObjectKey::new(namespace, "")..)
            .take_while(|(k, _)| k.namespace == namespace)
            .map(|(_, v)| Arc::clone(v))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.snap.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether an initial list has been received.
    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }
}

/// The three caches the convergence controller reads.
///
/// Under the kube runtime the Addon side is served by the controller's own reflector
/// store instead, and only `definitions` and `records` are fed here.
#[derive(Default)]
pub struct Cache {
    pub addons: Arc<ObjectCache<Addon>>,
    pub definitions: Arc<ObjectCache<AddonDefinition>>,
    pub records: Arc<ObjectCache<DispatchRecord>>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Definitions and dispatch records have both seen an initial list.
    pub fn watches_synced(&self) -> bool {
        self.definitions.is_synced() && self.records.is_synced()
    }
}

impl AddonLister for Cache {
    fn get_addon(&self, namespace: &str, name: &str) -> HubResult<Option<Arc<Addon>>> {
        Ok(self.addons.get(&ObjectKey::new(namespace, name)))
    }

    fn list_addons_named(&self, name: &str) -> HubResult<Vec<Arc<Addon>>> {
        Ok(self.addons.list().into_iter().filter(|a| a.name_any() == name).collect())
    }
}

impl AddonLister for Store<Addon> {
    fn get_addon(&self, namespace: &str, name: &str) -> HubResult<Option<Arc<Addon>>> {
        Ok(self.get(&ObjectRef::new(name).within(namespace)))
    }

    fn list_addons_named(&self, name: &str) -> HubResult<Vec<Arc<Addon>>> {
        Ok(self.state().into_iter().filter(|a| a.name_any() == name).collect())
    }
}

impl DefinitionLister for Cache {
    fn get_definition(&self, name: &str) -> HubResult<Option<Arc<AddonDefinition>>> {
        Ok(self.definitions.get(&ObjectKey::new("", name)))
    }
}

impl DispatchLister for Cache {
    fn list_dispatch_records(&self, namespace: &str, addon_name: &str) -> HubResult<Vec<Arc<DispatchRecord>>> {
        Ok(self
            .records
            .list_namespace(namespace)
            .into_iter()
            .filter(|r| r.labels().get(ADDON_LABEL).map(String::as_str) == Some(addon_name))
            .collect())
    }
}
