//! addonhub kubehub – kube client, cache-feeding watch streams and status writes

#![forbid(unsafe_code)]

use std::fmt::Debug;
use std::sync::Arc;

use addonhub_core::{Addon, AddonDefinition, Delta, DispatchRecord, HubResult, ADDON_LABEL};
use addonhub_store::{ObjectCache, StatusWriter};
use anyhow::{Context, Result};
use futures::{stream, Stream, TryStreamExt};
use kube::{
    api::{Api, Patch, PatchParams},
    runtime::watcher::{self, Event},
    runtime::WatchStreamExt,
    Client, Resource, ResourceExt,
};
use metrics::counter;
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

static CLIENT: OnceCell<Client> = OnceCell::const_new();

/// Shared kube client built from the ambient kubeconfig / in-cluster config.
pub async fn get_kube_client() -> Result<Client> {
    let client = CLIENT
        .get_or_try_init(|| async { Client::try_default().await })
        .await
        .context("building kube client")?;
    Ok(client.clone())
}

/// Addons in one cluster namespace, or across all when `namespace` is None.
pub fn addon_api(client: Client, namespace: Option<&str>) -> Api<Addon> {
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

pub fn definition_api(client: Client) -> Api<AddonDefinition> {
    Api::all(client)
}

pub fn dispatch_api(client: Client, namespace: Option<&str>) -> Api<DispatchRecord> {
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Watcher config for dispatch records: only those carrying the add-on label.
pub fn dispatch_watch_config() -> watcher::Config {
    watcher::Config::default().labels(ADDON_LABEL)
}

/// Map one watch event onto the cache delta it stands for.
pub fn delta_of<K>(event: Event<K>) -> Delta<K> {
    match event {
        Event::Applied(o) => Delta::Applied(o),
        Event::Deleted(o) => Delta::Deleted(o),
        Event::Restarted(list) => Delta::Restarted(list),
    }
}

/// List+watch `api` into `cache`, yielding every object an event touched.
///
/// Deleted objects and objects dropped by a relist are yielded too, so whoever maps them to
/// reconcile keys sees removals. Watch errors are retried with backoff and passed through.
pub fn cached_watch<K>(
    api: Api<K>,
    cfg: watcher::Config,
    cache: Arc<ObjectCache<K>>,
) -> impl Stream<Item = Result<K, watcher::Error>> + Send + 'static
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let kind = K::kind(&()).to_string();
    let err_kind = kind.clone();
    watcher::watcher(api, cfg)
        .default_backoff()
        .inspect_err(move |e| {
            counter!("watch_errors_total", 1u64);
            warn!(kind = %err_kind, error = %e, "watch error; retrying");
        })
        .map_ok(move |event| {
            counter!("cache_events_total", 1u64);
            let touched = cache.apply(delta_of(event));
            debug!(kind = %kind, touched = touched.len(), cached = cache.len(), "cache updated");
            stream::iter(touched.into_iter().map(|o| Ok::<_, watcher::Error>(K::clone(&o))))
        })
        .try_flatten()
}

/// Writes Addon status through the `status` subresource with a JSON merge patch.
#[derive(Clone)]
pub struct KubeStatusWriter {
    client: Client,
}

impl KubeStatusWriter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl StatusWriter for KubeStatusWriter {
    async fn patch_status(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> HubResult<Addon> {
        let api: Api<Addon> = Api::namespaced(self.client.clone(), namespace);
        let updated = api.patch_status(name, &PatchParams::default(), &Patch::Merge(patch)).await?;
        debug!(ns = %namespace, name = %name, rv = ?updated.resource_version(), "status patched");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> DispatchRecord {
        let mut r = DispatchRecord::new(name, Default::default());
        r.metadata.namespace = Some("cluster1".into());
        r
    }

    #[test]
    fn watch_events_become_cache_deltas() {
        let cache = ObjectCache::<DispatchRecord>::new();
        cache.apply(delta_of(Event::Restarted(vec![record("a"), record("b")])));
        assert!(cache.is_synced());
        cache.apply(delta_of(Event::Deleted(record("a"))));
        cache.apply(delta_of(Event::Applied(record("c"))));
        let names: Vec<_> = cache.list().iter().map(|r| r.name_any()).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn dispatch_watch_selects_labelled_records() {
        let cfg = dispatch_watch_config();
        assert_eq!(cfg.label_selector.as_deref(), Some(ADDON_LABEL));
    }
}
