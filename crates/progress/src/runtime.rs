//! kube runtime wiring: the Addon controller with its reconciler and error policy.
//!
//! Addons come from the controller's own reflector. Definitions and dispatch records are
//! list+watched into the shared [`Cache`] and re-trigger the Addons they map to.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use addonhub_core::{Addon, AddonDefinition, DispatchRecord, HubError, ObjectKey};
use addonhub_kubehub::{addon_api, cached_watch, definition_api, dispatch_api, dispatch_watch_config, KubeStatusWriter};
use addonhub_store::Cache;
use futures::StreamExt;
use kube::runtime::controller::{self, Action};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::{watcher, Controller as KubeController};
use kube::Client;
use metrics::{counter, histogram};
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::driver::{addon_key, definition_keys, dispatch_key, Controller, SyncOutcome};
use crate::filter::ManagedBySelf;

/// Re-check delay for an Addon seen before definitions and records finished listing.
pub const CACHE_SYNC_RETRY: Duration = Duration::from_secs(1);

/// Shared state handed to every reconcile.
pub struct Context {
    controller: Arc<Controller>,
    cache: Arc<Cache>,
    backoff_base: Duration,
    backoff_max: Duration,
    failures: Mutex<FxHashMap<ObjectKey, u32>>,
}

impl Context {
    pub fn new(controller: Arc<Controller>, cache: Arc<Cache>, cfg: &ControllerConfig) -> Self {
        Self {
            controller,
            cache,
            backoff_base: cfg.backoff_base,
            backoff_max: cfg.backoff_max,
            failures: Mutex::new(FxHashMap::default()),
        }
    }

    /// Consecutive failed reconciles of `key`.
    pub fn failures(&self, key: &ObjectKey) -> u32 {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner).get(key).copied().unwrap_or(0)
    }

    /// `base * 2^(failures - 1)`, capped at the configured maximum.
    pub fn backoff(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(31);
        self.backoff_base.saturating_mul(1u32 << exp).min(self.backoff_max)
    }

    fn record_failure(&self, key: &ObjectKey) -> u32 {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let n = failures.entry(key.clone()).or_insert(0);
        *n = n.saturating_add(1);
        *n
    }

    fn forget(&self, key: &ObjectKey) {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner).remove(key);
    }
}

/// Reconcile one Addon. Success waits for the next change; errors go to [`error_policy`].
pub async fn reconcile(addon: Arc<Addon>, ctx: Arc<Context>) -> Result<Action, HubError> {
    let key = addon_key(&addon);
    if !ctx.cache.watches_synced() {
        debug!(key = %key, "definitions or dispatch records still listing; retry");
        return Ok(Action::requeue(CACHE_SYNC_RETRY));
    }

    let t0 = Instant::now();
    counter!("reconcile_total", 1u64);
    let res = ctx.controller.sync(&key).await;
    histogram!("reconcile_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);

    if let SyncOutcome::Skipped(reason) = res? {
        counter!("reconcile_skipped_total", 1u64);
        debug!(key = %key, reason = ?reason, "reconcile skipped");
    }
    ctx.forget(&key);
    Ok(Action::await_change())
}

/// Requeue a failed Addon with per-key exponential backoff. Write conflicts are expected
/// under concurrent writers and only logged at debug.
pub fn error_policy(addon: Arc<Addon>, error: &HubError, ctx: Arc<Context>) -> Action {
    let key = addon_key(&addon);
    let failures = ctx.record_failure(&key);
    let delay = ctx.backoff(failures);
    counter!("reconcile_err_total", 1u64);
    counter!("reconcile_requeues_total", 1u64);
    if error.is_conflict() {
        debug!(key = %key, "status conflict; requeue");
    } else {
        warn!(key = %key, error = %error, failures, delay_ms = delay.as_millis() as u64, "reconcile failed; requeue");
    }
    Action::requeue(delay)
}

fn addon_ref(key: ObjectKey) -> ObjectRef<Addon> {
    ObjectRef::new(&key.name).within(&key.namespace)
}

/// Run the Addon controller against `client` until `shutdown` resolves.
pub async fn run<F>(client: Client, cfg: ControllerConfig, shutdown: F)
where
    F: Future<Output = ()> + Send + Sync + 'static,
{
    let ns = cfg.namespace.as_deref();
    let cache = Arc::new(Cache::new());
    let addons = KubeController::new(addon_api(client.clone(), ns), watcher::Config::default());
    let store = addons.store();

    let controller = Arc::new(Controller::new(
        Arc::new(store.clone()),
        cache.clone(),
        cache.clone(),
        Arc::new(KubeStatusWriter::new(client.clone())),
        Arc::new(ManagedBySelf::new(cfg.addons.clone())),
    ));
    let ctx = Arc::new(Context::new(controller, cache.clone(), &cfg));

    let definitions = cached_watch(definition_api(client.clone()), watcher::Config::default(), cache.definitions.clone());
    let records = cached_watch(dispatch_api(client, ns), dispatch_watch_config(), cache.records.clone());
    let concurrency = u16::try_from(cfg.workers).unwrap_or(u16::MAX);

    info!(workers = concurrency, ns = ?cfg.namespace, addons = ?cfg.addons, "addon controller starting");
    addons
        .with_config(controller::Config::default().concurrency(concurrency))
        .watches_stream(records, |r: DispatchRecord| dispatch_key(&r).map(addon_ref))
        .watches_stream(definitions, move |d: AddonDefinition| {
            definition_keys(&d, &store).into_iter().map(addon_ref).collect::<Vec<_>>()
        })
        .graceful_shutdown_on(shutdown)
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(addon = %obj, "reconciled"),
                Err(e) => debug!(error = %e, "controller event dropped"),
            }
        })
        .await;
    info!("addon controller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use addonhub_core::HubResult;
    use addonhub_store::StatusWriter;

    struct NoWrites;

    #[async_trait::async_trait]
    impl StatusWriter for NoWrites {
        async fn patch_status(&self, _: &str, _: &str, _: &serde_json::Value) -> HubResult<Addon> {
            Err(HubError::Store("unexpected write".into()))
        }
    }

    fn context(base_ms: u64, max_ms: u64) -> Context {
        let cache = Arc::new(Cache::new());
        let controller =
            Arc::new(Controller::from_cache(cache.clone(), Arc::new(NoWrites), Arc::new(ManagedBySelf::all())));
        let cfg = ControllerConfig {
            backoff_base: Duration::from_millis(base_ms),
            backoff_max: Duration::from_millis(max_ms),
            ..Default::default()
        };
        Context::new(controller, cache, &cfg)
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let ctx = context(5, 30);
        assert_eq!(ctx.backoff(1), Duration::from_millis(5));
        assert_eq!(ctx.backoff(2), Duration::from_millis(10));
        assert_eq!(ctx.backoff(3), Duration::from_millis(20));
        assert_eq!(ctx.backoff(4), Duration::from_millis(30));
        assert_eq!(ctx.backoff(u32::MAX), Duration::from_millis(30));
    }

    #[test]
    fn addon_refs_are_namespaced() {
        let r = addon_ref(ObjectKey::new("cluster1", "test"));
        assert_eq!(r.name, "test");
        assert_eq!(r.namespace.as_deref(), Some("cluster1"));
    }
}
