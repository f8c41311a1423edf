use std::collections::HashSet;
use std::time::Duration;

/// Runtime knobs of the convergence controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Concurrent reconciles run by the kube controller.
    pub workers: usize,
    /// First retry delay after a failed reconcile; doubles per consecutive failure.
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Add-on names this controller owns; empty means every add-on.
    pub addons: HashSet<String>,
    /// Restrict Addon and dispatch record watches to one cluster namespace.
    pub namespace: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            backoff_base: Duration::from_millis(5),
            backoff_max: Duration::from_secs(1000),
            addons: HashSet::new(),
            namespace: None,
        }
    }
}

/// Split a comma separated list of add-on names, dropping blanks.
pub fn parse_addon_names(raw: &str) -> HashSet<String> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

impl ControllerConfig {
    /// Defaults overridden by `ADDONHUB_*` environment variables. Unparsable values fall back.
    pub fn from_env() -> Self {
        let d = Self::default();
        let workers = std::env::var("ADDONHUB_WORKERS").ok().and_then(|s| s.parse::<usize>().ok()).unwrap_or(d.workers);
        let backoff_max = std::env::var("ADDONHUB_BACKOFF_MAX_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(d.backoff_max);
        let addons = std::env::var("ADDONHUB_ADDONS").map(|s| parse_addon_names(&s)).unwrap_or_default();
        let namespace = std::env::var("ADDONHUB_NAMESPACE").ok().filter(|s| !s.is_empty());
        Self { workers: workers.clamp(1, u16::MAX as usize), backoff_max, addons, namespace, ..d }
    }
}
