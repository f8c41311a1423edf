//! addonhub progress: the add-on rollout convergence controller.
//!
//! For every Addon (one add-on on one cluster) the controller checks that its desired
//! config kinds are supported, waits for the `ManifestApplied` condition, compares the
//! dispatched bundles against the desired config hashes and readiness, and reports the
//! outcome through the `Progressing` condition. When everything matches, each config
//! reference's `lastAppliedConfig` advances to its `desiredConfig`.
//!
//! The pipeline is a pure function of cached state ([`converge`]); [`Controller`] wraps it
//! with key resolution, the ownership predicate and the status write, and [`runtime`]
//! drives it from a kube runtime controller.

#![forbid(unsafe_code)]

pub mod config;
pub mod driver;
pub mod filter;
pub mod machine;
pub mod matching;
pub mod patch;
pub mod runtime;
pub mod support;

pub use config::ControllerConfig;
pub use driver::{addon_key, definition_keys, dispatch_key, Controller, SkipReason, SyncOutcome};
pub use filter::{ManagedBySelf, ShouldReconcile};
pub use machine::{converge, is_upgrade, set_progressing_and_last_applied, Convergence, Decision, Progress};
pub use matching::{evaluate_records, record_configs_match, record_is_ready, Matching};
pub use patch::{create_merge_patch, status_patch};
pub use runtime::{error_policy, reconcile, Context};
pub use support::is_configuration_supported;
