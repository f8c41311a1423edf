//! Convergence state machine: turns the observed Addon and its dispatch records into the
//! `Progressing` condition and, on success, the last-applied config marker.

use std::sync::Arc;

use addonhub_core::{
    find_condition, new_condition, reasons, set_condition, Addon, AddonStatus, ConfigGroupResource, ConfigReference,
    DispatchRecord, HubResult, CONDITION_MANIFEST_APPLIED, CONDITION_PROGRESSING, STATUS_FALSE, STATUS_TRUE,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use serde::Serialize;

use crate::matching::{evaluate_records, Matching};
use crate::support::is_configuration_supported;

/// Rollout state of one reconcile. Nothing here is sticky; every pass starts over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Progress {
    Doing(String),
    Succeed,
    /// Only produced by a dispatch record read failure.
    Failed(String),
}

/// What a reconcile concluded, before any write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Decision {
    Unsupported(ConfigGroupResource),
    WaitingForManifestApplied,
    Rollout { progress: Progress, upgrade: bool },
}

/// The Addon with its recomputed status, plus the decision that produced it.
#[derive(Debug, Clone)]
pub struct Convergence {
    pub addon: Addon,
    pub decision: Decision,
}

/// An Addon is upgrading once any config reference has a recorded last-applied hash.
pub fn is_upgrade(references: &[ConfigReference]) -> bool {
    references.iter().any(ConfigReference::has_applied_hash)
}

/// Evaluate `addon` against its dispatch records.
///
/// `list_records` is only called once the config kinds are supported and the
/// `ManifestApplied` condition exists.
pub fn converge<F>(addon: &Addon, now: &Time, list_records: F) -> Convergence
where
    F: FnOnce() -> HubResult<Vec<Arc<DispatchRecord>>>,
{
    let mut next = addon.clone();

    if let Err(gr) = is_configuration_supported(addon) {
        let status = next.status.get_or_insert_with(AddonStatus::default);
        set_condition(
            &mut status.conditions,
            new_condition(
                CONDITION_PROGRESSING,
                STATUS_FALSE,
                reasons::CONFIGURATION_UNSUPPORTED,
                format!("Configuration with gvr {}/{} is not supported for this addon", gr.group, gr.resource),
                now,
            ),
        );
        return Convergence { addon: next, decision: Decision::Unsupported(gr) };
    }

    let status = next.status.get_or_insert_with(AddonStatus::default);
    if find_condition(&status.conditions, CONDITION_MANIFEST_APPLIED).is_none() {
        set_condition(
            &mut status.conditions,
            new_condition(
                CONDITION_PROGRESSING,
                STATUS_FALSE,
                reasons::WAITING_FOR_MANIFEST_APPLIED,
                "Waiting for ManagedClusterAddOn ManifestApplied condition",
                now,
            ),
        );
        return Convergence { addon: next, decision: Decision::WaitingForManifestApplied };
    }

    let upgrade = is_upgrade(&status.config_references);
    let progress = match list_records() {
        Err(e) => Progress::Failed(e.to_string()),
        Ok(records) => match evaluate_records(addon, &records) {
            Matching::Converged => Progress::Succeed,
            other => Progress::Doing(other.message().to_string()),
        },
    };

    set_progressing_and_last_applied(status, upgrade, &progress, now);
    Convergence { addon: next, decision: Decision::Rollout { progress, upgrade } }
}

/// Apply `progress` to the status.
///
/// Once every config reference has last-applied equal to desired, the condition is left as
/// is. With no config references the condition is always refreshed.
pub fn set_progressing_and_last_applied(status: &mut AddonStatus, upgrade: bool, progress: &Progress, now: &Time) {
    let frozen = !status.config_references.is_empty() && status.config_references.iter().all(ConfigReference::is_converged);
    if frozen {
        return;
    }

    let condition = match progress {
        Progress::Doing(message) => {
            if upgrade {
                new_condition(CONDITION_PROGRESSING, STATUS_TRUE, reasons::UPGRADING, format!("upgrading... {}", message), now)
            } else {
                new_condition(CONDITION_PROGRESSING, STATUS_TRUE, reasons::INSTALLING, format!("installing... {}", message), now)
            }
        }
        Progress::Succeed => {
            for reference in status.config_references.iter_mut() {
                reference.last_applied_config = reference.desired_config.clone();
            }
            if upgrade {
                new_condition(CONDITION_PROGRESSING, STATUS_FALSE, reasons::UPGRADE_SUCCEED, "upgrade completed with no errors.", now)
            } else {
                new_condition(CONDITION_PROGRESSING, STATUS_FALSE, reasons::INSTALL_SUCCEED, "install completed with no errors.", now)
            }
        }
        Progress::Failed(message) => {
            let reason = if upgrade { reasons::UPGRADE_FAILED } else { reasons::INSTALL_FAILED };
            new_condition(CONDITION_PROGRESSING, STATUS_FALSE, reason, message.clone(), now)
        }
    };
    set_condition(&mut status.conditions, condition);
}

#[cfg(test)]
mod tests {
    use super::*;
    use addonhub_core::{ConfigReferent, ConfigSpecHash, HubError};

    fn now() -> Time {
        Time(chrono::Utc::now())
    }

    fn hash(h: &str) -> Option<ConfigSpecHash> {
        Some(ConfigSpecHash { referent: ConfigReferent { namespace: "ns".into(), name: "test".into() }, spec_hash: h.into() })
    }

    fn reference(desired: &str, last: Option<&str>) -> ConfigReference {
        ConfigReference { desired_config: hash(desired), last_applied_config: last.and_then(hash), ..Default::default() }
    }

    fn progressing(status: &AddonStatus) -> Option<(String, String, String)> {
        find_condition(&status.conditions, CONDITION_PROGRESSING).map(|c| (c.status.clone(), c.reason.clone(), c.message.clone()))
    }

    #[test]
    fn upgrade_needs_a_non_empty_applied_hash() {
        assert!(!is_upgrade(&[]));
        assert!(!is_upgrade(&[reference("a", None)]));
        assert!(!is_upgrade(&[reference("a", Some(""))]));
        assert!(is_upgrade(&[reference("a", None), reference("b", Some("old"))]));
    }

    #[test]
    fn succeed_advances_every_last_applied() {
        let mut status = AddonStatus { config_references: vec![reference("h1", None), reference("h2", Some("old"))], ..Default::default() };
        set_progressing_and_last_applied(&mut status, true, &Progress::Succeed, &now());
        assert!(status.config_references.iter().all(ConfigReference::is_converged));
        assert_eq!(
            progressing(&status),
            Some(("False".into(), "UpgradeSucceed".into(), "upgrade completed with no errors.".into()))
        );
    }

    #[test]
    fn doing_and_failed_leave_last_applied_alone() {
        let mut status = AddonStatus { config_references: vec![reference("h1", Some("old"))], ..Default::default() };
        let before = status.config_references.clone();

        set_progressing_and_last_applied(&mut status, true, &Progress::Doing("work is not ready".into()), &now());
        assert_eq!(status.config_references, before);
        assert_eq!(progressing(&status), Some(("True".into(), "Upgrading".into(), "upgrading... work is not ready".into())));

        set_progressing_and_last_applied(&mut status, true, &Progress::Failed("list failed".into()), &now());
        assert_eq!(status.config_references, before);
        assert_eq!(progressing(&status), Some(("False".into(), "UpgradeFailed".into(), "list failed".into())));
    }

    #[test]
    fn converged_references_freeze_the_condition() {
        let mut status = AddonStatus { config_references: vec![reference("h1", Some("h1"))], ..Default::default() };
        set_progressing_and_last_applied(&mut status, true, &Progress::Doing("configs mismatch".into()), &now());
        assert!(status.conditions.is_empty());
    }

    #[test]
    fn no_references_always_refreshes() {
        let mut status = AddonStatus::default();
        set_progressing_and_last_applied(&mut status, false, &Progress::Succeed, &now());
        assert_eq!(progressing(&status).map(|p| p.1), Some("InstallSucceed".into()));
    }

    #[test]
    fn list_error_becomes_failed() {
        let mut addon = Addon::new("test", Default::default());
        addon.status = Some(AddonStatus {
            conditions: vec![new_condition(CONDITION_MANIFEST_APPLIED, STATUS_TRUE, "AddonManifestApplied", "", &now())],
            ..Default::default()
        });
        let out = converge(&addon, &now(), || Err(HubError::Store("cache unavailable".into())));
        assert_eq!(
            out.decision,
            Decision::Rollout { progress: Progress::Failed("store: cache unavailable".into()), upgrade: false }
        );
        let status = out.addon.status.unwrap();
        assert_eq!(progressing(&status).map(|p| p.1), Some("InstallFailed".into()));
    }

    #[test]
    fn records_are_not_listed_before_manifest_applied() {
        let addon = Addon::new("test", Default::default());
        let out = converge(&addon, &now(), || panic!("must not list"));
        assert_eq!(out.decision, Decision::WaitingForManifestApplied);
        let status = out.addon.status.unwrap();
        assert_eq!(progressing(&status).map(|p| p.1), Some("WaitingForManifestApplied".into()));
    }
}
