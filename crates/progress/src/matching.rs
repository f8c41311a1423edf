//! Dispatch matching: do the dispatched bundles carry the desired config hashes, and are they
//! applied and available at their current generation?

use std::collections::BTreeMap;
use std::sync::Arc;

use addonhub_core::{
    config_identity, find_condition, pre_delete_hook_record_name, Addon, ConditionExt, ConfigReference, DispatchRecord,
    CONDITION_WORK_APPLIED, CONDITION_WORK_AVAILABLE, CONFIG_SPEC_HASH_ANNOTATION,
};
use kube::ResourceExt;
use tracing::warn;

/// Outcome of evaluating all dispatch records of one Addon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matching {
    /// No non-hook record exists yet.
    NoRecords,
    /// The named record was stamped with hashes other than the desired ones.
    ConfigsMismatch(String),
    /// The named record is not applied and available at its current generation.
    NotReady(String),
    /// Every non-hook record matches and is ready.
    Converged,
}

impl Matching {
    /// Message suffix for a still-converging outcome.
    pub fn message(&self) -> &'static str {
        match self {
            Matching::NoRecords => "no addon works",
            Matching::ConfigsMismatch(_) => "configs mismatch",
            Matching::NotReady(_) => "work is not ready",
            Matching::Converged => "",
        }
    }
}

/// Walk records in listing order; the first failing record decides.
pub fn evaluate_records(addon: &Addon, records: &[Arc<DispatchRecord>]) -> Matching {
    let hook_prefix = pre_delete_hook_record_name(&addon.name_any());
    let mut seen = false;
    for record in records.iter().filter(|r| !r.name_any().starts_with(&hook_prefix)) {
        seen = true;
        if !record_configs_match(record, addon) {
            return Matching::ConfigsMismatch(record.name_any());
        }
        if !record_is_ready(record) {
            return Matching::NotReady(record.name_any());
        }
    }
    if seen {
        Matching::Converged
    } else {
        Matching::NoRecords
    }
}

fn config_references(addon: &Addon) -> &[ConfigReference] {
    addon.status.as_ref().map(|s| s.config_references.as_slice()).unwrap_or(&[])
}

/// Desired config hashes keyed the same way the dispatch subsystem stamps them.
pub fn desired_spec_hashes(references: &[ConfigReference]) -> BTreeMap<String, String> {
    references
        .iter()
        .filter_map(|r| r.desired_config.as_ref().map(|d| (config_identity(&r.gr, &d.referent), d.spec_hash.clone())))
        .collect()
}

/// Whether the record's spec-hash annotation equals the Addon's desired config hashes.
pub fn record_configs_match(record: &DispatchRecord, addon: &Addon) -> bool {
    let references = config_references(addon);
    let Some(raw) = record.annotations().get(CONFIG_SPEC_HASH_ANNOTATION) else {
        return references.is_empty();
    };

    // a JSON `null` annotation decodes to no hashes at all
    let stamped: BTreeMap<String, String> = match serde_json::from_str::<Option<BTreeMap<String, String>>>(raw) {
        Ok(m) => m.unwrap_or_default(),
        Err(e) => {
            warn!(
                ns = %record.namespace().unwrap_or_default(),
                record = %record.name_any(),
                error = %e,
                "malformed config spec hash annotation"
            );
            return false;
        }
    };

    // empty hash: the dispatch subsystem has not finished stamping
    if stamped.values().any(|h| h.is_empty()) {
        return false;
    }
    if references.iter().any(|r| r.desired_config.as_ref().map_or(true, |d| d.spec_hash.is_empty())) {
        return false;
    }

    stamped == desired_spec_hashes(references)
}

/// Ready iff both `Available` and `Applied` are True and observed at the record's generation.
pub fn record_is_ready(record: &DispatchRecord) -> bool {
    let conditions = record.status.as_ref().map(|s| s.conditions.as_slice()).unwrap_or(&[]);
    let generation = record.metadata.generation;
    [CONDITION_WORK_AVAILABLE, CONDITION_WORK_APPLIED]
        .iter()
        .all(|t| find_condition(conditions, t).is_some_and(|c| c.is_true_at(generation)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use addonhub_core::{
        AddonSpec, AddonStatus, ConfigGroupResource, ConfigReferent, ConfigSpecHash, DispatchSpec, DispatchStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

    fn addon_with_hash(hash: Option<&str>) -> Addon {
        let mut a = Addon::new("test", AddonSpec::default());
        a.metadata.namespace = Some("cluster1".into());
        let references = match hash {
            None => vec![],
            Some(h) => vec![ConfigReference {
                gr: ConfigGroupResource { group: "core".into(), resource: "foo".into() },
                desired_config: Some(ConfigSpecHash {
                    referent: ConfigReferent { namespace: "open-cluster-management".into(), name: "test".into() },
                    spec_hash: h.into(),
                }),
                ..Default::default()
            }],
        };
        a.status = Some(AddonStatus { config_references: references, ..Default::default() });
        a
    }

    fn cond(type_: &str, status: &str, observed: i64) -> Condition {
        Condition {
            type_: type_.into(),
            status: status.into(),
            reason: String::new(),
            message: String::new(),
            observed_generation: Some(observed),
            last_transition_time: Time(chrono::Utc::now()),
        }
    }

    fn record(name: &str, annotation: Option<&str>, generation: i64, conditions: Vec<Condition>) -> DispatchRecord {
        let mut r = DispatchRecord::new(name, DispatchSpec::default());
        r.metadata.namespace = Some("cluster1".into());
        r.metadata.generation = Some(generation);
        if let Some(a) = annotation {
            r.metadata.annotations = Some([(CONFIG_SPEC_HASH_ANNOTATION.to_string(), a.to_string())].into_iter().collect());
        }
        r.status = Some(DispatchStatus { conditions });
        r
    }

    fn ready(generation: i64) -> Vec<Condition> {
        vec![cond("Applied", "True", generation), cond("Available", "True", generation)]
    }

    #[test]
    fn missing_annotation_matches_only_without_configs() {
        let r = record("addon-test-deploy", None, 1, ready(1));
        assert!(record_configs_match(&r, &addon_with_hash(None)));
        assert!(!record_configs_match(&r, &addon_with_hash(Some("hash"))));
    }

    #[test]
    fn hash_comparison() {
        let a = addon_with_hash(Some("hashnew"));
        let same = record("w", Some(r#"{"foo.core/open-cluster-management/test":"hashnew"}"#), 1, vec![]);
        let stale = record("w", Some(r#"{"foo.core/open-cluster-management/test":"hash"}"#), 1, vec![]);
        let unstamped = record("w", Some(r#"{"foo.core/open-cluster-management/test":""}"#), 1, vec![]);
        let extra = record(
            "w",
            Some(r#"{"foo.core/open-cluster-management/test":"hashnew","bar/ns/x":"h"}"#),
            1,
            vec![],
        );
        let garbage = record("w", Some("{not json"), 1, vec![]);
        assert!(record_configs_match(&same, &a));
        assert!(!record_configs_match(&stale, &a));
        assert!(!record_configs_match(&unstamped, &a));
        assert!(!record_configs_match(&extra, &a));
        assert!(!record_configs_match(&garbage, &a));
    }

    #[test]
    fn null_annotation_is_an_empty_hash_set() {
        let r = record("w", Some("null"), 1, vec![]);
        assert!(record_configs_match(&r, &addon_with_hash(None)));
        assert!(!record_configs_match(&r, &addon_with_hash(Some("hashnew"))));
        let empty = record("w", Some("{}"), 1, vec![]);
        assert!(record_configs_match(&empty, &addon_with_hash(None)));
    }

    #[test]
    fn empty_desired_hash_never_matches() {
        let a = addon_with_hash(Some(""));
        let r = record("w", Some(r#"{"foo.core/open-cluster-management/test":""}"#), 1, vec![]);
        assert!(!record_configs_match(&r, &a));
    }

    #[test]
    fn readiness_requires_both_conditions_at_current_generation() {
        assert!(record_is_ready(&record("w", None, 2, ready(2))));
        assert!(!record_is_ready(&record("w", None, 3, ready(2))), "conditions lag generation");
        assert!(!record_is_ready(&record("w", None, 1, vec![cond("Applied", "True", 1)])));
        assert!(!record_is_ready(&record(
            "w",
            None,
            1,
            vec![cond("Applied", "True", 1), cond("Available", "False", 1)]
        )));
    }

    #[test]
    fn evaluation_skips_hooks_and_stops_at_first_failure() {
        let a = addon_with_hash(None);
        let hook = Arc::new(record("addon-test-pre-delete", Some("{bad"), 1, vec![]));
        let good = Arc::new(record("addon-test-deploy", None, 1, ready(1)));
        let lagging = Arc::new(record("addon-test-deploy-1", None, 2, ready(1)));

        assert_eq!(evaluate_records(&a, &[]), Matching::NoRecords);
        assert_eq!(evaluate_records(&a, &[hook.clone()]), Matching::NoRecords);
        assert_eq!(evaluate_records(&a, &[hook.clone(), good.clone()]), Matching::Converged);
        assert_eq!(
            evaluate_records(&a, &[good, lagging]),
            Matching::NotReady("addon-test-deploy-1".into())
        );
    }
}
