//! Helpers over `meta/v1 Condition` lists, treated as a map keyed by `type`.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Upsert `new` into `conditions` by type.
///
/// Unmatched types are appended, keeping the order of existing entries. For a matched type,
/// reason, message and observed generation are always overwritten; `lastTransitionTime` only
/// moves when the status actually flips.
pub fn set_condition(conditions: &mut Vec<Condition>, new: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == new.type_) {
        None => conditions.push(new),
        Some(existing) => {
            if existing.status != new.status {
                existing.status = new.status;
                existing.last_transition_time = new.last_transition_time;
            }
            existing.reason = new.reason;
            existing.message = new.message;
            existing.observed_generation = new.observed_generation;
        }
    }
}

/// Predicates used when judging dispatch record readiness.
pub trait ConditionExt {
    fn is_true(&self) -> bool;
    /// True, and observed against the given object generation.
    fn is_true_at(&self, generation: Option<i64>) -> bool;
}

impl ConditionExt for Condition {
    fn is_true(&self) -> bool {
        self.status == crate::STATUS_TRUE
    }

    fn is_true_at(&self, generation: Option<i64>) -> bool {
        self.is_true() && self.observed_generation.unwrap_or(0) == generation.unwrap_or(0)
    }
}

/// Build a condition stamped with `now`; the stamp survives only if the status changes.
pub fn new_condition(type_: &str, status: &str, reason: &str, message: impl Into<String>, now: &Time) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: status.to_string(),
        reason: reason.to_string(),
        message: message.into(),
        observed_generation: None,
        last_transition_time: now.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(secs: i64) -> Time {
        Time(Utc.timestamp_opt(secs, 0).unwrap())
    }

    #[test]
    fn set_condition_appends_unknown_types_in_order() {
        let mut list = vec![new_condition("ManifestApplied", "True", "AddonManifestApplied", "ok", &at(1))];
        set_condition(&mut list, new_condition("Progressing", "True", "Installing", "installing... ", &at(2)));
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].type_, "ManifestApplied");
        assert_eq!(list[1].type_, "Progressing");
    }

    #[test]
    fn set_condition_keeps_transition_time_when_status_unchanged() {
        let mut list = vec![new_condition("Progressing", "True", "Installing", "installing... no addon works", &at(10))];
        set_condition(&mut list, new_condition("Progressing", "True", "Installing", "installing... work is not ready", &at(20)));
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].last_transition_time, at(10));
        assert_eq!(list[0].message, "installing... work is not ready");

        set_condition(&mut list, new_condition("Progressing", "False", "InstallSucceed", "install completed with no errors.", &at(30)));
        assert_eq!(list[0].last_transition_time, at(30));
        assert_eq!(list[0].reason, "InstallSucceed");
    }

    #[test]
    fn is_true_at_requires_matching_generation() {
        let mut c = new_condition("Available", "True", "", "", &at(0));
        c.observed_generation = Some(2);
        assert!(c.is_true_at(Some(2)));
        assert!(!c.is_true_at(Some(3)));
        c.status = "False".into();
        assert!(!c.is_true_at(Some(2)));
        assert!(find_condition(&[c], "Applied").is_none());
    }
}
