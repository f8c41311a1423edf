//! Status patch construction (JSON merge patch, RFC 7386).

use addonhub_core::{Addon, AddonStatus, HubResult};
use serde_json::{json, Map, Value as Json};

/// Merge patch turning `original` into `modified`. Objects recurse, removed keys become
/// `null`, everything else (arrays included) is replaced wholesale.
pub fn create_merge_patch(original: &Json, modified: &Json) -> Json {
    match (original, modified) {
        (Json::Object(oo), Json::Object(mo)) => {
            let mut patch = Map::new();
            for (k, mv) in mo.iter() {
                match oo.get(k) {
                    Some(ov) if ov == mv => continue,
                    Some(ov) if ov.is_object() && mv.is_object() => {
                        patch.insert(k.clone(), create_merge_patch(ov, mv));
                    }
                    _ => {
                        patch.insert(k.clone(), mv.clone());
                    }
                }
            }
            for k in oo.keys() {
                if !mo.contains_key(k) {
                    patch.insert(k.clone(), Json::Null);
                }
            }
            Json::Object(patch)
        }
        (_, m) => m.clone(),
    }
}

fn status_doc(status: &AddonStatus) -> HubResult<Json> {
    let mut s = Map::new();
    if !status.config_references.is_empty() {
        s.insert("configReferences".into(), serde_json::to_value(&status.config_references)?);
    }
    if !status.conditions.is_empty() {
        s.insert("conditions".into(), serde_json::to_value(&status.conditions)?);
    }
    Ok(json!({ "status": s }))
}

/// Patch for the status subresource, or `None` when the status is unchanged.
///
/// Only config references and conditions are compared. The patch carries the observed
/// `uid` and `resourceVersion` so a concurrent write turns into a conflict.
pub fn status_patch(old: &Addon, new: &Addon) -> HubResult<Option<Json>> {
    let old_status = old.status.clone().unwrap_or_default();
    let new_status = new.status.clone().unwrap_or_default();
    if old_status == new_status {
        return Ok(None);
    }

    let before = status_doc(&old_status)?;
    let mut after = status_doc(&new_status)?;
    let mut meta = Map::new();
    if let Some(uid) = &new.metadata.uid {
        meta.insert("uid".into(), Json::String(uid.clone()));
    }
    if let Some(rv) = &new.metadata.resource_version {
        meta.insert("resourceVersion".into(), Json::String(rv.clone()));
    }
    if !meta.is_empty() {
        if let Some(obj) = after.as_object_mut() {
            obj.insert("metadata".into(), Json::Object(meta));
        }
    }

    Ok(Some(create_merge_patch(&before, &after)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use addonhub_core::{new_condition, ConfigReference, ConfigReferent, ConfigSpecHash, STATUS_TRUE};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    #[test]
    fn merge_patch_recurses_and_nulls_removed_keys() {
        let a = json!({"status": {"conditions": [1], "configReferences": [1]}, "keep": {"x": 1}});
        let b = json!({"status": {"conditions": [1, 2]}, "keep": {"x": 1}, "metadata": {"uid": "u"}});
        let p = create_merge_patch(&a, &b);
        assert_eq!(p, json!({"status": {"conditions": [1, 2], "configReferences": null}, "metadata": {"uid": "u"}}));
    }

    #[test]
    fn scalars_and_type_changes_replace_wholesale() {
        assert_eq!(create_merge_patch(&json!({"a": {"b": 1}}), &json!({"a": 2})), json!({"a": 2}));
        assert_eq!(create_merge_patch(&json!(1), &json!({"a": 1})), json!({"a": 1}));
        assert_eq!(create_merge_patch(&json!({"a": 1}), &json!({"a": 1})), json!({}));
    }

    fn addon() -> Addon {
        let mut a = Addon::new("test", Default::default());
        a.metadata.namespace = Some("cluster1".into());
        a.metadata.uid = Some("uid-1".into());
        a.metadata.resource_version = Some("42".into());
        a
    }

    #[test]
    fn identical_status_needs_no_patch() {
        let a = addon();
        assert_eq!(status_patch(&a, &a).unwrap(), None);

        let mut empty = addon();
        empty.status = Some(AddonStatus::default());
        assert_eq!(status_patch(&a, &empty).unwrap(), None, "absent and empty status are equal");
    }

    #[test]
    fn patch_carries_identity_and_only_changed_fields() {
        let now = Time(chrono::Utc::now());
        let hash = ConfigSpecHash { referent: ConfigReferent { namespace: "ns".into(), name: "c".into() }, spec_hash: "h".into() };
        let mut old = addon();
        old.status = Some(AddonStatus {
            conditions: vec![new_condition("ManifestApplied", STATUS_TRUE, "Applied", "", &now)],
            config_references: vec![ConfigReference { desired_config: Some(hash.clone()), ..Default::default() }],
            ..Default::default()
        });
        let mut new = old.clone();
        if let Some(s) = new.status.as_mut() {
            s.config_references[0].last_applied_config = Some(hash);
        }

        let p = status_patch(&old, &new).unwrap().unwrap();
        assert_eq!(p["metadata"], json!({"uid": "uid-1", "resourceVersion": "42"}));
        assert!(p["status"].get("conditions").is_none());
        assert_eq!(p["status"]["configReferences"][0]["lastAppliedConfig"]["specHash"], json!("h"));
    }
}
