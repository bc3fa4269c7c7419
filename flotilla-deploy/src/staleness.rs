//! Drift detection between a deployment's desired state and what a cluster
//! reports.
//!
//! Chart name, chart version and rendered values are compared; any mismatch
//! makes the install stale. The installer's phase plays no part.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use similar::TextDiff;

use crate::chart::Release;
use crate::ledger::DeploymentRecord;

/// What one cluster should be running.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredRelease {
    pub chart_name: String,
    pub chart_version: String,
    pub values: Value,
}

impl DesiredRelease {
    /// Base values with the override for `cluster_name` merged on top.
    pub fn for_cluster(record: &DeploymentRecord, cluster_name: &str) -> Self {
        let mut values = record.values.clone();
        if let Some(overlay) = record.overrides.get(cluster_name) {
            deep_merge(&mut values, overlay);
        }
        Self {
            chart_name: record.chart.name.clone(),
            chart_version: record.chart.version.clone(),
            values: normalize(values),
        }
    }
}

/// `true` when `installed` differs from `desired` in chart name, chart version
/// or rendered values.
pub fn is_stale_deployment(desired: &DesiredRelease, installed: &Release) -> bool {
    desired.chart_name != installed.chart_name
        || desired.chart_version != installed.chart_version
        || render(&desired.values) != render(&normalize(installed.values.clone()))
}

/// Recursively merge `overlay` into `base`. Objects merge key by key; any
/// other value replaces what was there.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// SHA-256 hex digest of the rendered values.
pub fn values_digest(values: &Value) -> String {
    hex::encode(Sha256::digest(render(values)))
}

/// Unified diff of installed against desired values, rendered as YAML.
/// Empty when they match.
pub fn values_diff(installed: &Value, desired: &Value, cluster_name: &str) -> String {
    let installed = to_yaml(installed);
    let desired = to_yaml(desired);
    if installed == desired {
        return String::new();
    }
    TextDiff::from_lines(&installed, &desired)
        .unified_diff()
        .header(&format!("{cluster_name}/installed"), &format!("{cluster_name}/desired"))
        .context_radius(3)
        .to_string()
}

/// `null` and `{}` both mean "no values".
fn normalize(values: Value) -> Value {
    match values {
        Value::Null => Value::Object(Map::new()),
        other => other,
    }
}

fn render(values: &Value) -> Vec<u8> {
    // Object keys serialise in sorted order, so equal values render equal bytes.
    serde_json::to_vec(values).unwrap_or_default()
}

fn to_yaml(values: &Value) -> String {
    match normalize(values.clone()) {
        Value::Object(map) if map.is_empty() => String::new(),
        other => serde_yaml::to_string(&other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn installed(chart: &str, version: &str, values: Value) -> Release {
        Release {
            name: "web".into(),
            namespace: "default".into(),
            chart_name: chart.into(),
            chart_version: version.into(),
            phase: "deployed".into(),
            values,
        }
    }

    fn desired(values: Value) -> DesiredRelease {
        DesiredRelease {
            chart_name: "nginx".into(),
            chart_version: "1.0.0".into(),
            values,
        }
    }

    #[test]
    fn identical_state_is_not_stale() {
        let values = json!({ "replicas": 2, "image": { "tag": "1.25" } });
        assert!(!is_stale_deployment(
            &desired(values.clone()),
            &installed("nginx", "1.0.0", values)
        ));
    }

    #[test]
    fn key_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"a":1,"b":{"x":1,"y":2}}"#).expect("a");
        let b: Value = serde_json::from_str(r#"{"b":{"y":2,"x":1},"a":1}"#).expect("b");
        assert!(!is_stale_deployment(&desired(a), &installed("nginx", "1.0.0", b)));
    }

    #[test]
    fn null_and_empty_values_match() {
        assert!(!is_stale_deployment(
            &desired(json!({})),
            &installed("nginx", "1.0.0", Value::Null)
        ));
    }

    #[rstest]
    #[case::chart_name(installed("apache", "1.0.0", json!({ "replicas": 2 })))]
    #[case::chart_version(installed("nginx", "1.0.1", json!({ "replicas": 2 })))]
    #[case::values(installed("nginx", "1.0.0", json!({ "replicas": 3 })))]
    #[case::extra_value(installed("nginx", "1.0.0", json!({ "replicas": 2, "debug": true })))]
    fn any_mismatch_is_stale(#[case] release: Release) {
        assert!(is_stale_deployment(&desired(json!({ "replicas": 2 })), &release));
    }

    #[test]
    fn deep_merge_overlays_nested_objects() {
        let mut base = json!({ "image": { "repo": "nginx", "tag": "1.24" }, "replicas": 1 });
        deep_merge(&mut base, &json!({ "image": { "tag": "1.25" }, "ports": [80] }));
        assert_eq!(
            base,
            json!({ "image": { "repo": "nginx", "tag": "1.25" }, "replicas": 1, "ports": [80] })
        );
    }

    #[test]
    fn deep_merge_replaces_non_objects() {
        let mut base = json!({ "ports": [80, 443] });
        deep_merge(&mut base, &json!({ "ports": [8080] }));
        assert_eq!(base, json!({ "ports": [8080] }));
    }

    #[test]
    fn digest_is_stable_across_key_order() {
        let a: Value = serde_json::from_str(r#"{"a":1,"b":2}"#).expect("a");
        let b: Value = serde_json::from_str(r#"{"b":2,"a":1}"#).expect("b");
        assert_eq!(values_digest(&a), values_digest(&b));
        assert_eq!(values_digest(&a).len(), 64);
    }

    #[test]
    fn diff_shows_changed_lines_only_when_different() {
        let values = json!({ "replicas": 2 });
        assert!(values_diff(&values, &values, "a").is_empty());

        let diff = values_diff(&json!({ "replicas": 1 }), &values, "a");
        assert!(diff.contains("-replicas: 1"), "got: {diff}");
        assert!(diff.contains("+replicas: 2"), "got: {diff}");
        assert!(diff.contains("a/desired"), "got: {diff}");
    }
}
