use crate::types::{LegendKind, LegendProperty};
use geojson::Feature;
use serde_json::Value;

/// Property keys in first-seen order: the first feature's keys as written,
/// then any keys introduced by later features.
pub fn candidate_keys(features: &[Feature]) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for props in features.iter().filter_map(|f| f.properties.as_ref()) {
        for key in props.keys() {
            if !keys.iter().any(|k| k == key) {
                keys.push(key.clone());
            }
        }
    }
    keys
}

/// Picks the attribute used to colour a hazard layer.
///
/// The first key that is a number on every feature wins; failing that, the
/// first key that is a string or boolean on every feature. A key missing on
/// any feature never qualifies.
pub fn detect_legend_property(features: &[Feature]) -> Option<LegendProperty> {
    if features.is_empty() {
        return None;
    }
    let keys = candidate_keys(features);

    let all = |key: &str, test: fn(&Value) -> bool| {
        features.iter().all(|f| f.property(key).is_some_and(test))
    };

    if let Some(key) = keys.iter().find(|k| all(k.as_str(), Value::is_number)) {
        return Some(LegendProperty {
            key: key.clone(),
            kind: LegendKind::Numeric,
        });
    }

    keys.iter()
        .find(|k| all(k.as_str(), |v| v.is_string() || v.is_boolean()))
        .map(|key| LegendProperty {
            key: key.clone(),
            kind: LegendKind::Categorical,
        })
}

/// Value of the legend property on one feature, `"N/A"` when absent.
pub fn legend_value(feature: &Feature, legend: Option<&LegendProperty>) -> Value {
    legend
        .and_then(|l| feature.property(&l.key))
        .cloned()
        .unwrap_or_else(|| Value::String("N/A".to_string()))
}

/// String form used as a categorical lookup key.
pub fn category_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
