use crate::color::{observed_categories, Color, ColorScale, ColorSettings};
use crate::hazard::PreparedHazard;
use crate::legend::legend_value;
use crate::types::{Accident, Affected, GeoPoint, Household, LegendKind, LegendProperty};
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value as GeoValue};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegendEntry {
    pub label: String,
    pub color: Color,
}

/// Payload for the hazard layer: the choropleth collection plus its legend.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StyledHazard {
    pub id: String,
    pub name: String,
    pub description: String,
    pub legend_prop: Option<LegendProperty>,
    pub legend: Vec<LegendEntry>,
    pub geojson: FeatureCollection,
}

/// Copies the hazard collection and sets `fillColor` and `popup` on every
/// feature.
pub fn styled_hazard(hazard: &PreparedHazard) -> StyledHazard {
    let legend = hazard.legend.as_ref();
    let mut collection = hazard.layer.collection.clone();
    for feature in &mut collection.features {
        let color = hazard.scale.color_for_feature(feature, legend);
        let popup = match legend {
            Some(l) => format!("{}: {}", l.key, display_value(&legend_value(feature, Some(l)))),
            None => hazard.summary.name.clone(),
        };
        let props = feature.properties.get_or_insert_with(JsonObject::new);
        props.insert("fillColor".into(), Value::String(color.to_string()));
        props.insert("popup".into(), Value::String(popup));
    }

    StyledHazard {
        id: hazard.summary.id.clone(),
        name: hazard.summary.name.clone(),
        description: hazard.summary.description.clone(),
        legend_prop: hazard.legend.clone(),
        legend: legend_entries(hazard),
        geojson: collection,
    }
}

/// Legend rows: min and max for numeric scales, one row per category in
/// first-seen order otherwise.
pub fn legend_entries(hazard: &PreparedHazard) -> Vec<LegendEntry> {
    let Some(legend) = hazard.legend.as_ref() else {
        return Vec::new();
    };
    match (&hazard.scale, legend.kind) {
        (ColorScale::Linear { min, max, .. }, LegendKind::Numeric) => [*min, *max]
            .into_iter()
            .map(|v| LegendEntry {
                label: format_number(v),
                color: hazard.scale.color_for(&json!(v)),
            })
            .collect(),
        (ColorScale::Constant(color), _) => vec![LegendEntry {
            label: legend.key.clone(),
            color: color.clone(),
        }],
        (_, LegendKind::Categorical) => {
            let mut labels = observed_categories(hazard.layer.features(), &legend.key);
            if let Some(ColorSettings::Categories(map)) = &hazard.color_settings {
                for key in map.keys() {
                    if !labels.contains(key) {
                        labels.push(key.clone());
                    }
                }
            }
            labels
                .into_iter()
                .map(|label| LegendEntry {
                    color: hazard.scale.color_for(&Value::String(label.clone())),
                    label,
                })
                .collect()
        }
        _ => Vec::new(),
    }
}

fn point_feature(point: GeoPoint, properties: Value) -> Feature {
    let (lng, lat) = point.to_lng_lat();
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(GeoValue::Point(vec![lng, lat]))),
        id: None,
        properties: properties.as_object().cloned(),
        foreign_members: None,
    }
}

/// Household markers. Affected households carry `hazardValue`; households
/// without a usable location are left off the map.
pub fn household_layer(households: &[Household], affected: &[Affected<Household>]) -> FeatureCollection {
    let values: HashMap<&str, &Value> = affected
        .iter()
        .map(|a| (a.record.id.as_str(), &a.hazard_value))
        .collect();

    let features = households
        .iter()
        .filter_map(|h| {
            let point = h.location?;
            let hazard_value = values.get(h.id.as_str()).map(|v| (*v).clone());
            let popup = format!(
                "{}<br>{} · {} member(s){}",
                h.name,
                h.barangay,
                h.members.len(),
                hazard_value
                    .as_ref()
                    .map(|v| format!("<br>Hazard: {}", display_value(v)))
                    .unwrap_or_default()
            );
            Some(point_feature(
                point,
                json!({
                    "id": h.id,
                    "name": h.name,
                    "barangay": h.barangay,
                    "contact": h.contact,
                    "members": h.members.len(),
                    "affected": hazard_value.is_some(),
                    "hazardValue": hazard_value,
                    "popup": popup,
                }),
            ))
        })
        .collect();

    collection(features)
}

pub fn accident_layer(accidents: &[Accident]) -> FeatureCollection {
    let features = accidents
        .iter()
        .filter_map(|a| {
            let point = a.location?;
            Some(point_feature(
                point,
                json!({
                    "id": a.id,
                    "date": a.date,
                    "type": a.kind,
                    "description": a.description,
                    "barangay": a.barangay,
                    "popup": format!("{} ({})<br>{}", a.kind, a.date, a.description),
                }),
            ))
        })
        .collect();
    collection(features)
}

fn collection(features: Vec<Feature>) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::{find_affected, MatchPolicy};
    use crate::normalize::DEFAULT_MAX_BYTES;
    use crate::store::HazardRecord;
    use crate::types::Member;

    fn hazard(geojson: &str) -> PreparedHazard {
        let record = HazardRecord {
            id: "flood".into(),
            name: "Flood".into(),
            description: "100-year flood".into(),
            geojson: geojson.into(),
            legend_prop: None,
            color_settings: None,
        };
        PreparedHazard::prepare(&record, DEFAULT_MAX_BYTES).unwrap()
    }

    const DEPTHS: &str = r#"{"type":"FeatureCollection","features":[
        {"type":"Feature","properties":{"depth":0},
         "geometry":{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,1],[0,0]]]}},
        {"type":"Feature","properties":{"depth":4},
         "geometry":{"type":"Polygon","coordinates":[[[1,0],[2,0],[2,1],[1,1],[1,0]]]}}]}"#;

    #[test]
    fn features_get_fill_colour_and_popup() {
        let styled = styled_hazard(&hazard(DEPTHS));
        let props = styled.geojson.features[0].properties.as_ref().unwrap();
        assert_eq!(props["fillColor"], "rgb(0,255,0)");
        assert_eq!(props["popup"], "depth: 0");
        let props = styled.geojson.features[1].properties.as_ref().unwrap();
        assert_eq!(props["fillColor"], "rgb(255,0,0)");
        assert_eq!(styled.legend.len(), 2);
        assert_eq!(styled.legend[1].label, "4");
    }

    #[test]
    fn categorical_legend_lists_values_in_order() {
        let styled = styled_hazard(&hazard(
            r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{"s":"Low"},"geometry":null},
            {"type":"Feature","properties":{"s":"High"},"geometry":null}]}"#,
        ));
        let labels: Vec<&str> = styled.legend.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["Low", "High"]);
    }

    #[test]
    fn household_markers_flag_affected() {
        let prepared = hazard(DEPTHS);
        let households = vec![
            Household {
                id: "a".into(),
                location: Some(GeoPoint::new(0.5, 1.5)),
                name: "Ana".into(),
                barangay: "Tumana".into(),
                contact: String::new(),
                members: vec![Member::default()],
            },
            Household {
                id: "b".into(),
                location: Some(GeoPoint::new(5.0, 5.0)),
                name: "Ben".into(),
                barangay: "Tumana".into(),
                contact: String::new(),
                members: Vec::new(),
            },
            Household {
                id: "c".into(),
                location: None,
                name: "Cy".into(),
                barangay: "Tumana".into(),
                contact: String::new(),
                members: Vec::new(),
            },
        ];
        let affected = find_affected(&households, &prepared.layer, prepared.legend.as_ref(), MatchPolicy::First);
        let layer = household_layer(&households, &affected);
        assert_eq!(layer.features.len(), 2);
        let first = layer.features[0].properties.as_ref().unwrap();
        assert_eq!(first["affected"], true);
        assert_eq!(first["hazardValue"], 4);
        let second = layer.features[1].properties.as_ref().unwrap();
        assert_eq!(second["affected"], false);
    }
}
