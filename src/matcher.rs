use crate::legend::legend_value;
use crate::normalize::HazardLayer;
use crate::types::{Affected, GeoPoint, HazardMatch, LegendProperty, Located};
use geo::Intersects;
use rayon::prelude::*;
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What to report when a point lies inside several overlapping polygons.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    /// Only the first containing feature in collection order.
    #[default]
    First,
    /// Every containing feature, in collection order.
    All,
}

// Wrapper for RTree indexing
struct FeatureBox {
    index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for FeatureBox {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

/// Bounding-box index over the polygon features of one hazard layer.
pub struct HazardIndex<'a> {
    layer: &'a HazardLayer,
    tree: RTree<FeatureBox>,
}

impl<'a> HazardIndex<'a> {
    pub fn new(layer: &'a HazardLayer) -> Self {
        let items: Vec<FeatureBox> = layer
            .shapes()
            .map(|(index, shape)| FeatureBox {
                index,
                aabb: AABB::from_corners(
                    [shape.bbox.min().x, shape.bbox.min().y],
                    [shape.bbox.max().x, shape.bbox.max().y],
                ),
            })
            .collect();
        debug!(polygons = items.len(), "building hazard index");
        Self {
            layer,
            tree: RTree::bulk_load(items),
        }
    }

    pub fn layer(&self) -> &HazardLayer {
        self.layer
    }

    /// Indices of all features containing `point`, in collection order.
    /// Points on a polygon boundary count as inside.
    pub fn containing(&self, point: GeoPoint) -> Vec<usize> {
        let (x, y) = point.to_lng_lat();
        let geo_point = point.to_point();
        let mut hits: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&AABB::from_point([x, y]))
            .map(|candidate| candidate.index)
            .filter(|&i| {
                self.layer
                    .shape(i)
                    .is_some_and(|shape| shape.geometry.intersects(&geo_point))
            })
            .collect();
        hits.sort_unstable();
        hits
    }

    /// First feature in collection order that contains `point`.
    pub fn first_containing(&self, point: GeoPoint) -> Option<usize> {
        self.containing(point).into_iter().next()
    }
}

/// Matches located records against a hazard layer. Records without a
/// numeric location are never affected. Each affected record is reported
/// once, output follows input order and is recomputed from scratch on every
/// call.
pub fn find_affected<T>(
    records: &[T],
    layer: &HazardLayer,
    legend: Option<&LegendProperty>,
    policy: MatchPolicy,
) -> Vec<Affected<T>>
where
    T: Located + Clone + Send + Sync,
{
    let index = HazardIndex::new(layer);

    let affected: Vec<Affected<T>> = records
        .par_iter()
        .filter_map(|record| {
            let point = record.location()?;
            let hits: Vec<usize> = match policy {
                MatchPolicy::First => index.first_containing(point).into_iter().collect(),
                MatchPolicy::All => index.containing(point),
            };
            let mut matches = hits.into_iter().map(|feature_index| HazardMatch {
                feature_index,
                hazard_value: legend_value(&layer.features()[feature_index], legend),
            });
            let first = matches.next()?;
            Some(Affected {
                record: record.clone(),
                feature_index: first.feature_index,
                hazard_value: first.hazard_value,
                overlaps: matches.collect(),
            })
        })
        .collect();

    debug!(
        records = records.len(),
        affected = affected.len(),
        ?policy,
        "matched records against hazard layer"
    );
    affected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{normalize, DEFAULT_MAX_BYTES};
    use crate::types::{Household, LegendKind};
    use serde_json::json;

    const LAYER: &str = r#"{"type":"FeatureCollection","features":[
        {"type":"Feature","properties":{"susc":"High"},
         "geometry":{"type":"Polygon","coordinates":[[[0,0],[2,0],[2,2],[0,2],[0,0]]]}},
        {"type":"Feature","properties":{"susc":"Low"},
         "geometry":{"type":"MultiPolygon","coordinates":[
            [[[1,1],[3,1],[3,3],[1,3],[1,1]]],
            [[[10,10],[11,10],[11,11],[10,11],[10,10]]]]}},
        {"type":"Feature","properties":{},
         "geometry":{"type":"Polygon","coordinates":[[[20,20],[21,20],[21,21],[20,21],[20,20]]]}}]}"#;

    fn household(id: &str, lat: serde_json::Value, lng: serde_json::Value) -> Household {
        Household {
            id: id.to_string(),
            location: GeoPoint::from_values(&lat, &lng),
            name: format!("Household {id}"),
            barangay: "Poblacion".into(),
            contact: String::new(),
            members: Vec::new(),
        }
    }

    fn legend() -> LegendProperty {
        LegendProperty {
            key: "susc".into(),
            kind: LegendKind::Categorical,
        }
    }

    #[test]
    fn inside_outside_and_invalid() {
        let layer = normalize(LAYER, DEFAULT_MAX_BYTES).unwrap();
        let households = vec![
            household("in", json!("0.5"), json!("0.5")),
            household("out", json!("50"), json!("50")),
            household("bad", json!("abc"), json!("0.5")),
            household("multi", json!(10.5), json!(10.5)),
        ];
        let affected = find_affected(&households, &layer, Some(&legend()), MatchPolicy::First);
        let ids: Vec<&str> = affected.iter().map(|a| a.record.id.as_str()).collect();
        assert_eq!(ids, vec!["in", "multi"]);
        assert_eq!(affected[0].hazard_value, json!("High"));
        assert_eq!(affected[1].hazard_value, json!("Low"));
        assert_eq!(affected[1].feature_index, 1);
    }

    #[test]
    fn coordinates_are_not_swapped() {
        // lat 0.5 lng 15 lies outside every polygon; swapped it would not.
        let layer = normalize(
            r#"{"type":"FeatureCollection","features":[{"type":"Feature","properties":{},
            "geometry":{"type":"Polygon","coordinates":[[[0,10],[1,10],[1,20],[0,20],[0,10]]]}}]}"#,
            DEFAULT_MAX_BYTES,
        )
        .unwrap();
        let index = HazardIndex::new(&layer);
        assert_eq!(index.first_containing(GeoPoint::new(0.5, 15.0)), None);
        assert_eq!(index.first_containing(GeoPoint::new(15.0, 0.5)), Some(0));
    }

    #[test]
    fn overlap_reports_first_only_by_default() {
        let layer = normalize(LAYER, DEFAULT_MAX_BYTES).unwrap();
        let households = vec![household("overlap", json!(1.5), json!(1.5))];

        let first = find_affected(&households, &layer, Some(&legend()), MatchPolicy::First);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].hazard_value, json!("High"));

        assert!(first[0].overlaps.is_empty());

        let all = find_affected(&households, &layer, Some(&legend()), MatchPolicy::All);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].hazard_value, json!("High"));
        assert_eq!(
            all[0].overlaps,
            vec![HazardMatch {
                feature_index: 1,
                hazard_value: json!("Low"),
            }]
        );
    }

    #[test]
    fn missing_legend_value_is_not_available() {
        let layer = normalize(LAYER, DEFAULT_MAX_BYTES).unwrap();
        let households = vec![household("edge", json!(20.5), json!(20.5))];
        let affected = find_affected(&households, &layer, Some(&legend()), MatchPolicy::First);
        assert_eq!(affected[0].hazard_value, json!("N/A"));
    }
}
