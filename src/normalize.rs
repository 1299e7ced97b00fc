//! Upload-path validation of hazard and boundary GeoJSON.
//!
//! Only the shape of the document is checked. Ring closure, winding order
//! and self-intersection are not validated; a malformed polygon simply
//! produces wrong containment results later on.

use crate::error::{CensusError, Result};
use crate::reproject;
use crate::types::HazardShape;
use geo::{BoundingRect, MultiPolygon};
use geojson::{Feature, FeatureCollection, GeoJson, JsonObject};
use tracing::{debug, info};

/// Default upload limit, 10 MiB.
pub const DEFAULT_MAX_BYTES: usize = 10 * 1024 * 1024;

/// A validated hazard (or boundary) collection in WGS84 together with the
/// polygon shapes used for containment tests.
#[derive(Debug, Clone)]
pub struct HazardLayer {
    pub collection: FeatureCollection,
    shapes: Vec<Option<HazardShape>>,
}

impl HazardLayer {
    pub fn new(collection: FeatureCollection) -> Self {
        let shapes = collection.features.iter().map(feature_shape).collect();
        Self { collection, shapes }
    }

    pub fn features(&self) -> &[Feature] {
        &self.collection.features
    }

    pub fn len(&self) -> usize {
        self.collection.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collection.features.is_empty()
    }

    /// Polygon shape of feature `index`, `None` for non-polygonal features.
    pub fn shape(&self, index: usize) -> Option<&HazardShape> {
        self.shapes.get(index).and_then(Option::as_ref)
    }

    pub fn shapes(&self) -> impl Iterator<Item = (usize, &HazardShape)> {
        self.shapes
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (i, s)))
    }
}

/// Validates raw upload text and turns it into a [`HazardLayer`].
pub fn normalize(text: &str, max_bytes: usize) -> Result<HazardLayer> {
    if text.len() > max_bytes {
        return Err(CensusError::SizeLimit {
            size: text.len(),
            limit: max_bytes,
        });
    }

    let value: serde_json::Value = serde_json::from_str(text)?;
    validate_structure(&value)?;

    let geojson = GeoJson::from_json_value(value)
        .map_err(|e| CensusError::structure(e.to_string()))?;

    let mut collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        GeoJson::Feature(mut feature) => {
            let foreign_members = feature
                .foreign_members
                .as_mut()
                .and_then(|m| m.remove("crs"))
                .map(|crs| {
                    let mut members = JsonObject::new();
                    members.insert("crs".to_string(), crs);
                    members
                });
            FeatureCollection {
                bbox: None,
                features: vec![feature],
                foreign_members,
            }
        }
        GeoJson::Geometry(_) => {
            return Err(CensusError::structure("expected Feature or FeatureCollection"))
        }
    };

    let crs = reproject::to_wgs84(&mut collection)?;
    debug!(?crs, "source coordinate reference system");

    let layer = HazardLayer::new(collection);
    info!(
        features = layer.len(),
        polygons = layer.shapes().count(),
        "normalized GeoJSON layer"
    );
    Ok(layer)
}

/// Shallow check of the top-level `type` and `features` members.
pub fn validate_structure(value: &serde_json::Value) -> Result<()> {
    match value.get("type").and_then(serde_json::Value::as_str) {
        Some("Feature") => Ok(()),
        Some("FeatureCollection") => match value.get("features") {
            Some(serde_json::Value::Array(_)) => Ok(()),
            Some(_) => Err(CensusError::structure("`features` must be an array")),
            None => Err(CensusError::structure("FeatureCollection without `features`")),
        },
        Some(other) => Err(CensusError::structure(format!(
            "expected Feature or FeatureCollection, found {other}"
        ))),
        None => Err(CensusError::structure("missing `type` member")),
    }
}

fn feature_shape(feature: &Feature) -> Option<HazardShape> {
    let geometry = feature.geometry.as_ref()?;
    let geometry: geo::Geometry<f64> = geometry.value.clone().try_into().ok()?;
    let geometry = match geometry {
        geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
        geo::Geometry::MultiPolygon(mp) => mp,
        geo::Geometry::GeometryCollection(gc) => {
            let polygons: Vec<_> = gc
                .into_iter()
                .flat_map(|g| match g {
                    geo::Geometry::Polygon(p) => vec![p],
                    geo::Geometry::MultiPolygon(mp) => mp.0,
                    _ => Vec::new(),
                })
                .collect();
            if polygons.is_empty() {
                return None;
            }
            MultiPolygon::new(polygons)
        }
        _ => return None,
    };
    let bbox = geometry.bounding_rect()?;
    Some(HazardShape { geometry, bbox })
}
