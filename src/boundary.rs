//! Administrative boundary overlay (barangay or municipal outlines).

use crate::normalize::{normalize, HazardLayer};
use anyhow::{anyhow, Context, Result};
use geo::MultiPolygon;
use geojson::{Feature, FeatureCollection, Geometry, JsonObject};
use serde_json::Value;
use shapefile::dbase::FieldValue;
use shapefile::Reader;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

/// Loads a boundary file, either GeoJSON or an ESRI shapefile, into the same
/// normalized layer type used for hazards.
pub fn load_boundary(path: &Path, max_bytes: usize) -> Result<HazardLayer> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s: &str| s.to_lowercase())
        .ok_or_else(|| anyhow!("Boundary file has no extension"))?;

    let layer = match extension.as_str() {
        "shp" => load_shapefile(path)?,
        "json" | "geojson" => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to open GeoJSON file: {:?}", path))?;
            normalize(&text, max_bytes).with_context(|| format!("Invalid boundary {:?}", path))?
        }
        _ => return Err(anyhow!("Unsupported geometry format: {}", extension)),
    };

    info!(path = ?path, features = layer.len(), "loaded boundary layer");
    Ok(layer)
}

fn load_shapefile(path: &Path) -> Result<HazardLayer> {
    let mut reader = Reader::from_path(path)
        .with_context(|| format!("Failed to open Shapefile: {:?}", path))?;

    let mut features = Vec::new();
    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result?;

        let geometry: MultiPolygon<f64> = match shape {
            shapefile::Shape::Polygon(polygon) => polygon.into(),
            shapefile::Shape::PolygonM(polygon) => polygon.into(),
            shapefile::Shape::PolygonZ(polygon) => polygon.into(),
            _ => continue, // Skip non-polygon shapes
        };

        let properties: BTreeMap<String, Value> = record
            .into_iter()
            .map(|(name, value)| (name, field_to_json(value)))
            .collect();

        features.push(Feature {
            bbox: None,
            geometry: Some(Geometry::new(geojson::Value::from(&geometry))),
            id: None,
            properties: Some(properties.into_iter().collect::<JsonObject>()),
            foreign_members: None,
        });
    }

    Ok(HazardLayer::new(FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }))
}

fn field_to_json(value: FieldValue) -> Value {
    match value {
        FieldValue::Character(Some(s)) => Value::String(s.trim().to_string()),
        FieldValue::Memo(s) => Value::String(s),
        FieldValue::Numeric(Some(n)) | FieldValue::Double(n) | FieldValue::Currency(n) => {
            serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
        }
        FieldValue::Float(Some(n)) => {
            serde_json::Number::from_f64(f64::from(n)).map_or(Value::Null, Value::Number)
        }
        FieldValue::Integer(n) => Value::from(n),
        FieldValue::Logical(Some(b)) => Value::Bool(b),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_geojson_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("barangays.geojson");
        fs::write(
            &path,
            r#"{"type":"FeatureCollection","features":[{"type":"Feature",
            "properties":{"name":"Malanday"},
            "geometry":{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,0]]]}}]}"#,
        )
        .unwrap();
        let layer = load_boundary(&path, 1024 * 1024).unwrap();
        assert_eq!(layer.len(), 1);
    }

    #[test]
    fn rejects_unknown_extension() {
        assert!(load_boundary(Path::new("boundary.kml"), 1024).is_err());
    }

    #[test]
    fn dbase_values_become_json() {
        assert_eq!(field_to_json(FieldValue::Character(Some(" Tumana ".into()))), "Tumana");
        assert_eq!(field_to_json(FieldValue::Numeric(Some(2.5))), 2.5);
        assert_eq!(field_to_json(FieldValue::Character(None)), Value::Null);
    }

    #[test]
    fn loads_shapefile_boundary_with_attributes() {
        use shapefile::dbase::{FieldName, Record, TableWriterBuilder};
        use shapefile::{Point, Polygon, PolygonRing, Writer};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("barangays.shp");
        {
            let table = TableWriterBuilder::new()
                .add_character_field(FieldName::try_from("NAME").unwrap(), 50)
                .add_numeric_field(FieldName::try_from("POP").unwrap(), 10, 0);
            let mut writer = Writer::from_path(&path, table).unwrap();
            let polygon = Polygon::new(PolygonRing::Outer(vec![
                Point::new(121.00, 14.60),
                Point::new(121.00, 14.62),
                Point::new(121.02, 14.62),
                Point::new(121.02, 14.60),
                Point::new(121.00, 14.60),
            ]));
            let mut record = Record::default();
            record.insert("NAME".to_string(), FieldValue::Character(Some("Malanday".into())));
            record.insert("POP".to_string(), FieldValue::Numeric(Some(5120.0)));
            writer.write_shape_and_record(&polygon, &record).unwrap();
        }

        let layer = load_boundary(&path, 1024).unwrap();
        assert_eq!(layer.len(), 1);
        let properties = layer.features()[0].properties.as_ref().unwrap();
        assert_eq!(properties["NAME"], "Malanday");
        assert_eq!(properties["POP"], 5120.0);

        let shape = layer.shape(0).unwrap();
        assert!((shape.bbox.min().x - 121.00).abs() < 1e-9);
        assert!((shape.bbox.max().y - 14.62).abs() < 1e-9);
    }
}
