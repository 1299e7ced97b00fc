//! Normalization of uploaded coordinates to WGS84 longitude/latitude.

use crate::error::{CensusError, Result};
use geojson::{FeatureCollection, Geometry, Value};
use std::f64::consts::PI;

const EARTH_RADIUS_M: f64 = 6_378_137.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceCrs {
    Wgs84,
    WebMercator,
}

/// Reads the legacy `crs` member if present, otherwise guesses from the
/// coordinate range. Named systems other than WGS84 and Web Mercator are
/// rejected.
pub fn detect_crs(collection: &FeatureCollection) -> Result<SourceCrs> {
    let named = collection
        .foreign_members
        .as_ref()
        .and_then(|m| m.get("crs"))
        .and_then(|crs| crs.pointer("/properties/name"))
        .and_then(serde_json::Value::as_str);

    if let Some(name) = named {
        return named_crs(name)
            .ok_or_else(|| CensusError::structure(format!("unsupported CRS {name}")));
    }

    let out_of_range = collection
        .features
        .iter()
        .filter_map(|f| f.geometry.as_ref())
        .any(|g| {
            any_position(&g.value, &|p: &[f64]| {
                p.len() >= 2 && (p[0].abs() > 180.0 || p[1].abs() > 90.0)
            })
        });

    Ok(if out_of_range {
        SourceCrs::WebMercator
    } else {
        SourceCrs::Wgs84
    })
}

/// Maps names such as `EPSG:3857`, `urn:ogc:def:crs:EPSG::4326` or
/// `http://www.opengis.net/def/crs/EPSG/0/3857` to a known system.
fn named_crs(name: &str) -> Option<SourceCrs> {
    let name = name.trim().to_ascii_uppercase();
    if name == "CRS:84" {
        return Some(SourceCrs::Wgs84);
    }
    let code = name.rsplit(|c| c == ':' || c == '/').next().unwrap_or_default();
    match code {
        "4326" | "CRS84" => Some(SourceCrs::Wgs84),
        "3857" | "900913" | "102100" | "102113" | "3785" => Some(SourceCrs::WebMercator),
        _ => None,
    }
}

/// Rewrites every position to WGS84 and drops the `crs` member.
pub fn to_wgs84(collection: &mut FeatureCollection) -> Result<SourceCrs> {
    let crs = detect_crs(collection)?;
    if crs == SourceCrs::WebMercator {
        for feature in &mut collection.features {
            if let Some(geometry) = feature.geometry.as_mut() {
                map_geometry(geometry, &mercator_to_lng_lat);
            }
        }
        collection.bbox = None;
    }
    if let Some(members) = collection.foreign_members.as_mut() {
        members.remove("crs");
    }
    Ok(crs)
}

/// Inverse spherical Web Mercator.
pub fn mercator_to_lng_lat(x: f64, y: f64) -> (f64, f64) {
    let lng = (x / EARTH_RADIUS_M).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS_M).exp().atan() - PI / 2.0).to_degrees();
    (lng, lat)
}

fn map_geometry(geometry: &mut Geometry, f: &dyn Fn(f64, f64) -> (f64, f64)) {
    geometry.bbox = None;
    map_value(&mut geometry.value, f);
}

fn map_value(value: &mut Value, f: &dyn Fn(f64, f64) -> (f64, f64)) {
    let apply = |p: &mut Vec<f64>| {
        if p.len() >= 2 {
            let (x, y) = f(p[0], p[1]);
            p[0] = x;
            p[1] = y;
        }
    };
    match value {
        Value::Point(p) => apply(p),
        Value::MultiPoint(ps) | Value::LineString(ps) => ps.iter_mut().for_each(apply),
        Value::MultiLineString(lines) | Value::Polygon(lines) => {
            lines.iter_mut().flatten().for_each(apply)
        }
        Value::MultiPolygon(polys) => polys.iter_mut().flatten().flatten().for_each(apply),
        Value::GeometryCollection(geoms) => geoms.iter_mut().for_each(|g| map_geometry(g, f)),
    }
}

fn any_position(value: &Value, test: &dyn Fn(&[f64]) -> bool) -> bool {
    match value {
        Value::Point(p) => test(p.as_slice()),
        Value::MultiPoint(ps) | Value::LineString(ps) => ps.iter().any(|p| test(p.as_slice())),
        Value::MultiLineString(lines) | Value::Polygon(lines) => {
            lines.iter().flatten().any(|p| test(p.as_slice()))
        }
        Value::MultiPolygon(polys) => polys.iter().flatten().flatten().any(|p| test(p.as_slice())),
        Value::GeometryCollection(geoms) => geoms.iter().any(|g| any_position(&g.value, test)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collection(json: &str) -> FeatureCollection {
        match json.parse::<geojson::GeoJson>().unwrap() {
            geojson::GeoJson::FeatureCollection(fc) => fc,
            other => panic!("not a collection: {other}"),
        }
    }

    #[test]
    fn mercator_origin_is_null_island() {
        let (lng, lat) = mercator_to_lng_lat(0.0, 0.0);
        assert!(lng.abs() < 1e-9);
        assert!(lat.abs() < 1e-9);
    }

    #[test]
    fn mercator_known_point() {
        // Manila, approximately 120.98E 14.60N
        let (lng, lat) = mercator_to_lng_lat(13_467_412.0, 1_643_046.0);
        assert!((lng - 120.98).abs() < 0.01, "{lng}");
        assert!((lat - 14.60).abs() < 0.01, "{lat}");
    }

    #[test]
    fn detects_mercator_by_range() {
        let mut fc = collection(
            r#"{"type":"FeatureCollection","features":[{"type":"Feature","properties":{},
            "geometry":{"type":"Point","coordinates":[13467412.0,1643046.0]}}]}"#,
        );
        assert_eq!(to_wgs84(&mut fc).unwrap(), SourceCrs::WebMercator);
        let geometry = fc.features[0].geometry.as_ref().unwrap();
        match &geometry.value {
            Value::Point(p) => assert!(p[0] < 180.0 && p[1] < 90.0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn named_crs_wins_and_is_removed() {
        let mut fc = collection(
            r#"{"type":"FeatureCollection",
            "crs":{"type":"name","properties":{"name":"urn:ogc:def:crs:OGC:1.3:CRS84"}},
            "features":[]}"#,
        );
        assert_eq!(to_wgs84(&mut fc).unwrap(), SourceCrs::Wgs84);
        assert!(fc.foreign_members.map_or(true, |m| !m.contains_key("crs")));
    }

    #[test]
    fn recognizes_crs_name_forms() {
        assert_eq!(named_crs("EPSG:3857"), Some(SourceCrs::WebMercator));
        assert_eq!(named_crs("urn:ogc:def:crs:EPSG::3857"), Some(SourceCrs::WebMercator));
        assert_eq!(
            named_crs("http://www.opengis.net/def/crs/EPSG/0/4326"),
            Some(SourceCrs::Wgs84)
        );
        assert_eq!(named_crs("CRS:84"), Some(SourceCrs::Wgs84));
        assert_eq!(named_crs("urn:ogc:def:crs:EPSG::38570"), None);
    }

    #[test]
    fn projected_utm_collection_is_rejected() {
        // UTM zone 51N square around 121.0E 14.6N, in metres.
        let mut fc = collection(
            r#"{"type":"FeatureCollection",
            "crs":{"type":"name","properties":{"name":"urn:ogc:def:crs:EPSG::32651"}},
            "features":[{"type":"Feature","properties":{},
            "geometry":{"type":"Polygon","coordinates":[[[280000,1610000],[290000,1610000],
            [290000,1620000],[280000,1620000],[280000,1610000]]]}}]}"#,
        );
        let err = to_wgs84(&mut fc).unwrap_err();
        assert_eq!(err.kind(), "structure_error");
        assert!(err.to_string().contains("32651"), "{err}");
    }
}
