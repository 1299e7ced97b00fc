use geo::{MultiPolygon, Point, Rect};
use serde::{Deserialize, Deserializer, Serialize};

/// A geographic position as stored by survey intake (latitude first).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Parses stored coordinate values. Both must be finite numbers, given
    /// either as JSON numbers or numeric strings.
    pub fn from_values(lat: &serde_json::Value, lng: &serde_json::Value) -> Option<Self> {
        Some(Self::new(parse_coordinate(lat)?, parse_coordinate(lng)?))
    }

    /// The only place latitude/longitude are swapped into x/y order.
    pub fn to_lng_lat(self) -> (f64, f64) {
        (self.lng, self.lat)
    }

    pub fn to_point(self) -> Point<f64> {
        Point::from(self.to_lng_lat())
    }
}

fn parse_coordinate(value: &serde_json::Value) -> Option<f64> {
    let v = match value {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    v.is_finite().then_some(v)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegendKind {
    Numeric,
    Categorical,
}

/// The attribute that drives choropleth colouring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegendProperty {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: LegendKind,
}

/// Survey answers arrive as strings, numbers or nulls depending on the
/// form version; all of them are kept as text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Member {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub sex: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub age: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub disability: String,
}

/// Accepts any JSON scalar as text. `null` becomes the empty string.
pub fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Household {
    pub id: String,
    pub location: Option<GeoPoint>,
    pub name: String,
    pub barangay: String,
    pub contact: String,
    pub members: Vec<Member>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Accident {
    pub id: String,
    pub location: Option<GeoPoint>,
    pub date: String,
    pub kind: String,
    pub description: String,
    pub barangay: String,
}

/// Anything that can be placed on the map and tested against hazard polygons.
pub trait Located {
    fn location(&self) -> Option<GeoPoint>;
}

impl Located for Household {
    fn location(&self) -> Option<GeoPoint> {
        self.location
    }
}

impl Located for Accident {
    fn location(&self) -> Option<GeoPoint> {
        self.location
    }
}

/// One hazard feature containing a record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HazardMatch {
    pub feature_index: usize,
    pub hazard_value: serde_json::Value,
}

/// A record that falls inside a hazard polygon, with that polygon's legend value.
///
/// Each record appears at most once. When every containing feature is
/// reported, the first one fills `feature_index`/`hazard_value` and the rest
/// go to `overlaps` in collection order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Affected<T> {
    #[serde(flatten)]
    pub record: T,
    pub feature_index: usize,
    pub hazard_value: serde_json::Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub overlaps: Vec<HazardMatch>,
}

pub type AffectedHousehold = Affected<Household>;

/// Polygon shape of one hazard feature.
#[derive(Debug, Clone)]
pub struct HazardShape {
    pub geometry: MultiPolygon<f64>,
    pub bbox: Rect<f64>,
}
