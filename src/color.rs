use crate::legend::category_key;
use crate::types::{LegendKind, LegendProperty};
use geojson::Feature;
use image::Rgba;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

pub const DEFAULT_COLOR: &str = "#3388ff";
pub const DEFAULT_MIN_COLOR: &str = "#00ff00";
pub const DEFAULT_MAX_COLOR: &str = "#ff0000";

/// Colours handed out to categorical values in first-seen order.
pub const CATEGORY_PALETTE: [&str; 6] = [
    "#e41a1c", "#377eb8", "#4daf4a", "#984ea3", "#ff7f00", "#a65628",
];

/// Stored colour settings of a hazard layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColorSettings {
    Range { min: String, max: String },
    Categories(BTreeMap<String, String>),
}

impl ColorSettings {
    /// Settings used when a hazard record has none stored.
    pub fn default_for(features: &[Feature], legend: &LegendProperty) -> Self {
        match legend.kind {
            LegendKind::Numeric => ColorSettings::Range {
                min: DEFAULT_MIN_COLOR.to_string(),
                max: DEFAULT_MAX_COLOR.to_string(),
            },
            LegendKind::Categorical => {
                let categories = observed_categories(features, &legend.key)
                    .into_iter()
                    .zip(CATEGORY_PALETTE.iter().cycle())
                    .map(|(value, color)| (value, (*color).to_string()))
                    .collect();
                ColorSettings::Categories(categories)
            }
        }
    }
}

/// Distinct categorical values of `key`, in the order they first appear.
pub fn observed_categories(features: &[Feature], key: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for value in features.iter().filter_map(|f| f.property(key)).filter_map(category_key) {
        if !seen.contains(&value) {
            seen.push(value);
        }
    }
    seen
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    /// Parses `#rrggbb`.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.strip_prefix('#')?;
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        Some(Rgb(channel(0)?, channel(2)?, channel(4)?))
    }

    pub fn to_rgba(self, alpha: u8) -> Rgba<u8> {
        Rgba([self.0, self.1, self.2, alpha])
    }
}

/// A colour as emitted to the map: either a stored hex string or an
/// interpolated `rgb(r,g,b)` triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Color {
    Hex(String),
    Rgb(Rgb),
}

impl Color {
    pub fn default_blue() -> Self {
        Color::Hex(DEFAULT_COLOR.to_string())
    }

    pub fn rgb(&self) -> Option<Rgb> {
        match self {
            Color::Hex(hex) => Rgb::from_hex(hex),
            Color::Rgb(rgb) => Some(*rgb),
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::Hex(hex) => f.write_str(hex),
            Color::Rgb(Rgb(r, g, b)) => write!(f, "rgb({r},{g},{b})"),
        }
    }
}

impl Serialize for Color {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Colouring function for a hazard layer. Total over every JSON value;
/// anything outside the domain seen at construction gets the default blue.
#[derive(Debug, Clone, PartialEq)]
pub enum ColorScale {
    Constant(Color),
    Linear {
        min: f64,
        max: f64,
        from: Rgb,
        to: Rgb,
    },
    Categorical(BTreeMap<String, String>),
}

impl ColorScale {
    pub fn build(
        features: &[Feature],
        legend: Option<&LegendProperty>,
        settings: Option<&ColorSettings>,
    ) -> Self {
        let Some(legend) = legend else {
            return ColorScale::Constant(Color::default_blue());
        };
        let defaults;
        let settings = match settings {
            Some(s) => s,
            None => {
                defaults = ColorSettings::default_for(features, legend);
                &defaults
            }
        };

        match legend.kind {
            LegendKind::Numeric => Self::numeric(features, &legend.key, settings),
            LegendKind::Categorical => match settings {
                ColorSettings::Categories(map) if !map.is_empty() => {
                    ColorScale::Categorical(map.clone())
                }
                _ => ColorScale::Constant(Color::default_blue()),
            },
        }
    }

    fn numeric(features: &[Feature], key: &str, settings: &ColorSettings) -> Self {
        let values: Vec<f64> = features
            .iter()
            .filter_map(|f| f.property(key))
            .filter_map(Value::as_f64)
            .collect();
        if values.is_empty() {
            return ColorScale::Constant(Color::default_blue());
        }
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let (min_color, max_color) = match settings {
            ColorSettings::Range { min, max } => (min.as_str(), max.as_str()),
            ColorSettings::Categories(_) => (DEFAULT_MIN_COLOR, DEFAULT_MAX_COLOR),
        };

        if min == max {
            return ColorScale::Constant(Color::Hex(min_color.to_string()));
        }

        match (Rgb::from_hex(min_color), Rgb::from_hex(max_color)) {
            (Some(from), Some(to)) => ColorScale::Linear { min, max, from, to },
            _ => {
                warn!(min_color, max_color, "malformed colour range, using default colour");
                ColorScale::Constant(Color::default_blue())
            }
        }
    }

    pub fn color_for(&self, value: &Value) -> Color {
        match self {
            ColorScale::Constant(color) => color.clone(),
            ColorScale::Linear { min, max, from, to } => match value.as_f64() {
                Some(v) => Color::Rgb(interpolate(*from, *to, (v - min) / (max - min))),
                None => Color::default_blue(),
            },
            ColorScale::Categorical(map) => category_key(value)
                .and_then(|k| map.get(&k))
                .map(|hex| Color::Hex(hex.clone()))
                .unwrap_or_else(Color::default_blue),
        }
    }

    /// Colour of a feature's legend value, default blue when absent.
    pub fn color_for_feature(&self, feature: &Feature, legend: Option<&LegendProperty>) -> Color {
        match legend.and_then(|l| feature.property(&l.key)) {
            Some(value) => self.color_for(value),
            None => match self {
                ColorScale::Constant(color) => color.clone(),
                _ => Color::default_blue(),
            },
        }
    }
}

fn interpolate(from: Rgb, to: Rgb, ratio: f64) -> Rgb {
    let channel = |a: u8, b: u8| {
        let v = f64::from(a) + ratio * (f64::from(b) - f64::from(a));
        v.round().clamp(0.0, 255.0) as u8
    };
    Rgb(channel(from.0, to.0), channel(from.1, to.1), channel(from.2, to.2))
}
