//! Hazard selection pipeline: stored record → normalized layer → legend
//! property → colour scale.

use crate::color::{ColorScale, ColorSettings};
use crate::error::{CensusError, Result};
use crate::legend::detect_legend_property;
use crate::normalize::{normalize, HazardLayer};
use crate::store::{is_valid_id, HazardRecord, HazardSummary};
use crate::types::LegendProperty;
use serde::Deserialize;
use tracing::info;

/// A hazard ready for matching and rendering.
#[derive(Debug, Clone)]
pub struct PreparedHazard {
    pub summary: HazardSummary,
    pub layer: HazardLayer,
    pub legend: Option<LegendProperty>,
    pub color_settings: Option<ColorSettings>,
    pub scale: ColorScale,
}

impl PreparedHazard {
    pub fn prepare(record: &HazardRecord, max_bytes: usize) -> Result<Self> {
        let layer = normalize(&record.geojson, max_bytes)?;
        let legend = record
            .legend_prop
            .clone()
            .or_else(|| detect_legend_property(layer.features()));
        let color_settings = match (&record.color_settings, &legend) {
            (Some(settings), _) => Some(settings.clone()),
            (None, Some(legend)) => Some(ColorSettings::default_for(layer.features(), legend)),
            (None, None) => None,
        };
        let scale = ColorScale::build(layer.features(), legend.as_ref(), color_settings.as_ref());

        let mut summary = HazardSummary::from(record);
        summary.legend_prop = legend.clone();
        Ok(Self {
            summary,
            layer,
            legend,
            color_settings,
            scale,
        })
    }
}

/// Body of a hazard upload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HazardUpload {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub geojson: String,
    #[serde(default)]
    pub legend_prop: Option<LegendProperty>,
    #[serde(default)]
    pub color_settings: Option<ColorSettings>,
}

/// Validates an upload and builds the record to persist. The stored GeoJSON
/// is the normalized (WGS84) form; legend and colours are filled in when the
/// uploader left them out.
pub fn accept_upload(upload: HazardUpload, max_bytes: usize) -> Result<HazardRecord> {
    if !is_valid_id(&upload.id) {
        return Err(CensusError::structure(format!(
            "hazard id {:?} must be alphanumeric, '-' or '_'",
            upload.id
        )));
    }
    let layer = normalize(&upload.geojson, max_bytes)?;
    let legend_prop = upload
        .legend_prop
        .or_else(|| detect_legend_property(layer.features()));
    let color_settings = upload.color_settings.or_else(|| {
        legend_prop
            .as_ref()
            .map(|legend| ColorSettings::default_for(layer.features(), legend))
    });

    info!(
        hazard = %upload.id,
        features = layer.len(),
        legend = ?legend_prop,
        "accepted hazard upload"
    );

    Ok(HazardRecord {
        id: upload.id,
        name: upload.name,
        description: upload.description,
        geojson: serde_json::to_string(&layer.collection)?,
        legend_prop,
        color_settings,
    })
}
