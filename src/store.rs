//! File-backed document store holding hazard records, the household export
//! and accident records.
//!
//! Layout under the store root:
//! `hazards/{id}.json`, `households.json`, `accidents.json`.

use crate::color::ColorSettings;
use crate::error::{CensusError, Result};
use crate::households::{parse_accidents, parse_households};
use crate::types::{Accident, Household, LegendProperty};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Persisted hazard layer as saved by the upload form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HazardRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Serialized GeoJSON text.
    pub geojson: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legend_prop: Option<LegendProperty>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_settings: Option<ColorSettings>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HazardSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub legend_prop: Option<LegendProperty>,
}

impl From<&HazardRecord> for HazardSummary {
    fn from(record: &HazardRecord) -> Self {
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            description: record.description.clone(),
            legend_prop: record.legend_prop.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn hazard_dir(&self) -> PathBuf {
        self.root.join("hazards")
    }

    fn hazard_path(&self, id: &str) -> Result<PathBuf> {
        if !is_valid_id(id) {
            return Err(CensusError::NotFound(format!("hazard {id:?}")));
        }
        Ok(self.hazard_dir().join(format!("{id}.json")))
    }

    pub async fn list_hazards(&self) -> Result<Vec<HazardSummary>> {
        let dir = self.hazard_dir();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(store_error(&dir, e)),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| store_error(&dir, e))? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let record: HazardRecord = read_json(&path).await?;
            summaries.push(HazardSummary::from(&record));
        }
        summaries.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(summaries)
    }

    pub async fn load_hazard(&self, id: &str) -> Result<HazardRecord> {
        let path = self.hazard_path(id)?;
        match fs::try_exists(&path).await {
            Ok(true) => read_json(&path).await,
            Ok(false) => Err(CensusError::NotFound(format!("hazard {id:?}"))),
            Err(e) => Err(store_error(&path, e)),
        }
    }

    pub async fn save_hazard(&self, record: &HazardRecord) -> Result<()> {
        let path = self.hazard_path(&record.id)?;
        let dir = self.hazard_dir();
        fs::create_dir_all(&dir).await.map_err(|e| store_error(&dir, e))?;
        let body = serde_json::to_vec_pretty(record).map_err(|e| decode_error(&path, e))?;
        fs::write(&path, body).await.map_err(|e| store_error(&path, e))?;
        info!(hazard = %record.id, path = ?path, "saved hazard record");
        Ok(())
    }

    pub async fn load_households(&self) -> Result<Vec<Household>> {
        let path = self.root.join("households.json");
        let Some(text) = read_optional(&path).await? else {
            return Ok(Vec::new());
        };
        let households = parse_households(&text).map_err(|e| decode_error(&path, e))?;
        debug!(count = households.len(), "loaded households");
        Ok(households)
    }

    pub async fn load_accidents(&self) -> Result<Vec<Accident>> {
        let path = self.root.join("accidents.json");
        let Some(text) = read_optional(&path).await? else {
            return Ok(Vec::new());
        };
        let accidents = parse_accidents(&text).map_err(|e| decode_error(&path, e))?;
        debug!(count = accidents.len(), "loaded accidents");
        Ok(accidents)
    }
}

/// Hazard ids become file names.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn store_error(path: &Path, source: std::io::Error) -> CensusError {
    CensusError::Store {
        path: path.display().to_string(),
        source,
    }
}

/// Stored documents that fail to (de)serialize are a store fault, not a
/// client one.
fn decode_error(path: &Path, source: serde_json::Error) -> CensusError {
    store_error(path, std::io::Error::from(source))
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).await.map_err(|e| store_error(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| decode_error(path, e))
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(store_error(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LegendKind;

    fn record(id: &str, name: &str) -> HazardRecord {
        HazardRecord {
            id: id.into(),
            name: name.into(),
            description: "Flood susceptibility".into(),
            geojson: r#"{"type":"FeatureCollection","features":[]}"#.into(),
            legend_prop: Some(LegendProperty {
                key: "Susc".into(),
                kind: LegendKind::Categorical,
            }),
            color_settings: None,
        }
    }

    #[tokio::test]
    async fn save_then_list_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(store.list_hazards().await.unwrap().is_empty());

        store.save_hazard(&record("flood", "Flood")).await.unwrap();
        store.save_hazard(&record("landslide", "Landslide")).await.unwrap();

        let names: Vec<String> = store
            .list_hazards()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["Flood", "Landslide"]);
        assert_eq!(store.load_hazard("flood").await.unwrap(), record("flood", "Flood"));
    }

    #[tokio::test]
    async fn unknown_and_unsafe_ids_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(matches!(store.load_hazard("missing").await, Err(CensusError::NotFound(_))));
        assert!(matches!(store.load_hazard("../etc").await, Err(CensusError::NotFound(_))));
    }

    #[tokio::test]
    async fn missing_collections_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(store.load_households().await.unwrap().is_empty());
        assert!(store.load_accidents().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_documents_are_store_faults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("households.json"), "{truncated").unwrap();
        std::fs::create_dir_all(dir.path().join("hazards")).unwrap();
        std::fs::write(dir.path().join("hazards/flood.json"), "[]").unwrap();
        let store = FileStore::new(dir.path());

        let err = store.load_households().await.unwrap_err();
        assert_eq!(err.kind(), "network_error");
        let err = store.load_hazard("flood").await.unwrap_err();
        assert!(matches!(err, CensusError::Store { .. }), "{err}");
    }

    #[test]
    fn record_uses_document_field_names() {
        let json = serde_json::to_value(record("flood", "Flood")).unwrap();
        assert_eq!(json["legendProp"]["type"], "categorical");
        assert!(json.get("colorSettings").is_none());
    }
}
