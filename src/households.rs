//! Decoding of household and accident documents as exported from the
//! census document store.

use crate::types::{lenient_string, Accident, GeoPoint, Household, Member};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HouseholdDocument {
    #[serde(default)]
    pub geographic_identification: GeographicIdentification,
    #[serde(default)]
    pub members: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeographicIdentification {
    #[serde(default)]
    pub latitude: Value,
    #[serde(default)]
    pub longitude: Value,
    #[serde(default, deserialize_with = "lenient_string")]
    pub barangay: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub respondent: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub contact: String,
}

impl HouseholdDocument {
    pub fn into_household(self, id: String) -> Household {
        let geo = self.geographic_identification;
        let location = GeoPoint::from_values(&geo.latitude, &geo.longitude);
        let members = decode_members(&id, self.members);
        let name = if geo.respondent.is_empty() {
            members.first().map(|m| m.name.clone()).unwrap_or_default()
        } else {
            geo.respondent
        };
        Household {
            id,
            location,
            name,
            barangay: geo.barangay,
            contact: geo.contact,
            members,
        }
    }
}

/// Members are stored keyed by member id (older exports use an array). A
/// member that does not decode is dropped on its own; the household stays.
fn decode_members(household: &str, members: Value) -> Vec<Member> {
    let entries: Vec<Value> = match members {
        Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => {
            warn!(household, members = %other, "ignoring malformed member list");
            Vec::new()
        }
    };
    entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<Member>(entry) {
            Ok(member) => Some(member),
            Err(e) => {
                warn!(household, error = %e, "skipping malformed member");
                None
            }
        })
        .collect()
}

/// Decodes the household collection, keyed by household id. Documents that
/// do not decode are logged and skipped.
pub fn parse_households(text: &str) -> serde_json::Result<Vec<Household>> {
    let documents: BTreeMap<String, Value> = serde_json::from_str(text)?;
    let mut households = Vec::with_capacity(documents.len());
    for (id, document) in documents {
        match serde_json::from_value::<HouseholdDocument>(document) {
            Ok(doc) => households.push(doc.into_household(id)),
            Err(e) => warn!(household = %id, error = %e, "skipping malformed household document"),
        }
    }
    Ok(households)
}

#[derive(Debug, Deserialize)]
struct AccidentDocument {
    id: String,
    #[serde(default)]
    latitude: Value,
    #[serde(default)]
    longitude: Value,
    #[serde(default)]
    date: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    barangay: String,
}

pub fn parse_accidents(text: &str) -> serde_json::Result<Vec<Accident>> {
    let documents: Vec<AccidentDocument> = serde_json::from_str(text)?;
    Ok(documents
        .into_iter()
        .map(|doc| Accident {
            location: GeoPoint::from_values(&doc.latitude, &doc.longitude),
            id: doc.id,
            date: doc.date,
            kind: doc.kind,
            description: doc.description,
            barangay: doc.barangay,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_household_export() {
        let text = r#"{
            "HH-002": {
                "geographicIdentification": {"latitude": "14.6", "longitude": "121.0",
                    "barangay": "San Roque", "contact": "0917"},
                "members": {"m1": {"name": "Ana Cruz", "sex": "F", "age": "34", "disability": "None"}}
            },
            "HH-001": {
                "geographicIdentification": {"latitude": "abc", "longitude": "121.0",
                    "respondent": "Jose Cruz"}
            },
            "HH-003": "not a document"
        }"#;
        let households = parse_households(text).unwrap();
        assert_eq!(households.len(), 2);

        assert_eq!(households[0].id, "HH-001");
        assert_eq!(households[0].location, None);
        assert_eq!(households[0].name, "Jose Cruz");

        assert_eq!(households[1].location, Some(GeoPoint::new(14.6, 121.0)));
        assert_eq!(households[1].name, "Ana Cruz");
        assert_eq!(households[1].members.len(), 1);
    }

    #[test]
    fn numeric_and_null_member_fields_keep_the_household() {
        let text = r#"{
            "HH-010": {
                "geographicIdentification": {"latitude": "14.61", "longitude": "121.01",
                    "barangay": "Malanday", "contact": 9171234567},
                "members": {
                    "m1": {"name": "Ana Cruz", "sex": "F", "age": 34, "disability": null},
                    "m2": "garbled"
                }
            }
        }"#;
        let households = parse_households(text).unwrap();
        assert_eq!(households.len(), 1);
        let household = &households[0];
        assert_eq!(household.location, Some(GeoPoint::new(14.61, 121.01)));
        assert_eq!(household.contact, "9171234567");
        assert_eq!(household.members.len(), 1);
        assert_eq!(household.members[0].age, "34");
        assert_eq!(household.members[0].disability, "");
    }

    #[test]
    fn decodes_accidents() {
        let text = r#"[{"id": "A1", "latitude": 14.5, "longitude": "121.1", "type": "Flood",
            "date": "2024-07-24", "description": "Street flooding", "barangay": "Malanday"}]"#;
        let accidents = parse_accidents(text).unwrap();
        assert_eq!(accidents[0].kind, "Flood");
        assert_eq!(accidents[0].location, Some(GeoPoint::new(14.5, 121.1)));
    }
}
