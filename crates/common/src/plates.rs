//! Plate sighting contracts: what is persisted, what the query endpoints
//! return and what an operator submits for a driver lookup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted, accepted sighting
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlateRecord {
    /// Row identifier assigned by the store
    pub id: i64,

    /// Formatted plate string
    pub plate: String,

    /// When the plate was seen
    pub time_detected: DateTime<Utc>,

    /// Driver first name, when a directory lookup succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Driver family name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name2: Option<String>,

    /// Driver national identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub national_code: Option<String>,
}

/// Driver identity as held by the external record system
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DriverIdentity {
    pub name: String,
    pub name2: String,
    pub national_code: String,
}

/// Response of the latest-plate query; empty before the first acceptance
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LatestPlateResponse {
    pub formatted_plate: String,
}

/// Request to look up the driver registered for a plate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlateSearchRequest {
    #[serde(default)]
    pub plate_output: String,
}

/// Newest sightings first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlateListResponse {
    pub plates: Vec<PlateRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_omits_missing_driver_fields() {
        let record = PlateRecord {
            id: 7,
            plate: "12ایران345ب67".to_string(),
            time_detected: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
            name: None,
            name2: None,
            national_code: None,
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["id"], 7);
        assert!(json.get("name").is_none());
        assert!(json.get("national_code").is_none());
    }

    #[test]
    fn test_latest_plate_defaults_to_empty() {
        let json = serde_json::to_string(&LatestPlateResponse::default()).unwrap();
        assert_eq!(json, r#"{"formatted_plate":""}"#);
    }

    #[test]
    fn test_search_request_tolerates_missing_field() {
        let request: PlateSearchRequest = serde_json::from_str("{}").unwrap();
        assert!(request.plate_output.is_empty());
    }
}
