// src/models/trip_profile.rs
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::FromRow;

/// Structured free-text travel preferences, 1:1 with a chat. Every field is
/// independently optional and stored trimmed-to-NULL.
#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow)]
pub struct TripProfile {
    pub id: i64,
    pub chat_id: i64,
    pub destination: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub budget: Option<String>,
    pub travelers: Option<String>,
    pub interests: Option<String>,
    pub constraints: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct TripProfileRequest {
    pub destination: Option<String>,
    #[serde(rename = "startDate")]
    pub start_date: Option<String>,
    #[serde(rename = "endDate")]
    pub end_date: Option<String>,
    pub budget: Option<String>,
    pub travelers: Option<String>,
    pub interests: Option<String>,
    pub constraints: Option<String>,
}

/// Wire shape used by the profile endpoints: missing fields come back as
/// empty strings so the form can bind them directly.
pub fn profile_dto(profile: Option<&TripProfile>) -> Value {
    fn field(value: Option<&String>) -> &str {
        value.map(String::as_str).unwrap_or("")
    }
    match profile {
        None => json!({
            "destination": "",
            "startDate": "",
            "endDate": "",
            "budget": "",
            "travelers": "",
            "interests": "",
            "constraints": "",
        }),
        Some(p) => json!({
            "destination": field(p.destination.as_ref()),
            "startDate": field(p.start_date.as_ref()),
            "endDate": field(p.end_date.as_ref()),
            "budget": field(p.budget.as_ref()),
            "travelers": field(p.travelers.as_ref()),
            "interests": field(p.interests.as_ref()),
            "constraints": field(p.constraints.as_ref()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_profile_serializes_empty_fields() {
        let dto = profile_dto(None);
        assert_eq!(dto["destination"], "");
        assert_eq!(dto["startDate"], "");
    }

    #[test]
    fn present_fields_pass_through() {
        let profile = TripProfile {
            id: 1,
            chat_id: 2,
            destination: Some("Lisbon".to_string()),
            ..Default::default()
        };
        let dto = profile_dto(Some(&profile));
        assert_eq!(dto["destination"], "Lisbon");
        assert_eq!(dto["budget"], "");
    }
}
