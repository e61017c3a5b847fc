// src/geocode_client.rs
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// Forward-geocoding against the Mapbox Places API. Lookups are best-effort:
/// any failure resolves to `None` and the caller just omits the entry.
#[derive(Debug, Clone)]
pub struct MapboxClient {
    client: Client,
    api_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GeocodedLocation {
    pub query: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(rename = "displayName")]
    pub display_name: String,
}

impl MapboxClient {
    pub fn new(api_token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_token: api_token.filter(|t| !t.trim().is_empty()),
        }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var("MAPBOX_API_KEY").ok())
    }

    pub fn is_configured(&self) -> bool {
        self.api_token.is_some()
    }

    pub async fn geocode(&self, query: &str) -> Option<GeocodedLocation> {
        let token = self.api_token.as_deref()?;
        let url = format!(
            "https://api.mapbox.com/geocoding/v5/mapbox.places/{}.json?limit=1&access_token={}",
            urlencoding::encode(query),
            urlencoding::encode(token)
        );

        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .ok()?;

        if !response.status().is_success() {
            tracing::debug!(
                "Mapbox lookup for {:?} returned status {}",
                query,
                response.status()
            );
            return None;
        }

        let body: Value = response.json().await.ok()?;
        parse_feature_collection(query, &body)
    }
}

/// Pull the first feature's center and display name out of a Mapbox
/// feature collection; malformed shapes yield `None`.
fn parse_feature_collection(query: &str, body: &Value) -> Option<GeocodedLocation> {
    let first = body.get("features")?.as_array()?.first()?;
    let center = first.get("center")?.as_array()?;
    if center.len() < 2 {
        return None;
    }
    let lng = center[0].as_f64()?;
    let lat = center[1].as_f64()?;
    let display_name = first
        .get("place_name")
        .and_then(Value::as_str)
        .unwrap_or(query)
        .to_string();

    Some(GeocodedLocation {
        query: query.to_string(),
        lat,
        lng,
        display_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_first_feature() {
        let body = json!({
            "features": [
                {"center": [-9.139, 38.722], "place_name": "Lisbon, Portugal"},
                {"center": [0.0, 0.0], "place_name": "elsewhere"}
            ]
        });
        let result = parse_feature_collection("Lisbon", &body).expect("location");
        assert_eq!(result.display_name, "Lisbon, Portugal");
        assert_eq!(result.lng, -9.139);
        assert_eq!(result.lat, 38.722);
    }

    #[test]
    fn display_name_falls_back_to_query() {
        let body = json!({"features": [{"center": [1.0, 2.0]}]});
        let result = parse_feature_collection("Somewhere", &body).expect("location");
        assert_eq!(result.display_name, "Somewhere");
    }

    #[test]
    fn rejects_malformed_shapes() {
        assert!(parse_feature_collection("q", &json!({})).is_none());
        assert!(parse_feature_collection("q", &json!({"features": []})).is_none());
        assert!(
            parse_feature_collection("q", &json!({"features": [{"center": [1.0]}]})).is_none()
        );
        assert!(
            parse_feature_collection("q", &json!({"features": [{"center": ["a", "b"]}]}))
                .is_none()
        );
    }

    #[test]
    fn blank_token_means_not_configured() {
        assert!(!MapboxClient::new(Some("  ".to_string())).is_configured());
        assert!(MapboxClient::new(Some("tok".to_string())).is_configured());
    }
}
