//! Nominatim-style HTTP geocoder.
//!
//! Issues `GET {base_url}/search?q=<address>&format=json&limit=1` and takes
//! the first hit. Providers return `lat`/`lon` as strings; plain numbers are
//! accepted as well.

use std::time::Duration;

use foundation::Coordinate;
use futures_util::future::BoxFuture;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::resolver::{ConfigError, GeoResolver, Resolution, ResolutionFailure};

#[derive(Debug, Clone)]
pub struct HttpGeocoderConfig {
    pub base_url: String,
    /// Public providers reject anonymous clients.
    pub user_agent: String,
    pub timeout: Duration,
    /// Optional comma-separated ISO 3166-1 country filter.
    pub country_codes: Option<String>,
}

impl Default for HttpGeocoderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://nominatim.openstreetmap.org".to_string(),
            user_agent: concat!("marker-sync/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: Duration::from_secs(10),
            country_codes: None,
        }
    }
}

pub struct HttpGeocoder {
    config: HttpGeocoderConfig,
    client: Result<reqwest::Client, String>,
}

impl HttpGeocoder {
    /// Never fails: a broken configuration is reported by
    /// [`GeoResolver::readiness`] instead.
    pub fn new(config: HttpGeocoderConfig) -> Self {
        let client = if config.base_url.trim().is_empty() {
            Err("base url is empty".to_string())
        } else {
            reqwest::Client::builder()
                .timeout(config.timeout)
                .user_agent(config.user_agent.clone())
                .build()
                .map_err(|e| e.to_string())
        };
        Self { config, client }
    }

    pub fn config(&self) -> &HttpGeocoderConfig {
        &self.config
    }

    pub fn search_url(&self) -> String {
        format!("{}/search", self.config.base_url.trim_end_matches('/'))
    }

    async fn search(&self, address: &str) -> Resolution {
        let client = self
            .client
            .as_ref()
            .map_err(|e| ResolutionFailure::Transport(e.clone()))?;

        let mut query = vec![("q", address), ("format", "json"), ("limit", "1")];
        if let Some(codes) = self.config.country_codes.as_deref() {
            query.push(("countrycodes", codes));
        }

        let response = client
            .get(self.search_url())
            .query(&query)
            .send()
            .await
            .map_err(transport_failure)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("geocoder rate limited the request");
            return Err(ResolutionFailure::RateLimited);
        }
        if !status.is_success() {
            return Err(ResolutionFailure::Transport(format!("status {status}")));
        }

        let body = response.text().await.map_err(transport_failure)?;
        parse_search_response(&body)
    }
}

impl GeoResolver for HttpGeocoder {
    fn readiness(&self) -> Result<(), ConfigError> {
        match &self.client {
            Ok(_) => Ok(()),
            Err(reason) => Err(ConfigError::new("geocoder", reason.clone())),
        }
    }

    fn resolve<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Resolution> {
        Box::pin(async move {
            let result = self.search(address).await;
            debug!(ok = result.is_ok(), "geocoder call finished");
            result
        })
    }
}

fn transport_failure(err: reqwest::Error) -> ResolutionFailure {
    if err.is_timeout() {
        ResolutionFailure::TimedOut
    } else {
        ResolutionFailure::Transport(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Degrees {
    Number(f64),
    Text(String),
}

impl Degrees {
    fn value(&self) -> Option<f64> {
        match self {
            Degrees::Number(v) => Some(*v),
            Degrees::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Place {
    lat: Degrees,
    lon: Degrees,
}

/// Interprets a search response body: first hit wins, none is `NotFound`.
pub fn parse_search_response(body: &str) -> Resolution {
    let places: Vec<Place> = serde_json::from_str(body)
        .map_err(|e| ResolutionFailure::InvalidResponse(e.to_string()))?;
    let Some(place) = places.first() else {
        return Err(ResolutionFailure::NotFound);
    };

    let coordinate = Coordinate::from_parts(place.lat.value(), place.lon.value())
        .ok_or_else(|| ResolutionFailure::InvalidResponse("unparsable lat/lon".to_string()))?;
    if !coordinate.is_in_range() {
        return Err(ResolutionFailure::InvalidResponse(format!(
            "coordinate out of range: {coordinate}"
        )));
    }
    Ok(coordinate)
}

#[cfg(test)]
mod tests {
    use foundation::Coordinate;

    use super::{HttpGeocoder, HttpGeocoderConfig, parse_search_response};
    use crate::resolver::{GeoResolver, ResolutionFailure};

    #[test]
    fn parses_string_degrees() {
        let body = r#"[{"place_id": 1, "lat": "52.5200", "lon": "13.4050", "display_name": "Berlin"}]"#;
        assert_eq!(parse_search_response(body), Ok(Coordinate::new(52.52, 13.405)));
    }

    #[test]
    fn parses_numeric_degrees() {
        let body = r#"[{"lat": -33.86, "lon": 151.21}]"#;
        assert_eq!(parse_search_response(body), Ok(Coordinate::new(-33.86, 151.21)));
    }

    #[test]
    fn empty_result_is_not_found() {
        assert_eq!(parse_search_response("[]"), Err(ResolutionFailure::NotFound));
    }

    #[test]
    fn garbage_is_invalid_response() {
        assert!(matches!(
            parse_search_response("<html>"),
            Err(ResolutionFailure::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_search_response(r#"[{"lat": "north", "lon": "1"}]"#),
            Err(ResolutionFailure::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_search_response(r#"[{"lat": "95", "lon": "1"}]"#),
            Err(ResolutionFailure::InvalidResponse(_))
        ));
    }

    #[test]
    fn empty_base_url_is_a_configuration_error() {
        let g = HttpGeocoder::new(HttpGeocoderConfig {
            base_url: "  ".to_string(),
            ..HttpGeocoderConfig::default()
        });
        let err = g.readiness().unwrap_err();
        assert_eq!(err.component, "geocoder");
    }

    #[test]
    fn search_url_trims_trailing_slash() {
        let g = HttpGeocoder::new(HttpGeocoderConfig {
            base_url: "http://localhost:8080/".to_string(),
            ..HttpGeocoderConfig::default()
        });
        assert!(g.readiness().is_ok());
        assert_eq!(g.search_url(), "http://localhost:8080/search");
    }
}
