use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;

use super::{
    Address, Candidate, Coordinate, ForwardQuery, GeocodeError, GeocodingProvider, PlaceKind,
};
use crate::http::{RetryPolicy, send_with_retry};

/// Path-segment encoding: everything but RFC 3986 unreserved characters.
/// `;` in particular must be escaped, Mapbox treats it as a batch separator.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

const BASE_URL: &str = "https://api.mapbox.com";

pub struct MapboxGeocoder {
    http: reqwest::Client,
    token: String,
    base_url: String,
    retry: RetryPolicy,
}

/// Reject tokens that cannot possibly authenticate, so a bad deployment fails
/// at startup instead of on the first lookup.
pub fn validate_token(token: &str) -> Result<(), GeocodeError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(GeocodeError::Configuration(
            "MAPBOX_TOKEN is empty".to_string(),
        ));
    }
    if token.chars().any(char::is_whitespace) {
        return Err(GeocodeError::Configuration(
            "MAPBOX_TOKEN contains whitespace".to_string(),
        ));
    }
    if !["pk.", "sk.", "tk."].iter().any(|p| token.starts_with(p)) {
        return Err(GeocodeError::Configuration(
            "MAPBOX_TOKEN must start with pk., sk. or tk.".to_string(),
        ));
    }
    Ok(())
}

impl MapboxGeocoder {
    pub fn new(token: &str, timeout: Duration) -> Result<Self, GeocodeError> {
        validate_token(token)?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GeocodeError::Configuration(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            token: token.trim().to_string(),
            base_url: BASE_URL.to_string(),
            retry: RetryPolicy::default(),
        })
    }

    async fn fetch(
        &self,
        path: &str,
        params: Vec<(&str, String)>,
    ) -> Result<Vec<Candidate>, GeocodeError> {
        let url = format!("{}/geocoding/v5/mapbox.places/{path}.json", self.base_url);
        let resp = send_with_retry(&self.retry, || {
            self.http
                .get(&url)
                .query(&[("access_token", self.token.as_str())])
                .query(&params)
        })
        .await?;
        let body: FeatureCollection = resp
            .json()
            .await
            .map_err(|e| GeocodeError::Decode(e.to_string()))?;
        Ok(body.features.into_iter().filter_map(Feature::into_candidate).collect())
    }
}

#[async_trait]
impl GeocodingProvider for MapboxGeocoder {
    async fn forward(&self, query: &ForwardQuery) -> Result<Vec<Candidate>, GeocodeError> {
        let path = utf8_percent_encode(&query.text, PATH_SEGMENT).to_string();
        let mut params = vec![
            ("autocomplete", "false".to_string()),
            ("limit", query.limit.to_string()),
        ];
        if let Some(country) = &query.country {
            params.push(("country", country.clone()));
        }
        if !query.kinds.is_empty() {
            let types: Vec<&str> = query.kinds.iter().map(PlaceKind::as_str).collect();
            params.push(("types", types.join(",")));
        }
        if let Some(bias) = query.proximity {
            params.push(("proximity", format!("{},{}", bias.lon, bias.lat)));
        }
        self.fetch(&path, params).await
    }

    async fn reverse(&self, at: Coordinate) -> Result<Vec<Candidate>, GeocodeError> {
        // Without `types`, Mapbox answers with one feature per granularity.
        let path = format!("{},{}", at.lon, at.lat);
        self.fetch(&path, Vec::new()).await
    }
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    place_type: Vec<String>,
    #[serde(default)]
    relevance: f64,
    #[serde(default)]
    text: Option<String>,
    /// House number for `address` features.
    #[serde(default)]
    address: Option<String>,
    center: Option<[f64; 2]>,
    #[serde(default)]
    properties: FeatureProperties,
    #[serde(default)]
    context: Vec<ContextEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct FeatureProperties {
    /// Street address for `poi` features.
    #[serde(default)]
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContextEntry {
    id: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    short_code: Option<String>,
}

fn layer(id: &str) -> &str {
    id.split('.').next().unwrap_or("")
}

/// `US-AZ` → `AZ`; regions without a short code fall back to their name.
fn region_code(entry: &ContextEntry) -> Option<String> {
    match &entry.short_code {
        Some(code) => Some(code.rsplit('-').next().unwrap_or(code).to_uppercase()),
        None => entry.text.clone(),
    }
}

impl Feature {
    fn into_candidate(self) -> Option<Candidate> {
        let kind = self.place_type.iter().find_map(|t| PlaceKind::parse(t))?;
        let [lon, lat] = self.center?;

        let mut address = Address::default();
        for entry in &self.context {
            match layer(&entry.id) {
                "postcode" => address.postal_code = entry.text.clone(),
                "place" => address.city = entry.text.clone(),
                "region" => address.state = region_code(entry),
                "country" => address.country = entry.short_code.as_ref().map(|c| c.to_uppercase()),
                _ => {}
            }
        }

        let text = self.text.clone().filter(|t| !t.trim().is_empty());
        match kind {
            PlaceKind::Address => {
                address.street = match (&self.address, &text) {
                    (Some(number), Some(name)) => Some(format!("{number} {name}")),
                    (None, Some(name)) => Some(name.clone()),
                    _ => None,
                };
            }
            PlaceKind::Poi => {
                address.street = self.properties.address.clone().filter(|a| !a.trim().is_empty());
            }
            PlaceKind::Street => address.street = text,
            PlaceKind::Postcode => address.postal_code = text,
            PlaceKind::Place | PlaceKind::Locality => address.city = text,
            PlaceKind::Region => address.state = text,
            _ => {}
        }

        Some(Candidate {
            kind,
            coordinate: Coordinate::new(lat, lon),
            address,
            relevance: self.relevance,
        })
    }
}
