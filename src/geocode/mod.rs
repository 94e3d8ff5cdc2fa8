//! Address ⇄ coordinate resolution backed by a persistent memo table.
//!
//! [`GeocodeResolver`] owns the policy (cache keys, city bias, precision
//! ranking, the street-level gate); a [`GeocodingProvider`] only speaks to the
//! external service and a [`GeocodeCache`] only stores coordinates.

pub mod mapbox;

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::http::HttpError;
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

fn present(part: &Option<String>) -> Option<&str> {
    part.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn normalize_component(part: &str) -> String {
    part.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl Address {
    /// Parse free text as `"city, state"`, with an optional ZIP after the
    /// state and an optional trailing country.
    pub fn parse_city_state(text: &str) -> Address {
        let parts: Vec<&str> = text
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        let mut address = Address::default();
        if let Some(city) = parts.first() {
            address.city = Some((*city).to_string());
        }
        if let Some(region) = parts.get(1) {
            let mut tokens = region.split_whitespace();
            address.state = tokens.next().map(String::from);
            let rest: Vec<&str> = tokens.collect();
            let numeric = |t: &&str| t.chars().all(|c| c.is_ascii_digit() || c == '-');
            if !rest.is_empty() && rest.iter().all(numeric) {
                address.postal_code = Some(rest.join(" "));
            }
        }
        if let Some(country) = parts.get(2) {
            address.country = Some((*country).to_string());
        }
        address
    }

    pub fn has_street(&self) -> bool {
        present(&self.street).is_some()
    }

    fn components(&self) -> impl Iterator<Item = &str> {
        [
            &self.street,
            &self.city,
            &self.state,
            &self.postal_code,
            &self.country,
        ]
        .into_iter()
        .filter_map(present)
    }

    /// Memo key: trimmed, whitespace-collapsed, lower-cased components joined
    /// by commas. `None` when the address carries nothing.
    pub fn cache_key(&self) -> Option<String> {
        let parts: Vec<String> = self.components().map(normalize_component).collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(","))
        }
    }

    /// Human-readable query text sent to the provider.
    pub fn query_text(&self) -> String {
        self.components().collect::<Vec<_>>().join(", ")
    }

    /// The city-level part of this address, if both city and state are known.
    pub fn city_only(&self) -> Option<Address> {
        let city = present(&self.city)?;
        let state = present(&self.state)?;
        Some(Address {
            city: Some(city.to_string()),
            state: Some(state.to_string()),
            country: self.country.clone(),
            ..Address::default()
        })
    }

    pub fn with_default_country(&self, country: &str) -> Address {
        let mut address = self.clone();
        if present(&address.country).is_none() {
            address.country = Some(country.to_string());
        }
        address
    }
}

/// Match granularity reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceKind {
    Poi,
    Address,
    Street,
    Postcode,
    Neighborhood,
    Locality,
    Place,
    District,
    Region,
    Country,
}

impl PlaceKind {
    pub fn parse(raw: &str) -> Option<PlaceKind> {
        Some(match raw {
            "poi" | "poi.landmark" => PlaceKind::Poi,
            "address" => PlaceKind::Address,
            "street" => PlaceKind::Street,
            "postcode" => PlaceKind::Postcode,
            "neighborhood" => PlaceKind::Neighborhood,
            "locality" => PlaceKind::Locality,
            "place" => PlaceKind::Place,
            "district" => PlaceKind::District,
            "region" => PlaceKind::Region,
            "country" => PlaceKind::Country,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlaceKind::Poi => "poi",
            PlaceKind::Address => "address",
            PlaceKind::Street => "street",
            PlaceKind::Postcode => "postcode",
            PlaceKind::Neighborhood => "neighborhood",
            PlaceKind::Locality => "locality",
            PlaceKind::Place => "place",
            PlaceKind::District => "district",
            PlaceKind::Region => "region",
            PlaceKind::Country => "country",
        }
    }

    /// Higher is more precise.
    pub fn precision(&self) -> u8 {
        match self {
            PlaceKind::Poi => 5,
            PlaceKind::Address => 4,
            PlaceKind::Street => 3,
            PlaceKind::Postcode | PlaceKind::Neighborhood => 2,
            PlaceKind::Locality
            | PlaceKind::Place
            | PlaceKind::District
            | PlaceKind::Region
            | PlaceKind::Country => 1,
        }
    }

    pub fn is_street_level(&self) -> bool {
        self.precision() >= PlaceKind::Street.precision()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub kind: PlaceKind,
    pub coordinate: Coordinate,
    pub address: Address,
    pub relevance: f64,
}

/// Highest precision wins; relevance breaks ties; provider order breaks the rest.
pub fn best_candidate(candidates: Vec<Candidate>) -> Option<Candidate> {
    let mut best: Option<Candidate> = None;
    for candidate in candidates {
        let better = match &best {
            None => true,
            Some(current) => {
                match candidate.kind.precision().cmp(&current.kind.precision()) {
                    Ordering::Greater => true,
                    Ordering::Less => false,
                    Ordering::Equal => candidate.relevance > current.relevance,
                }
            }
        };
        if better {
            best = Some(candidate);
        }
    }
    best
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForwardQuery {
    pub text: String,
    pub country: Option<String>,
    pub kinds: Vec<PlaceKind>,
    pub proximity: Option<Coordinate>,
    pub limit: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAddress {
    pub address: Address,
    pub coordinate: Coordinate,
    pub kind: PlaceKind,
}

#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    #[error("no match")]
    NotFound,

    #[error("geocoder unavailable: {0}")]
    Transient(String),

    #[error("geocoder rejected request: {0}")]
    Upstream(String),

    #[error("unreadable geocoder response: {0}")]
    Decode(String),

    #[error("geocoder misconfigured: {0}")]
    Configuration(String),
}

impl GeocodeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, GeocodeError::NotFound)
    }
}

impl From<HttpError> for GeocodeError {
    fn from(e: HttpError) -> Self {
        if e.is_transient() {
            GeocodeError::Transient(e.to_string())
        } else {
            GeocodeError::Upstream(e.to_string())
        }
    }
}

#[async_trait]
pub trait GeocodingProvider: Send + Sync {
    async fn forward(&self, query: &ForwardQuery) -> Result<Vec<Candidate>, GeocodeError>;

    /// Every candidate the service knows at this point, any granularity.
    async fn reverse(&self, at: Coordinate) -> Result<Vec<Candidate>, GeocodeError>;
}

/// Persistent normalized-address → coordinate memo.
#[async_trait]
pub trait GeocodeCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Coordinate>, StoreError>;
    async fn put(&self, key: &str, coordinate: Coordinate) -> Result<(), StoreError>;
}

/// Either a structured address or a bare `"city, state"` string.
#[derive(Debug, Clone)]
pub enum AddressInput {
    Structured(Address),
    Text(String),
}

impl From<Address> for AddressInput {
    fn from(address: Address) -> Self {
        AddressInput::Structured(address)
    }
}

impl From<&Address> for AddressInput {
    fn from(address: &Address) -> Self {
        AddressInput::Structured(address.clone())
    }
}

impl From<&str> for AddressInput {
    fn from(text: &str) -> Self {
        AddressInput::Text(text.to_string())
    }
}

impl From<String> for AddressInput {
    fn from(text: String) -> Self {
        AddressInput::Text(text)
    }
}

pub struct GeocodeResolver {
    provider: Arc<dyn GeocodingProvider>,
    cache: Arc<dyn GeocodeCache>,
    default_country: String,
}

impl GeocodeResolver {
    pub fn new(
        provider: Arc<dyn GeocodingProvider>,
        cache: Arc<dyn GeocodeCache>,
        default_country: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            cache,
            default_country: default_country.into(),
        }
    }

    pub fn default_country(&self) -> &str {
        &self.default_country
    }

    /// Resolve an address to a coordinate, memoized by normalized address.
    pub async fn forward(&self, address: &Address) -> Result<Coordinate, GeocodeError> {
        let address = address.with_default_country(&self.default_country);
        let key = address.cache_key().ok_or(GeocodeError::NotFound)?;
        if let Some(hit) = self.cached(&key).await {
            tracing::debug!(key = %key, "Geocode cache hit");
            return Ok(hit);
        }

        // A ZIP already pins the region, so the bias lookup is only worth a
        // network call for street addresses without one.
        let bias = match address.city_only() {
            Some(city) if address.has_street() && present(&address.postal_code).is_none() => {
                match self.lookup(&city).await {
                    Ok(point) => Some(point),
                    Err(e) => {
                        tracing::debug!(city = %city.query_text(), "Skipping city bias: {e}");
                        None
                    }
                }
            }
            _ => None,
        };

        self.query_and_remember(&key, &address, bias).await
    }

    /// Find the street address at a coordinate. City/region-level matches are
    /// `NotFound` unless `allow_imprecise` is set.
    pub async fn reverse(
        &self,
        at: Coordinate,
        allow_imprecise: bool,
    ) -> Result<ResolvedAddress, GeocodeError> {
        let candidates = self.provider.reverse(at).await?;
        let best = best_candidate(candidates).ok_or(GeocodeError::NotFound)?;
        if !allow_imprecise && (!best.kind.is_street_level() || !best.address.has_street()) {
            tracing::debug!(
                lat = at.lat,
                lon = at.lon,
                kind = best.kind.as_str(),
                "Reverse geocode too coarse"
            );
            return Err(GeocodeError::NotFound);
        }
        Ok(ResolvedAddress {
            address: best.address,
            coordinate: best.coordinate,
            kind: best.kind,
        })
    }

    /// [`forward`](Self::forward) that logs and swallows every failure.
    pub async fn forward_safe(&self, input: impl Into<AddressInput>) -> Option<Coordinate> {
        let address = match input.into() {
            AddressInput::Structured(address) => address,
            AddressInput::Text(text) => Address::parse_city_state(&text),
        };
        match self.forward(&address).await {
            Ok(point) => Some(point),
            Err(GeocodeError::NotFound) => {
                tracing::debug!(address = %address.query_text(), "No geocode match");
                None
            }
            Err(e) => {
                tracing::warn!(address = %address.query_text(), "Geocode failed: {e}");
                None
            }
        }
    }

    async fn lookup(&self, address: &Address) -> Result<Coordinate, GeocodeError> {
        let key = address.cache_key().ok_or(GeocodeError::NotFound)?;
        if let Some(hit) = self.cached(&key).await {
            return Ok(hit);
        }
        self.query_and_remember(&key, address, None).await
    }

    async fn query_and_remember(
        &self,
        key: &str,
        address: &Address,
        proximity: Option<Coordinate>,
    ) -> Result<Coordinate, GeocodeError> {
        let kinds = if address.has_street() {
            vec![PlaceKind::Address, PlaceKind::Poi]
        } else {
            vec![PlaceKind::Postcode, PlaceKind::Place, PlaceKind::Locality]
        };
        let query = ForwardQuery {
            text: address.query_text(),
            country: present(&address.country).map(str::to_lowercase),
            kinds,
            proximity,
            limit: 5,
        };
        let candidates = self.provider.forward(&query).await?;
        let best = best_candidate(candidates)
            .filter(|c| c.coordinate.is_valid())
            .ok_or(GeocodeError::NotFound)?;

        if let Err(e) = self.cache.put(key, best.coordinate).await {
            tracing::warn!(key = %key, "Failed to cache geocode result: {e}");
        }
        Ok(best.coordinate)
    }

    async fn cached(&self, key: &str) -> Option<Coordinate> {
        match self.cache.get(key).await {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!(key = %key, "Geocode cache read failed: {e}");
                None
            }
        }
    }
}
