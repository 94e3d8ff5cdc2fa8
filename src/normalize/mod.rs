//! Draft → canonical posting.
//!
//! A posting is only produced when a street-level address can be attached to
//! it, either found in the draft's text and forward-geocoded, or recovered by
//! reverse-geocoding the draft's approximate coordinate.

pub mod address;
pub mod employment;
pub mod salary;

use std::sync::Arc;

use crate::collectors::JobDraft;
use crate::geocode::{Address, Coordinate, GeocodeError, GeocodeResolver};
use crate::models::job::NewJobPosting;

const DEFAULT_CURRENCY: &str = "USD";
const UNKNOWN_COMPANY: &str = "Unknown";

/// Location strings that carry no place at all.
pub fn is_remote(location: &str) -> bool {
    let lower = location.trim().to_lowercase();
    lower.is_empty()
        || ["remote", "anywhere", "work from home", "wfh", "telework", "nationwide"]
            .iter()
            .any(|marker| lower.contains(marker))
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// Fill the blanks of `found` from `context`.
fn merge(found: Address, context: &Address) -> Address {
    Address {
        street: found.street,
        city: found.city.or_else(|| context.city.clone()),
        state: found.state.or_else(|| context.state.clone()),
        postal_code: found.postal_code.or_else(|| context.postal_code.clone()),
        country: found.country.or_else(|| context.country.clone()),
    }
}

/// Swallow `NotFound`; everything else is a failure of this draft.
fn found<T>(result: Result<T, GeocodeError>) -> Result<Option<T>, GeocodeError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(GeocodeError::NotFound) => Ok(None),
        Err(e) => Err(e),
    }
}

pub struct Normalizer {
    resolver: Arc<GeocodeResolver>,
}

impl Normalizer {
    pub fn new(resolver: Arc<GeocodeResolver>) -> Self {
        Self { resolver }
    }

    /// `Ok(None)` discards the draft (no title, or no street-level address);
    /// `Err` is a lookup failure the caller counts as failed.
    pub async fn normalize(&self, draft: &JobDraft) -> Result<Option<NewJobPosting>, GeocodeError> {
        let title = draft.title.trim();
        if title.is_empty() {
            tracing::debug!(
                source = %draft.source,
                source_id = %draft.source_id,
                "Discarding draft without title"
            );
            return Ok(None);
        }

        let Some((address, coordinate)) = self.locate(draft).await? else {
            tracing::debug!(
                source = %draft.source,
                source_id = %draft.source_id,
                location = draft.location_text.as_deref().unwrap_or(""),
                "Discarding draft without a street-level address"
            );
            return Ok(None);
        };

        let pay = draft.salary_text.as_deref().and_then(salary::parse);
        let pay_currency = pay.map(|_| {
            non_empty(&draft.salary_currency)
                .map(|c| c.to_uppercase())
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string())
        });
        let country = non_empty(&address.country)
            .unwrap_or_else(|| self.resolver.default_country().to_string())
            .to_uppercase();

        Ok(Some(NewJobPosting {
            source: draft.source,
            source_id: draft.source_id.clone(),
            title: title.to_string(),
            company: non_empty(&draft.company).unwrap_or_else(|| UNKNOWN_COMPANY.to_string()),
            description: non_empty(&draft.description),
            application_url: non_empty(&draft.url),
            street: address.street,
            city: address.city,
            state: address.state,
            postal_code: address.postal_code,
            country: Some(country),
            latitude: coordinate.lat,
            longitude: coordinate.lon,
            employment_type: draft
                .employment_type_text
                .as_deref()
                .and_then(employment::classify),
            pay_min: pay.map(|p| p.min),
            pay_max: pay.map(|p| p.max),
            pay_currency,
            posted_at: draft.posted_at,
            status: None,
        }))
    }

    /// Street-level address and coordinate for a draft, if one exists.
    async fn locate(
        &self,
        draft: &JobDraft,
    ) -> Result<Option<(Address, Coordinate)>, GeocodeError> {
        let location = draft.location_text.as_deref().unwrap_or("");
        let remote = is_remote(location);
        let hint = draft.address.clone().unwrap_or_default();
        let context = if remote {
            hint.clone()
        } else {
            merge(hint.clone(), &Address::parse_city_state(location))
        };
        let asserted = draft.coordinate.filter(Coordinate::is_valid);

        // The source gave both a street and a point: trust it as-is.
        if let Some(at) = asserted
            && hint.has_street()
        {
            return Ok(Some((context, at)));
        }

        let extracted = hint
            .has_street()
            .then(|| hint.clone())
            .or_else(|| (!remote).then(|| address::extract(location)).flatten())
            .or_else(|| draft.description.as_deref().and_then(address::extract));

        if let Some(street) = extracted {
            let full = merge(street, &context);
            if let Some(at) = found(self.resolver.forward(&full).await)? {
                return Ok(Some((full, at)));
            }
        }

        // A city centroid is only a starting point for the reverse lookup;
        // failing to find one discards the draft.
        let base = match asserted {
            Some(at) => Some(at),
            None => match context.city_only() {
                Some(city) => self.resolver.forward_safe(city).await,
                None => None,
            },
        };
        let Some(base) = base else {
            return Ok(None);
        };

        match found(self.resolver.reverse(base, false).await)? {
            Some(resolved) => Ok(Some((merge(resolved.address, &context), resolved.coordinate))),
            None => Ok(None),
        }
    }
}
