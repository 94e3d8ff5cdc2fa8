//! Street-address extraction from free text.
//!
//! Patterns are tried in priority order and the first match wins, so a
//! complete "street, city, ST 85004" beats a bare street mentioned earlier.

use std::sync::LazyLock;

use regex::Regex;

use crate::geocode::Address;

const STREET: &str = r"(?i:\d{1,6}[A-Z]?\s+(?:[NSEW]\.?\s+)?(?:[A-Z0-9'.]+\s+){0,4}?(?:Street|St|Avenue|Ave|Boulevard|Blvd|Road|Rd|Drive|Dr|Lane|Ln|Way|Court|Ct|Place|Pl|Parkway|Pkwy|Highway|Hwy|Circle|Cir|Terrace|Ter|Trail|Trl|Loop|Square|Sq)\b\.?(?:\s+[NSEW]{1,2}\b)?)";
const UNIT: &str = r"(?i:,?\s*(?:Suite|Ste|Unit|Apt|Bldg|#)\.?\s*[A-Z0-9-]+)";
const CITY: &str = r"[A-Z][A-Za-z.'-]*(?:\s+[A-Z][A-Za-z.'-]*){0,3}";

static FULL_WITH_ZIP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"\b(?P<street>{STREET})(?:{UNIT})?,?\s+(?P<city>{CITY}),\s*(?P<state>[A-Z]{{2}}),?\s+(?P<zip>\d{{5}})(?:-\d{{4}})?\b"
    ))
    .expect("valid regex")
});

static WITH_CITY_STATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"\b(?P<street>{STREET})(?:{UNIT})?,\s*(?P<city>{CITY}),\s*(?P<state>[A-Z]{{2}})\b"
    ))
    .expect("valid regex")
});

static BARE_STREET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"\b(?P<street>{STREET})")).expect("valid regex"));

static STREET_WITH_UNIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)\b(?P<street>\d{1,6}\s+(?:[A-Z0-9'.]+\s+){0,3}?[A-Z0-9'.]+)",
        r"\s*,?\s*(?:Suite|Ste|Unit|Apt|#)\.?\s*[A-Z0-9-]+",
    ))
    .expect("valid regex")
});

fn capture(caps: &regex::Captures<'_>, name: &str) -> Option<String> {
    caps.name(name)
        .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| !s.is_empty())
}

/// Find the first street address in `text`. City, state and ZIP are filled
/// in when the matching pattern carries them.
pub fn extract(text: &str) -> Option<Address> {
    for pattern in [&*FULL_WITH_ZIP, &*WITH_CITY_STATE, &*BARE_STREET, &*STREET_WITH_UNIT] {
        if let Some(caps) = pattern.captures(text) {
            let street = capture(&caps, "street")?;
            return Some(Address {
                street: Some(street.trim_end_matches(['.', ',']).to_string()),
                city: capture(&caps, "city"),
                state: capture(&caps, "state"),
                postal_code: capture(&caps, "zip"),
                country: None,
            });
        }
    }
    None
}
