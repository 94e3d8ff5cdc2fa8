use std::sync::LazyLock;

use regex::Regex;

/// Hours in a full-time year, used to annualize hourly rates.
pub const HOURS_PER_YEAR: f64 = 2080.0;
/// Amounts below this are read as hourly rates.
pub const HOURLY_THRESHOLD: f64 = 100.0;

static AMOUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d[\d,]*(?:\.\d+)?)\s*([kK])?\b").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayRange {
    pub min: i32,
    pub max: i32,
}

/// Extract an annualized pay range from free text such as `"$18 - $22/hr"`
/// or `"$50k-$70k"`. Text without a usable number yields `None`.
pub fn parse(text: &str) -> Option<PayRange> {
    let tokens: Vec<(f64, bool)> = AMOUNT
        .captures_iter(text)
        .filter_map(|caps| {
            let digits = caps.get(1)?.as_str().replace(',', "");
            let value: f64 = digits.parse().ok()?;
            Some((value, caps.get(2).is_some()))
        })
        .filter(|(value, _)| *value > 0.0)
        .collect();
    if tokens.is_empty() {
        return None;
    }

    // "$50-70k": a thousands suffix on one bound applies to bare bounds too.
    let any_thousands = tokens.iter().any(|(_, k)| *k);
    let amounts: Vec<f64> = tokens
        .into_iter()
        .map(|(value, k)| {
            if k || (any_thousands && value < 1000.0) {
                value * 1000.0
            } else if value < HOURLY_THRESHOLD {
                value * HOURS_PER_YEAR
            } else {
                value
            }
        })
        .collect();

    let min = amounts.iter().copied().fold(f64::INFINITY, f64::min);
    let max = amounts.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some(PayRange {
        min: to_whole(min),
        max: to_whole(max),
    })
}

fn to_whole(value: f64) -> i32 {
    value.round().clamp(0.0, i32::MAX as f64) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_token_sets_both_bounds() {
        assert_eq!(parse("$65,000 per year"), Some(PayRange { min: 65000, max: 65000 }));
    }

    #[test]
    fn range_takes_min_and_max() {
        assert_eq!(
            parse("Salary: $72,500 to $58,000"),
            Some(PayRange { min: 58000, max: 72500 })
        );
    }

    #[test]
    fn hourly_rates_are_annualized() {
        assert_eq!(parse("$18 - $22/hr"), Some(PayRange { min: 37440, max: 45760 }));
        assert_eq!(parse("$17.50 an hour"), Some(PayRange { min: 36400, max: 36400 }));
    }

    #[test]
    fn thousands_suffix() {
        assert_eq!(parse("$50k-$70k"), Some(PayRange { min: 50000, max: 70000 }));
        assert_eq!(parse("$50-70K DOE"), Some(PayRange { min: 50000, max: 70000 }));
    }

    #[test]
    fn no_numbers_means_no_pay() {
        assert_eq!(parse("Competitive"), None);
        assert_eq!(parse(""), None);
        assert_eq!(parse("$0"), None);
    }
}
