pub mod avito;
pub mod cian;
pub mod rate_limit;
pub mod traits;
pub mod types;

pub use avito::AvitoAdapter;
pub use cian::CianAdapter;
pub use rate_limit::RateLimiter;
pub use traits::SourceAdapter;
pub use types::SearchFilters;

/// First run of digits in `text`, with an optional decimal part (both `,`
/// and `.` accepted as separators), parsed as a float.
///
/// Marketplace labels put numbers in free-form text ("Общая площадь:
/// 45,5 м²"), so extraction scans for the first digit run and nothing else.
pub(crate) fn first_number(text: &str) -> Option<f64> {
    let mut number = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if !c.is_ascii_digit() {
            continue;
        }
        number.push(c);
        while let Some(&next) = chars.peek() {
            if next.is_ascii_digit() {
                number.push(next);
                chars.next();
            } else if (next == ',' || next == '.') && !number.contains('.') {
                // Decimal separator only counts when digits follow.
                let mut lookahead = chars.clone();
                lookahead.next();
                if lookahead.peek().map_or(false, |d| d.is_ascii_digit()) {
                    number.push('.');
                    chars.next();
                } else {
                    break;
                }
            } else {
                break;
            }
        }
        break;
    }

    if number.is_empty() {
        None
    } else {
        number.parse().ok()
    }
}

/// First run of digits in `text`, as an integer.
pub(crate) fn first_integer(text: &str) -> Option<i64> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Last number that appears before `marker` in `text` ("… 45,5 м² …" with
/// marker "м²" gives 45.5).
pub(crate) fn number_before(text: &str, marker: &str) -> Option<f64> {
    let end = text.find(marker)?;
    let before = &text[..end];

    let mut digits: Vec<char> = Vec::new();
    for c in before.chars().rev() {
        if c.is_ascii_digit() {
            digits.push(c);
        } else if (c == ',' || c == '.') && !digits.is_empty() {
            digits.push('.');
        } else if c.is_whitespace() && digits.is_empty() {
            continue;
        } else if !digits.is_empty() {
            break;
        }
    }
    if digits.is_empty() {
        return None;
    }
    let number: String = digits.into_iter().rev().collect();
    number.trim_matches('.').parse().ok()
}

/// Every digit in `text` joined together, for prices rendered with group
/// separators ("12 500 000 ₽").
pub(crate) fn digits_only(text: &str) -> Option<f64> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

/// Numeric field that upstream APIs serialize either as a JSON number or as
/// a localized string ("45,5").
pub(crate) fn numeric_value(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    }
}

/// Coordinate pair gated on range validity.
///
/// Marketplace payloads occasionally carry swapped or corrupted
/// coordinates; a listing with no coordinates goes through geocoding,
/// while one with bogus coordinates would be persisted as-is. Only a
/// complete, in-range pair survives.
pub(crate) fn checked_coordinates(
    lat: Option<f64>,
    lon: Option<f64>,
) -> (Option<f64>, Option<f64>) {
    match (lat, lon) {
        (Some(lat), Some(lon)) if crate::models::GeoPoint::new(lat, lon).is_valid() => {
            (Some(lat), Some(lon))
        }
        _ => (None, None),
    }
}

/// Stable fallback identifier for listings whose URL carries no numeric id.
pub(crate) fn stable_hash(text: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_number_handles_both_decimal_separators() {
        assert_eq!(first_number("Общая площадь: 45,5 м²"), Some(45.5));
        assert_eq!(first_number("54.3 м²"), Some(54.3));
        assert_eq!(first_number("этаж 7 из 12"), Some(7.0));
    }

    #[test]
    fn first_number_ignores_trailing_separator_without_digits() {
        assert_eq!(first_number("12, Сочи"), Some(12.0));
        assert_eq!(first_number("без цифр"), None);
    }

    #[test]
    fn first_integer_skips_leading_text() {
        assert_eq!(first_integer("этаж 7 из 12"), Some(7));
        assert_eq!(first_integer("студия"), None);
    }

    #[test]
    fn number_before_reads_backwards_from_marker() {
        assert_eq!(number_before("2-комн. кв., 45,5 м², 7/12 этаж", "м²"), Some(45.5));
        assert_eq!(number_before("54.3 м²", "м²"), Some(54.3));
        assert_eq!(number_before("нет метки", "м²"), None);
    }

    #[test]
    fn digits_only_joins_grouped_digits() {
        assert_eq!(digits_only("12 500 000 ₽"), Some(12_500_000.0));
        assert_eq!(digits_only("цена не указана"), None);
    }

    #[test]
    fn numeric_value_accepts_numbers_and_localized_strings() {
        assert_eq!(numeric_value(&serde_json::json!(45.5)), Some(45.5));
        assert_eq!(numeric_value(&serde_json::json!("45,5")), Some(45.5));
        assert_eq!(numeric_value(&serde_json::json!("45.5")), Some(45.5));
        assert_eq!(numeric_value(&serde_json::json!(null)), None);
    }

    #[test]
    fn checked_coordinates_require_a_complete_in_range_pair() {
        assert_eq!(
            checked_coordinates(Some(43.5855), Some(39.7231)),
            (Some(43.5855), Some(39.7231))
        );
        assert_eq!(checked_coordinates(Some(95.0), Some(39.7231)), (None, None));
        assert_eq!(checked_coordinates(Some(43.5855), Some(200.0)), (None, None));
        assert_eq!(checked_coordinates(Some(43.5855), None), (None, None));
        assert_eq!(checked_coordinates(None, None), (None, None));
    }

    #[test]
    fn stable_hash_is_deterministic() {
        let url = "https://cian.ru/sale/flat/oddly-shaped-url/";
        assert_eq!(stable_hash(url), stable_hash(url));
    }
}
