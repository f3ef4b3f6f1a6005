use chrono::{NaiveDate, NaiveDateTime};

/// Date formats accepted across collections, tried in order.
///
/// `DD/MM/YYYY` is tried before `MM/DD/YYYY`, so an ambiguous string like
/// `02/03/2024` parses as 2 March 2024.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y", "%B %d, %Y", "%d %B %Y"];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S"];

/// Parse a date in any of the supported collection formats.
///
/// Returns `None` for empty or unrecognized input; never errors.
pub fn parse_flexible_date(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Absolute difference between two parsed dates in seconds, when both parse.
pub fn seconds_between(a: &str, b: &str) -> Option<i64> {
    let date_a = parse_flexible_date(a)?;
    let date_b = parse_flexible_date(b)?;
    Some((date_a - date_b).num_seconds().abs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_formats() {
        for raw in [
            "2024-01-15",
            "15/01/2024",
            "2024-01-15 14:30:00",
            "15-01-2024",
            "January 15, 2024",
            "15 January 2024",
        ] {
            let parsed = parse_flexible_date(raw).unwrap_or_else(|| panic!("failed: {raw}"));
            assert_eq!(parsed.date().to_string(), "2024-01-15");
        }
    }

    #[test]
    fn ambiguous_dates_resolve_day_first() {
        let parsed = parse_flexible_date("02/03/2024").unwrap();
        assert_eq!(parsed.date().to_string(), "2024-03-02");
    }

    #[test]
    fn month_first_is_a_fallback() {
        // 13 cannot be a month, so the MDY attempt never fires here; a
        // day-of-month over 12 in the second position forces MDY.
        let parsed = parse_flexible_date("01/13/2024").unwrap();
        assert_eq!(parsed.date().to_string(), "2024-01-13");
    }

    #[test]
    fn rejects_unparseable_input() {
        assert!(parse_flexible_date("").is_none());
        assert!(parse_flexible_date("not a date").is_none());
        assert!(parse_flexible_date("99/99/9999").is_none());
    }

    #[test]
    fn seconds_between_same_day_is_zero() {
        assert_eq!(seconds_between("2024-01-15", "15/01/2024"), Some(0));
        assert!(seconds_between("2024-01-15", "garbage").is_none());
    }
}
