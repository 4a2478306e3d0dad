use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::BillingError;

/// Fixed-width RFC 3339 UTC (`YYYY-MM-DDTHH:MM:SSZ`). All ledger timestamps
/// use this format so lexicographic comparison in SQL matches chronological
/// order.
pub fn to_utc_string(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_utc_string(s: &str) -> crate::error::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| BillingError::TimeParse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn round_trips_utc_instants() {
        let dt = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let s = to_utc_string(&dt);
        assert_eq!(s, "2024-01-01T00:00:00Z");
        assert_eq!(parse_utc_string(&s).unwrap(), dt);
    }

    #[test]
    fn string_order_matches_time_order() {
        let earlier = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 2, 1, 12, 30, 0).unwrap();
        assert!(to_utc_string(&earlier) < to_utc_string(&later));
    }

    #[test]
    fn rejects_non_rfc3339() {
        assert!(parse_utc_string("2024-01-01 00:00:00").is_err());
    }
}
