//! Timestamp utilities
//!
//! Timestamps are persisted as RFC 3339 TEXT with millisecond precision so
//! that lexical order in SQLite matches chronological order.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

use crate::{Error, Result};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current time as Unix epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Format a timestamp for storage
pub fn to_db(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp
pub fn from_db(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::InvalidInput(format!("Invalid timestamp '{}': {}", s, e)))
}

/// Format a date of birth for storage (YYYY-MM-DD)
pub fn date_to_db(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Parse a stored date of birth
pub fn date_from_db(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| Error::InvalidInput(format!("Invalid date '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_now_returns_valid_timestamp() {
        let timestamp = now();
        // After 2000-01-01 00:00:00 UTC
        assert!(timestamp.timestamp() > 946_684_800);
    }

    #[test]
    fn test_db_roundtrip_keeps_millis() {
        let ts = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let stored = to_db(&ts);
        assert_eq!(stored, "2023-11-14T22:13:20.123Z");
        assert_eq!(from_db(&stored).unwrap(), ts);
    }

    #[test]
    fn test_stored_timestamps_sort_lexically() {
        let earlier = to_db(&Utc.timestamp_millis_opt(1_000).unwrap());
        let later = to_db(&Utc.timestamp_millis_opt(2_000).unwrap());
        assert!(earlier < later);
    }

    #[test]
    fn test_date_roundtrip() {
        let dob = NaiveDate::from_ymd_opt(1990, 2, 14).unwrap();
        assert_eq!(date_to_db(&dob), "1990-02-14");
        assert_eq!(date_from_db("1990-02-14").unwrap(), dob);
    }

    #[test]
    fn test_invalid_date_rejected() {
        assert!(date_from_db("14/02/1990").is_err());
    }
}
