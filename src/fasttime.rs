//! Conversion between upstream dotted timestamps ("1645095505.023899") and
//! the numeric identity keys stored in the database.
//!
//! The key is the timestamp with the dot removed, so keys compare and sort
//! exactly like the source strings as long as the fractional part keeps its
//! width (upstream always emits six digits).

use chrono::{DateTime, TimeZone, Utc};

use crate::store::Error;

/// Converts a dotted timestamp to its numeric identity key.
pub fn ts_to_id(ts: &str) -> Result<i64, Error> {
    if ts.is_empty() {
        return Err(Error::BadTimestamp(ts.to_string()));
    }
    let mut buf = String::with_capacity(ts.len());
    let mut seen_dot = false;
    for c in ts.chars() {
        match c {
            '0'..='9' => buf.push(c),
            '.' if !seen_dot => seen_dot = true,
            _ => return Err(Error::BadTimestamp(ts.to_string())),
        }
    }
    buf.parse::<i64>()
        .map_err(|_| Error::BadTimestamp(ts.to_string()))
}

/// Formats an identity key back into the canonical six-digit dotted form.
pub fn id_to_ts(id: i64) -> String {
    format!("{}.{:06}", id / 1_000_000, id % 1_000_000)
}

/// Interprets an identity key as microseconds since the epoch.
pub fn id_to_time(id: i64) -> DateTime<Utc> {
    Utc.timestamp_micros(id).single().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_full_precision_timestamps() {
        assert_eq!(ts_to_id("1645095505.023899").unwrap(), 1645095505023899);
        assert_eq!(id_to_ts(1645095505023899), "1645095505.023899");
    }

    #[test]
    fn converts_short_timestamps() {
        assert_eq!(ts_to_id("123.456").unwrap(), 123456);
        assert_eq!(ts_to_id("1234567890").unwrap(), 1234567890);
    }

    #[test]
    fn rejects_garbage() {
        assert!(ts_to_id("").is_err());
        assert!(ts_to_id("12a.456").is_err());
        assert!(ts_to_id("1.2.3").is_err());
        assert!(ts_to_id("-15.00").is_err());
    }

    #[test]
    fn key_to_time() {
        let t = id_to_time(1645095505023899);
        assert_eq!(t.timestamp(), 1645095505);
        assert_eq!(t.timestamp_subsec_micros(), 23899);
    }
}
