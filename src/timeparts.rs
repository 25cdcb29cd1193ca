use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};

use crate::error::EtlError;

/// Calendar breakdown of one epoch-millisecond instant, in UTC.
///
/// `start_time` keeps the canonical instant at millisecond precision; the
/// derived fields are what the time dimension and the fact table's
/// partition columns are built from. `weekday` is numeric with 0 = Sunday
/// through 6 = Saturday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeParts {
    pub start_time: i64,
    pub hour: i32,
    pub day: i32,
    pub week: i32,
    pub month: i32,
    pub year: i32,
    pub weekday: i32,
}

/// Derives the calendar breakdown for an epoch-ms timestamp.
///
/// Pure and total over the valid domain; negative values and values chrono
/// cannot map to a UTC instant fail with `InvalidTimestamp`. Inputs are
/// integral milliseconds, so there is no sub-millisecond precision to
/// truncate and the instant round-trips exactly.
pub fn derive(ts_ms: i64) -> Result<TimeParts, EtlError> {
    if ts_ms < 0 {
        return Err(EtlError::InvalidTimestamp(ts_ms));
    }
    let dt: DateTime<Utc> = Utc
        .timestamp_millis_opt(ts_ms)
        .single()
        .ok_or(EtlError::InvalidTimestamp(ts_ms))?;

    Ok(TimeParts {
        start_time: ts_ms,
        hour: dt.hour() as i32,
        day: dt.day() as i32,
        week: dt.iso_week().week() as i32,
        month: dt.month() as i32,
        year: dt.year(),
        weekday: dt.weekday().num_days_from_sunday() as i32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_known_instant() {
        // 2000-01-01T00:00:00Z, a Saturday.
        let parts = derive(946684800000).unwrap();
        assert_eq!(parts.year, 2000);
        assert_eq!(parts.month, 1);
        assert_eq!(parts.day, 1);
        assert_eq!(parts.hour, 0);
        assert_eq!(parts.week, 52); // ISO week 52 of 1999
        assert_eq!(parts.weekday, 6);
    }

    #[test]
    fn weekday_zero_is_sunday() {
        // 2018-11-04T12:30:00Z was a Sunday.
        let parts = derive(1541334600000).unwrap();
        assert_eq!(parts.weekday, 0);
        // The following Monday.
        let parts = derive(1541334600000 + 86_400_000).unwrap();
        assert_eq!(parts.weekday, 1);
    }

    #[test]
    fn round_trips_at_millisecond_precision() {
        for ts in [0i64, 1, 999, 946684800000, 1541334600123, 4102444799999] {
            let parts = derive(ts).unwrap();
            assert_eq!(parts.start_time, ts);
            // Reconstructing the instant from the canonical value is exact.
            let dt = Utc.timestamp_millis_opt(parts.start_time).single().unwrap();
            assert_eq!(dt.timestamp_millis(), ts);
            assert_eq!(dt.year(), parts.year);
            assert_eq!(dt.month() as i32, parts.month);
            assert_eq!(dt.day() as i32, parts.day);
            assert_eq!(dt.hour() as i32, parts.hour);
        }
    }

    #[test]
    fn field_ranges_hold_across_a_sweep() {
        // Step a prime number of seconds across several years.
        let mut ts = 946684800000i64;
        while ts < 1104537600000 {
            let parts = derive(ts).unwrap();
            assert!((0..=23).contains(&parts.hour));
            assert!((1..=31).contains(&parts.day));
            assert!((1..=53).contains(&parts.week));
            assert!((1..=12).contains(&parts.month));
            assert!((0..=6).contains(&parts.weekday));
            ts += 997_003;
        }
    }

    #[test]
    fn negative_epoch_is_invalid() {
        assert!(matches!(derive(-1), Err(EtlError::InvalidTimestamp(-1))));
    }
}
