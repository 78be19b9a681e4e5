//! Input validation for ingestion batches.
//!
//! Batch-level checks (subject id, batch size) return [`Error::InvalidInput`]
//! and reject the whole request. Point-level checks return
//! [`Error::Validation`] and only reject the offending point.

use chrono::{DateTime, Duration, Utc};

use crate::defaults::{
    CLOCK_SKEW_TOLERANCE_SECS, MAX_ACCURACY_M, SUBJECT_ID_MAX_LEN, SUBJECT_ID_MIN_LEN,
};
use crate::models::{LocationSource, RawPoint};
use crate::{Error, Result};

/// Validate and normalize a subject id, returning the trimmed value.
pub fn validate_subject_id(subject_id: &str) -> Result<&str> {
    let trimmed = subject_id.trim();
    let len = trimmed.chars().count();
    if !(SUBJECT_ID_MIN_LEN..=SUBJECT_ID_MAX_LEN).contains(&len) {
        return Err(Error::InvalidInput(format!(
            "subject_id must be {}-{} characters, got {}",
            SUBJECT_ID_MIN_LEN, SUBJECT_ID_MAX_LEN, len
        )));
    }
    Ok(trimmed)
}

/// Reject batches larger than the configured maximum.
pub fn validate_batch_size(len: usize, max: usize) -> Result<()> {
    if len > max {
        return Err(Error::InvalidInput(format!(
            "batch of {} points exceeds maximum of {}",
            len, max
        )));
    }
    Ok(())
}

pub fn validate_coordinates(latitude: f64, longitude: f64) -> Result<()> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(Error::Validation(format!(
            "latitude {} outside [-90, 90]",
            latitude
        )));
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(Error::Validation(format!(
            "longitude {} outside [-180, 180]",
            longitude
        )));
    }
    Ok(())
}

pub fn validate_accuracy(accuracy: f64) -> Result<()> {
    if !accuracy.is_finite() || accuracy < 0.0 || accuracy > MAX_ACCURACY_M {
        return Err(Error::Validation(format!(
            "accuracy {} outside [0, {}]",
            accuracy, MAX_ACCURACY_M
        )));
    }
    Ok(())
}

/// Timestamps may trail arbitrarily (pre-1970 included) but may not lead `now`
/// by more than the skew tolerance. Only the zero value itself is rejected.
pub fn validate_timestamp(ts: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
    // A zeroed wire timestamp decodes to exactly the epoch and means "unset"
    if ts.timestamp() == 0 && ts.timestamp_subsec_nanos() == 0 {
        return Err(Error::Validation("timestamp is the zero value".into()));
    }
    if ts > now + Duration::seconds(CLOCK_SKEW_TOLERANCE_SECS) {
        return Err(Error::Validation(format!(
            "timestamp {} is in the future",
            ts.to_rfc3339()
        )));
    }
    Ok(())
}

/// Validate a single raw point, returning its decoded source on success.
pub fn validate_point(point: &RawPoint, now: DateTime<Utc>) -> Result<LocationSource> {
    validate_coordinates(point.latitude, point.longitude)?;
    validate_accuracy(point.accuracy)?;
    if let Some(ts) = point.timestamp {
        validate_timestamp(ts, now)?;
    }
    for (name, value) in [
        ("altitude", point.altitude),
        ("speed", point.speed),
        ("bearing", point.bearing),
    ] {
        if value.is_some_and(|v| !v.is_finite()) {
            return Err(Error::Validation(format!("{} must be finite", name)));
        }
    }
    if point.speed.is_some_and(|s| s < 0.0) {
        return Err(Error::Validation("speed must be non-negative".into()));
    }
    if point.bearing.is_some_and(|b| !(0.0..=360.0).contains(&b)) {
        return Err(Error::Validation("bearing outside [0, 360]".into()));
    }
    LocationSource::from_code(point.source)
        .ok_or_else(|| Error::Validation(format!("unknown source {}", point.source)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lat: f64, lon: f64, accuracy: f64) -> RawPoint {
        RawPoint {
            latitude: lat,
            longitude: lon,
            accuracy,
            ..Default::default()
        }
    }

    #[test]
    fn test_subject_id_trimmed() {
        assert_eq!(validate_subject_id("  device-1 ").unwrap(), "device-1");
    }

    #[test]
    fn test_subject_id_too_short() {
        assert!(matches!(
            validate_subject_id("ab"),
            Err(Error::InvalidInput(_))
        ));
        assert!(validate_subject_id("   ").is_err());
    }

    #[test]
    fn test_subject_id_too_long() {
        let long = "x".repeat(41);
        assert!(validate_subject_id(&long).is_err());
        assert!(validate_subject_id(&"x".repeat(40)).is_ok());
    }

    #[test]
    fn test_batch_size_limit() {
        assert!(validate_batch_size(1000, 1000).is_ok());
        assert!(matches!(
            validate_batch_size(1001, 1000),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_coordinates_bounds() {
        assert!(validate_coordinates(90.0, 180.0).is_ok());
        assert!(validate_coordinates(-90.0, -180.0).is_ok());
        assert!(validate_coordinates(90.01, 0.0).is_err());
        assert!(validate_coordinates(0.0, -180.5).is_err());
        assert!(validate_coordinates(f64::NAN, 0.0).is_err());
        assert!(validate_coordinates(0.0, f64::INFINITY).is_err());
    }

    #[test]
    fn test_accuracy_bounds() {
        assert!(validate_accuracy(0.0).is_ok());
        assert!(validate_accuracy(10_000.0).is_ok());
        assert!(validate_accuracy(-1.0).is_err());
        assert!(validate_accuracy(10_000.1).is_err());
        assert!(validate_accuracy(f64::NAN).is_err());
    }

    #[test]
    fn test_timestamp_future_skew() {
        let now = Utc::now();
        assert!(validate_timestamp(now + Duration::seconds(299), now).is_ok());
        assert!(validate_timestamp(now + Duration::seconds(301), now).is_err());
        assert!(validate_timestamp(now - Duration::days(30), now).is_ok());
    }

    #[test]
    fn test_timestamp_zero_value_rejected() {
        let epoch = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        assert!(validate_timestamp(epoch, Utc::now()).is_err());
    }

    #[test]
    fn test_timestamp_near_epoch_accepted() {
        let now = Utc::now();
        let before = DateTime::<Utc>::from_timestamp(-1, 0).unwrap();
        let after = DateTime::<Utc>::from_timestamp(0, 1_000_000).unwrap();
        assert!(validate_timestamp(before, now).is_ok());
        assert!(validate_timestamp(after, now).is_ok());
    }

    #[test]
    fn test_point_valid_returns_source() {
        let mut p = point(52.52, 13.405, 12.0);
        p.source = 1;
        assert_eq!(
            validate_point(&p, Utc::now()).unwrap(),
            LocationSource::Network
        );
    }

    #[test]
    fn test_point_unknown_source() {
        let mut p = point(52.52, 13.405, 12.0);
        p.source = 7;
        assert!(matches!(
            validate_point(&p, Utc::now()),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_point_non_finite_optional_fields() {
        let mut p = point(1.0, 1.0, 5.0);
        p.altitude = Some(f64::NAN);
        assert!(validate_point(&p, Utc::now()).is_err());

        let mut p = point(1.0, 1.0, 5.0);
        p.bearing = Some(361.0);
        assert!(validate_point(&p, Utc::now()).is_err());

        let mut p = point(1.0, 1.0, 5.0);
        p.speed = Some(-2.0);
        assert!(validate_point(&p, Utc::now()).is_err());
    }
}
