//! Conversions between NMEA-style degree-minute coordinates and decimal
//! degrees.
//!
//! On the wire a coordinate reads `[-]DDDMM.mmmm`: everything up to the
//! last two digits before the decimal point is whole degrees, the rest is
//! minutes. Hemisphere letters travel as separate fields and are applied
//! by the builders, not here.

use crate::protocol::ProtocolError;

/// Convert a degree-minute token to decimal degrees.
///
/// Sign-aware: a negative-degree token subtracts the minute fraction
/// instead of adding it.
pub fn decimal_from_degree_minute(token: &str) -> Result<f64, ProtocolError> {
    if !token
        .chars()
        .all(|c| c.is_ascii_digit() || c == '-' || c == '.')
    {
        return Err(ProtocolError::Format(format!(
            "coordinate is not numeric: {token}"
        )));
    }

    let (whole, fraction) = token.split_once('.').ok_or_else(|| {
        ProtocolError::Format(format!("coordinate has no decimal point: {token}"))
    })?;

    if whole.len() < 3 {
        return Err(ProtocolError::Format(format!(
            "coordinate too short for degree-minute split: {token}"
        )));
    }

    let (degree_part, minute_part) = whole.split_at(whole.len() - 2);
    let degrees: i32 = degree_part
        .parse()
        .map_err(|_| ProtocolError::Format(format!("bad degree digits: {token}")))?;
    let minutes: f64 = format!("{minute_part}.{fraction}")
        .parse()
        .map_err(|_| ProtocolError::Format(format!("bad minute digits: {token}")))?;

    let minute_fraction = minutes / 60.0;
    if degrees >= 0 {
        Ok(f64::from(degrees) + minute_fraction)
    } else {
        Ok(f64::from(degrees) - minute_fraction)
    }
}

/// Convert decimal degrees back to a degree-minute token with four decimal
/// digits of minute precision.
///
/// Converts the absolute value; the caller applies the hemisphere letter.
/// The whole part is zero-padded to at least four digits so sub-degree
/// values keep the two minute digits the inverse split expects
/// (`0.5 -> "0030.0000"`, never `"30.0000"`). Round-trips
/// [`decimal_from_degree_minute`] to within 1e-4 degrees.
pub fn degree_minute_from_decimal(value: f64) -> String {
    let value = value.abs();
    let degrees = value.trunc();
    let minutes = (value - degrees) * 60.0;
    format!("{:09.4}", degrees * 100.0 + minutes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_positive_token() {
        let dd = decimal_from_degree_minute("3745.5000").unwrap();
        assert!((dd - 37.758_333_333).abs() < 1e-6);
    }

    #[test]
    fn converts_negative_token() {
        // Negative degrees subtract the minute fraction
        let dd = decimal_from_degree_minute("-12230.0000").unwrap();
        assert!((dd - (-122.5)).abs() < 1e-6);
    }

    #[test]
    fn rejects_missing_decimal_point() {
        assert!(matches!(
            decimal_from_degree_minute("3745"),
            Err(ProtocolError::Format(_))
        ));
    }

    #[test]
    fn rejects_non_numeric_token() {
        assert!(matches!(
            decimal_from_degree_minute("37N5.12"),
            Err(ProtocolError::Format(_))
        ));
    }

    #[test]
    fn rejects_minutes_only_token() {
        assert!(matches!(
            decimal_from_degree_minute("45.5000"),
            Err(ProtocolError::Format(_))
        ));
    }

    #[test]
    fn encodes_decimal_degrees() {
        assert_eq!(degree_minute_from_decimal(37.758_333_333), "3745.5000");
        assert_eq!(degree_minute_from_decimal(-122.5), "12230.0000");
    }

    #[test]
    fn encodes_sub_degree_values_with_padding() {
        // Values within a degree of zero still need two minute digits
        // after the split, so the whole part is zero-padded
        assert_eq!(degree_minute_from_decimal(0.5), "0030.0000");
        assert_eq!(degree_minute_from_decimal(-0.25), "0015.0000");

        let back = decimal_from_degree_minute(&degree_minute_from_decimal(0.5)).unwrap();
        assert!((back - 0.5).abs() < 1e-6);
    }

    #[test]
    fn round_trips_across_range() {
        // The coarse stride covers the full span; the fine stride walks
        // the sub-degree interval where tokens need padding
        for (start, step, end) in [(-179.9999_f64, 7.3331_f64, 180.0_f64), (-0.9999, 0.0613, 1.0)] {
            let mut v = start;
            while v < end {
                let token = degree_minute_from_decimal(v);
                let back = decimal_from_degree_minute(&token).unwrap();
                assert!(
                    (back - v.abs()).abs() < 1e-4,
                    "round trip failed for {v}: {token} -> {back}"
                );
                v += step;
            }
        }
    }
}
