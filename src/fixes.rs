//! Location fix records and their builders, one per fix-bearing packet
//! type.
//!
//! Builders consume a decoded payload plus its raw envelope and produce an
//! immutable record. Required-field failures propagate to the dispatcher,
//! which records a parsing error and aborts that message's pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::clock::{parse_transmit_timestamp, reconcile_fix_time};
use crate::coords::decimal_from_degree_minute;
use crate::messages::RawMessage;
use crate::protocol::{DecodedPayload, ProtocolError};

/// 4D location fix with battery and status flags (packet type PK001).
///
/// Example wire form: `PK001;lat:3765.7897,NS:N,lon:12223.46653,EW:W,utc:193454.1230,sta:0`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pk001Fix {
    pub id: Uuid,
    /// Raw message this fix was derived from
    pub raw_message_id: Uuid,
    /// Transmit time as recorded by the satellite network
    pub transmit_time: DateTime<Utc>,
    /// Position estimate of the relaying satellite
    pub network_latitude: f64,
    pub network_longitude: f64,
    pub network_cep: f64,
    /// Device fix timestamp reconciled against the transmit time
    pub fix_time: DateTime<Utc>,
    /// Decimal degrees, negated for southern/western hemispheres
    pub latitude: f64,
    pub longitude: f64,
    /// Hemisphere indicators exactly as received
    pub ns: String,
    pub ew: String,
    /// Raw battery voltage, uncalibrated
    pub battery_volts: f64,
    pub course_deg: f64,
    pub speed_knots: f64,
    pub status_flags: i32,
}

impl Pk001Fix {
    /// Build a fix from a decoded PK001 payload.
    ///
    /// Required: lat, NS, lon, EW, utc, sta. Battery, course, and speed are
    /// optional; a missing or malformed value defaults to zero rather than
    /// aborting the message. Lenient on purpose, matching the fielded
    /// firmware, but a data-quality risk worth keeping in mind.
    pub fn from_payload(raw: &RawMessage, payload: &DecodedPayload) -> Result<Self, ProtocolError> {
        let fields = payload.keyed_fields()?;
        let required = |key: &'static str| -> Result<&str, ProtocolError> {
            fields.get(key).copied().ok_or(ProtocolError::MissingField(key))
        };

        let transmit_time = parse_transmit_timestamp(&raw.transmit_time)?;
        let network_latitude = parse_network_coord(&raw.network_latitude)?;
        let network_longitude = parse_network_coord(&raw.network_longitude)?;
        let network_cep = parse_network_coord(&raw.network_cep)?;

        let fix_time = reconcile_fix_time(required("utc")?, transmit_time)?;

        let ns = required("NS")?.to_string();
        let mut latitude = decimal_from_degree_minute(required("lat")?)?;
        if ns.eq_ignore_ascii_case("S") {
            latitude = -latitude;
        }

        let ew = required("EW")?.to_string();
        let mut longitude = decimal_from_degree_minute(required("lon")?)?;
        if ew.eq_ignore_ascii_case("W") {
            longitude = -longitude;
        }

        let status_flags: i32 = required("sta")?
            .parse()
            .map_err(|_| ProtocolError::Format("bad status flags field".to_string()))?;

        Ok(Self {
            id: Uuid::now_v7(),
            raw_message_id: raw.id,
            transmit_time,
            network_latitude,
            network_longitude,
            network_cep,
            fix_time,
            latitude,
            longitude,
            ns,
            ew,
            battery_volts: lenient_f64(fields.get("batt").copied()),
            course_deg: lenient_f64(fields.get("cog").copied()),
            speed_knots: lenient_f64(fields.get("sog").copied()),
            status_flags,
        })
    }
}

/// Position and velocity fix (packet type PK004). Fields are positional.
///
/// Example wire form: `PK004;3765.7897,N,12223.46653,W,2,18.3,193454.123`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pk004Fix {
    pub id: Uuid,
    pub raw_message_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub ns: String,
    pub ew: String,
    pub speed_knots: f64,
    pub course_deg: f64,
    /// Device fix time, or the network transmit time when the device
    /// timecode could not be reconciled
    pub fix_time: DateTime<Utc>,
}

impl Pk004Fix {
    /// Build a fix from a decoded PK004 payload.
    ///
    /// All positional fields are required. The device timecode is the one
    /// exception: if reconciliation fails the network transmit timestamp is
    /// used instead of aborting, since the position itself is still good.
    pub fn from_payload(raw: &RawMessage, payload: &DecodedPayload) -> Result<Self, ProtocolError> {
        let transmit_time = parse_transmit_timestamp(&raw.transmit_time)?;

        let fix_time = match reconcile_fix_time(payload.positional(6, "utc")?, transmit_time) {
            Ok(t) => t,
            Err(e) => {
                warn!(
                    raw_message_id = %raw.id,
                    error = %e,
                    "could not reconcile device timecode, falling back to transmit time"
                );
                transmit_time
            }
        };

        let ns = payload.positional(1, "NS")?.to_string();
        let mut latitude = decimal_from_degree_minute(payload.positional(0, "lat")?)?;
        if ns.eq_ignore_ascii_case("S") {
            latitude = -latitude;
        }

        let ew = payload.positional(3, "EW")?.to_string();
        let mut longitude = decimal_from_degree_minute(payload.positional(2, "lon")?)?;
        if ew.eq_ignore_ascii_case("W") {
            longitude = -longitude;
        }

        let speed_knots: f64 = payload
            .positional(4, "sog")?
            .parse()
            .map_err(|_| ProtocolError::Format("bad speed field".to_string()))?;
        let course_deg: f64 = payload
            .positional(5, "cog")?
            .parse()
            .map_err(|_| ProtocolError::Format("bad course field".to_string()))?;

        Ok(Self {
            id: Uuid::now_v7(),
            raw_message_id: raw.id,
            latitude,
            longitude,
            ns,
            ew,
            speed_knots,
            course_deg,
            fix_time,
        })
    }
}

fn parse_network_coord(value: &str) -> Result<f64, ProtocolError> {
    value
        .parse()
        .map_err(|_| ProtocolError::Format(format!("bad network coordinate: {value}")))
}

fn lenient_f64(value: Option<&str>) -> f64 {
    value.and_then(|v| v.parse().ok()).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode_payload;
    use chrono::TimeZone;

    fn raw_with_data(text: &str) -> RawMessage {
        RawMessage {
            id: Uuid::now_v7(),
            imei: "300434063836590".to_string(),
            network_device_type: "SATMODEM".to_string(),
            serial: "123456".to_string(),
            momsn: 441,
            transmit_time: "20-03-15 22:12:51".to_string(),
            network_latitude: "37.7740".to_string(),
            network_longitude: "-122.4050".to_string(),
            network_cep: "2.0".to_string(),
            session_status: "0".to_string(),
            data: hex::encode(text.as_bytes()),
            modem_id: None,
            received_at: Utc::now(),
        }
    }

    #[test]
    fn builds_pk001_from_keyed_fields() {
        let raw = raw_with_data(
            "PK001;lat:3745.5000,NS:N,lon:12230.0000,EW:W,utc:193454.1230,sta:3,batt:3.2",
        );
        let payload = decode_payload(&raw.data).unwrap();
        let fix = Pk001Fix::from_payload(&raw, &payload).unwrap();

        assert!((fix.latitude - 37.758_333).abs() < 1e-4);
        assert!((fix.longitude - (-122.5)).abs() < 1e-4);
        assert_eq!(fix.ns, "N");
        assert_eq!(fix.ew, "W");
        assert_eq!(fix.status_flags, 3);
        assert!((fix.battery_volts - 3.2).abs() < 1e-9);
        assert_eq!(
            fix.transmit_time,
            Utc.with_ymd_and_hms(2020, 3, 15, 22, 12, 51).unwrap()
        );
        assert_eq!(fix.fix_time.format("%H%M%S").to_string(), "193454");
    }

    #[test]
    fn pk001_missing_required_field_aborts() {
        let raw = raw_with_data("PK001;lat:3745.5000,NS:N,EW:W,utc:193454.1230");
        let payload = decode_payload(&raw.data).unwrap();
        let err = Pk001Fix::from_payload(&raw, &payload).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField("lon")));
    }

    #[test]
    fn pk001_malformed_optional_field_defaults_to_zero() {
        let raw = raw_with_data(
            "PK001;lat:3745.5000,NS:N,lon:12230.0000,EW:W,utc:193454.1230,sta:0,batt:x9",
        );
        let payload = decode_payload(&raw.data).unwrap();
        let fix = Pk001Fix::from_payload(&raw, &payload).unwrap();
        assert_eq!(fix.battery_volts, 0.0);
        assert_eq!(fix.course_deg, 0.0);
    }

    #[test]
    fn builds_pk004_from_positional_fields() {
        let raw = raw_with_data("PK004;3745.5000,N,12230.0000,W,2,18.3,193454.123");
        let payload = decode_payload(&raw.data).unwrap();
        let fix = Pk004Fix::from_payload(&raw, &payload).unwrap();

        assert!((fix.latitude - 37.758_333).abs() < 1e-4);
        assert!((fix.speed_knots - 2.0).abs() < 1e-9);
        assert!((fix.course_deg - 18.3).abs() < 1e-9);
        assert_eq!(fix.fix_time.format("%H%M%S").to_string(), "193454");
    }

    #[test]
    fn pk004_falls_back_to_transmit_time() {
        // Unparseable timecode: position still built, time from the network
        let raw = raw_with_data("PK004;3745.5000,N,12230.0000,W,2,18.3,garbage");
        let payload = decode_payload(&raw.data).unwrap();
        let fix = Pk004Fix::from_payload(&raw, &payload).unwrap();
        assert_eq!(
            fix.fix_time,
            Utc.with_ymd_and_hms(2020, 3, 15, 22, 12, 51).unwrap()
        );
    }

    #[test]
    fn pk004_malformed_required_field_aborts() {
        let raw = raw_with_data("PK004;3745.5000,N,12230.0000,W,fast,18.3,193454.123");
        let payload = decode_payload(&raw.data).unwrap();
        assert!(matches!(
            Pk004Fix::from_payload(&raw, &payload),
            Err(ProtocolError::Format(_))
        ));
    }
}
