//! Reconciliation of the two clock sources attached to every inbound
//! message: the device's own GPS timecode (time-of-day only) and the
//! network's transmit timestamp (full date, no century).
//!
//! Both are UTC. The device reads its fix before transmitting, so the fix
//! must never be later than the transmit time. Skew between the two can
//! still be large (satellite connectivity, firmware stalls) and is worth
//! watching as a diagnostic, but it never changes the ordering.

use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, Utc};
use percent_encoding::percent_decode_str;

use crate::protocol::ProtocolError;

/// Build a full fix timestamp from a device timecode (`HHMMSS.ssss`) by
/// borrowing the calendar date from the transmit timestamp.
///
/// A fix taken just before midnight can be relayed just after it, in which
/// case the time-of-day comparison detects the rollover and the date is
/// backed up one calendar day. If the fix is still later than the transmit
/// time after that adjustment the input is corrupt and the conversion
/// fails with [`ProtocolError::Causality`] rather than silently proceeding.
pub fn reconcile_fix_time(
    timecode: &str,
    transmit: DateTime<Utc>,
) -> Result<DateTime<Utc>, ProtocolError> {
    let (hms, fraction) = timecode.split_once('.').unwrap_or((timecode, "0"));
    if hms.len() < 6 || !hms.chars().all(|c| c.is_ascii_digit()) {
        return Err(ProtocolError::Format(format!(
            "timecode is not HHMMSS.ssss: {timecode}"
        )));
    }

    let hour: u32 = hms[0..2]
        .parse()
        .map_err(|_| ProtocolError::Format(format!("bad hour in timecode: {timecode}")))?;
    let minute: u32 = hms[2..4]
        .parse()
        .map_err(|_| ProtocolError::Format(format!("bad minute in timecode: {timecode}")))?;
    let second: u32 = hms[4..]
        .parse()
        .map_err(|_| ProtocolError::Format(format!("bad second in timecode: {timecode}")))?;
    let micros = (format!("0.{fraction}")
        .parse::<f64>()
        .map_err(|_| ProtocolError::Format(format!("bad fraction in timecode: {timecode}")))?
        * 1_000_000.0) as u32;

    let fix_time = NaiveTime::from_hms_micro_opt(hour, minute, second, micros).ok_or_else(
        || ProtocolError::Format(format!("timecode out of range: {timecode}")),
    )?;

    // The transmit stamp only carries whole seconds, so the rollover
    // comparison is done at second resolution. A fix whose sub-second
    // fraction alone puts it past the transmit instant is not a midnight
    // rollover, it is corrupt input, and falls through to the causality
    // check below.
    let transmit_naive = transmit.naive_utc();
    let fix_whole_seconds = NaiveTime::from_hms_opt(hour, minute, second)
        .ok_or_else(|| ProtocolError::Format(format!("timecode out of range: {timecode}")))?;
    let fix_date = if fix_whole_seconds > transmit_naive.time() {
        transmit_naive.date() - Duration::days(1)
    } else {
        transmit_naive.date()
    };

    let fix = DateTime::<Utc>::from_naive_utc_and_offset(fix_date.and_time(fix_time), Utc);
    if fix > transmit {
        return Err(ProtocolError::Causality { fix, transmit });
    }
    Ok(fix)
}

/// Parse a network transmit timestamp (`YY-MM-DD HH:MM:SS`, century
/// omitted) into a UTC datetime.
///
/// Observed payloads arrive percent-encoded twice, so the token is decoded
/// twice before parsing. Decoding is idempotent for plain input.
pub fn parse_transmit_timestamp(token: &str) -> Result<DateTime<Utc>, ProtocolError> {
    let once = percent_decode_str(token)
        .decode_utf8()
        .map_err(|e| ProtocolError::Format(format!("bad encoding in transmit time: {e}")))?
        .into_owned();
    let twice = percent_decode_str(&once)
        .decode_utf8()
        .map_err(|e| ProtocolError::Format(format!("bad encoding in transmit time: {e}")))?
        .into_owned();

    let naive = NaiveDateTime::parse_from_str(&format!("20{twice}"), "%Y-%m-%d %H:%M:%S")
        .map_err(|e| ProtocolError::Format(format!("bad transmit time {token:?}: {e}")))?;
    Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}
