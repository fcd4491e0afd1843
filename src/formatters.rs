//! Per-destination formatting: a two-level dispatch table keyed by
//! (message type, endpoint type), each entry a function from a stored
//! record id to the exact bytes that destination expects.
//!
//! A missing table entry for an otherwise-valid route is an operational
//! gap in the route configuration, not a crash condition: the lookup
//! returns `None` and the dispatcher logs it.

use anyhow::{Context, Result};
use tracing::warn;
use uuid::Uuid;

use crate::commands::{BEACON_COMMAND, INTERVAL_COMMAND};
use crate::coords::degree_minute_from_decimal;
use crate::endpoints::OutboundPayload;
use crate::protocol::{encode_modem_command, encode_modem_payload};
use crate::routing::{EndpointKind, RouteMessageType};
use crate::store::RelayStore;

/// Look up and run the formatter for (message type, endpoint type).
///
/// `Ok(None)` means no formatter is registered for the pair; the message
/// record itself being missing is an error.
pub async fn format_for(
    store: &dyn RelayStore,
    msg_type: RouteMessageType,
    endpoint: EndpointKind,
    message_id: Uuid,
) -> Result<Option<OutboundPayload>> {
    use EndpointKind::*;
    use RouteMessageType::*;

    match (msg_type, endpoint) {
        (Pk001, Queue) => pk001_to_queue(store, message_id).await.map(Some),
        (Pk001, Handset) => pk001_to_modem(store, message_id).await.map(Some),
        (Pk001, Legacy) => pk001_to_legacy(store, message_id).await.map(Some),
        (Pk004, Handset) => pk004_to_modem(store, message_id).await.map(Some),
        (Command, Buoy) => command_to_modem(store, message_id).await,
        _ => {
            warn!(
                msg_type = %msg_type,
                endpoint = %endpoint,
                "no formatter registered for this message/endpoint pair"
            );
            Ok(None)
        }
    }
}

/// Queue destinations receive the original network envelope as JSON, not
/// the decoded fix.
async fn pk001_to_queue(store: &dyn RelayStore, message_id: Uuid) -> Result<OutboundPayload> {
    let fix = store
        .pk001(message_id)
        .await?
        .with_context(|| format!("PK001 record {message_id} not found"))?;
    let raw = store
        .raw_message(fix.raw_message_id)
        .await?
        .with_context(|| format!("raw message {} not found", fix.raw_message_id))?;

    let body = serde_json::to_string(&raw.wire_envelope()).context("serializing envelope")?;
    Ok(OutboundPayload::Text(body))
}

/// Re-encode a decoded 4D fix into the compact wire format a handset's
/// modem expects. The device-facing tag is PK004, not the inbound PK001,
/// and the time-of-day field is fixed-width: six zero-padded digits plus
/// `.0000`.
async fn pk001_to_modem(store: &dyn RelayStore, message_id: Uuid) -> Result<OutboundPayload> {
    let fix = store
        .pk001(message_id)
        .await?
        .with_context(|| format!("PK001 record {message_id} not found"))?;

    let lat = degree_minute_from_decimal(fix.latitude);
    let lon = degree_minute_from_decimal(fix.longitude);
    let utc = format!("{}.0000", fix.fix_time.format("%H%M%S"));
    let packet = format!(
        "PK004,{lat},{ns},{lon},{ew},{sog},{cog},{utc},{sta}",
        ns = fix.ns,
        ew = fix.ew,
        sog = fix.speed_knots,
        cog = fix.course_deg,
        sta = fix.status_flags,
    );
    Ok(OutboundPayload::Hex(encode_modem_payload(&packet)))
}

/// Plain-text rendering for the legacy messenger's screen.
async fn pk001_to_legacy(store: &dyn RelayStore, message_id: Uuid) -> Result<OutboundPayload> {
    let fix = store
        .pk001(message_id)
        .await?
        .with_context(|| format!("PK001 record {message_id} not found"))?;

    let text = format!(
        "{}: {:.6} {}, {:.6} {}",
        fix.fix_time.format("%Y-%m-%d %H:%M:%S"),
        fix.latitude,
        fix.ns,
        fix.longitude,
        fix.ew,
    );
    Ok(OutboundPayload::Text(text))
}

/// Forward a position/velocity fix to a handset by replaying the original
/// wire envelope, re-framed for the receiving modem.
async fn pk004_to_modem(store: &dyn RelayStore, message_id: Uuid) -> Result<OutboundPayload> {
    let fix = store
        .pk004(message_id)
        .await?
        .with_context(|| format!("PK004 record {message_id} not found"))?;
    let raw = store
        .raw_message(fix.raw_message_id)
        .await?
        .with_context(|| format!("raw message {} not found", fix.raw_message_id))?;

    let bytes = hex::decode(raw.data.trim())
        .with_context(|| format!("raw message {} payload is not hex", raw.id))?;
    let text = String::from_utf8(bytes)
        .with_context(|| format!("raw message {} payload is not ASCII", raw.id))?;
    Ok(OutboundPayload::Hex(encode_modem_payload(&text)))
}

/// Encode a device command for the target modem. An unrecognized command
/// or value is a configuration gap, logged and skipped.
async fn command_to_modem(
    store: &dyn RelayStore,
    message_id: Uuid,
) -> Result<Option<OutboundPayload>> {
    let command = store
        .command(message_id)
        .await?
        .with_context(|| format!("command record {message_id} not found"))?;

    let encoded = match command.command.as_str() {
        BEACON_COMMAND => match command.value.to_ascii_uppercase().as_str() {
            "ON" | "1" => Some(encode_modem_command(BEACON_COMMAND, "1")),
            "OFF" | "0" => Some(encode_modem_command(BEACON_COMMAND, "0")),
            other => {
                warn!(command_id = %command.id, value = other, "unencodable beacon value");
                None
            }
        },
        INTERVAL_COMMAND => match command.value.trim().parse::<i64>() {
            Ok(minutes) => Some(encode_modem_command(INTERVAL_COMMAND, &minutes.to_string())),
            Err(_) => {
                warn!(
                    command_id = %command.id,
                    value = %command.value,
                    "unencodable interval value"
                );
                None
            }
        },
        other => {
            warn!(command_id = %command.id, command = other, "unknown command tag");
            None
        }
    };

    Ok(encoded.map(OutboundPayload::Hex))
}
