//! Device command records and the command-decoding builders.
//!
//! Commands originate from handset (or legacy messenger) packets and are
//! destined for a device, typically a buoy. The record keeps the wire
//! command tag, not a friendly name, so formatting for the modem is a
//! straight re-encode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::messages::{DeviceType, RawMessage};
use crate::protocol::{DecodedPayload, ProtocolError};

/// Wire tag of the beacon toggle command
pub const BEACON_COMMAND: &str = "PK005";
/// Wire tag of the update-interval command
pub const INTERVAL_COMMAND: &str = "PK006";

/// A control instruction destined for a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandMessage {
    pub id: Uuid,
    /// Wire command tag, e.g. `PK005`
    pub command: String,
    pub value: String,
    /// Message type that triggered this command
    pub source_msg_type: String,
    /// Raw message that triggered this command
    pub source_msg_id: Uuid,
    pub source_device_type: DeviceType,
    /// Modem id of the device that sent the triggering message
    pub source_device_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl CommandMessage {
    fn new(
        command: &str,
        value: String,
        raw: &RawMessage,
        source_device_type: DeviceType,
        source_device_id: Uuid,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            command: command.to_string(),
            value,
            source_msg_type: command.to_string(),
            source_msg_id: raw.id,
            source_device_type,
            source_device_id,
            created_at: Utc::now(),
        }
    }

    /// Build a beacon toggle command from a PK005 payload.
    ///
    /// The single value token is normalized: ON/1 -> `1`, OFF/0 -> `0`.
    /// An unrecognized value produces no command and no error; a garbled
    /// toggle is a best-effort no-op, not worth a diagnostic record.
    pub fn beacon_toggle(
        raw: &RawMessage,
        payload: &DecodedPayload,
        source_device_type: DeviceType,
        source_device_id: Uuid,
    ) -> Result<Option<Self>, ProtocolError> {
        let value = payload.positional(0, "value")?;
        let normalized = match value.to_ascii_uppercase().as_str() {
            "ON" | "1" => "1",
            "OFF" | "0" => "0",
            other => {
                warn!(
                    raw_message_id = %raw.id,
                    value = other,
                    "unrecognized beacon toggle value, ignoring"
                );
                return Ok(None);
            }
        };

        Ok(Some(Self::new(
            BEACON_COMMAND,
            normalized.to_string(),
            raw,
            source_device_type,
            source_device_id,
        )))
    }

    /// Build an update-interval command from a PK006 payload.
    ///
    /// The value must be an integer number of minutes; anything else is a
    /// parse failure.
    pub fn update_interval(
        raw: &RawMessage,
        payload: &DecodedPayload,
        source_device_type: DeviceType,
        source_device_id: Uuid,
    ) -> Result<Self, ProtocolError> {
        let value = payload.positional(0, "value")?;
        let minutes: i64 = value
            .trim()
            .parse()
            .map_err(|_| ProtocolError::Format(format!("interval is not an integer: {value}")))?;

        Ok(Self::new(
            INTERVAL_COMMAND,
            minutes.to_string(),
            raw,
            source_device_type,
            source_device_id,
        ))
    }
}
