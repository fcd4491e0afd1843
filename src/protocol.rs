//! Compact wire protocol for store-and-forward satellite payloads.
//!
//! Inbound payloads arrive hex-encoded. Decoded, they read
//! `PK<nnn>;<field>[,<field>]*` where each field is either `key:value`
//! or a bare positional token depending on the packet type. The tag is
//! stripped here; interpreting the fields is the builders' job.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use thiserror::Error;

/// Leading packet-type tag, e.g. `PK001;`
static TYPE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^PK[0-9]{3};").expect("valid regex"));

/// Errors raised while decoding wire payloads and their tokens
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Malformed coordinate, time, or numeric token
    #[error("malformed token: {0}")]
    Format(String),

    /// Device fix time impossible relative to the network transmit time.
    /// The fix is always read before transmission, so this means corrupt input.
    #[error("fix time {fix} is after transmit time {transmit}")]
    Causality {
        fix: DateTime<Utc>,
        transmit: DateTime<Utc>,
    },

    /// Payload did not start with a recognizable `PK<nnn>;` tag
    #[error("missing packet type tag in payload: {0:?}")]
    MissingTypeTag(String),

    /// A field the packet type requires was not present
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// A payload stripped of its type tag and split into raw field tokens.
/// Ephemeral: produced per decode call, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPayload {
    /// Packet type tag without the trailing separator, e.g. `PK001`
    pub message_type: String,
    /// Raw comma-separated field tokens, in wire order
    pub fields: Vec<String>,
}

impl DecodedPayload {
    /// Split `key:value` fields into a map. Packet types with keyed fields
    /// (PK001) use this; positional packet types index `fields` directly.
    pub fn keyed_fields(&self) -> Result<HashMap<&str, &str>, ProtocolError> {
        self.fields
            .iter()
            .map(|field| {
                field
                    .split_once(':')
                    .ok_or_else(|| ProtocolError::Format(format!("field is not key:value: {field}")))
            })
            .collect()
    }

    /// Positional field access for packet types without keys (PK004 and commands)
    pub fn positional(&self, index: usize, name: &'static str) -> Result<&str, ProtocolError> {
        self.fields
            .get(index)
            .map(String::as_str)
            .ok_or(ProtocolError::MissingField(name))
    }
}

/// Decode a hex-encoded inbound payload into its type tag and field tokens.
///
/// A payload without a leading `PK<nnn>;` tag is a terminal parse failure:
/// there is nothing to retry, the message cannot be interpreted.
pub fn decode_payload(hex_data: &str) -> Result<DecodedPayload, ProtocolError> {
    let bytes = hex::decode(hex_data.trim())
        .map_err(|e| ProtocolError::Format(format!("payload is not valid hex: {e}")))?;
    let text = String::from_utf8(bytes)
        .map_err(|e| ProtocolError::Format(format!("payload is not ASCII text: {e}")))?;

    let tag = TYPE_TAG
        .find(&text)
        .ok_or_else(|| ProtocolError::MissingTypeTag(text.clone()))?;

    // Tag minus the trailing ';'
    let message_type = text[..tag.end() - 1].to_string();
    let fields = text[tag.end()..].split(',').map(str::to_string).collect();

    Ok(DecodedPayload {
        message_type,
        fields,
    })
}

/// Frame a fix packet for delivery to a device modem: prefix `+DATA:`,
/// rewrite the first `;` (the tag separator) to `,` for the receiver's
/// parser, then hex-encode the whole envelope.
pub fn encode_modem_payload(packet: &str) -> String {
    let framed = format!("+DATA:{packet}").replacen(';', ",", 1);
    hex::encode(framed.as_bytes())
}

/// Frame a command packet for a device modem. Commands keep their trailing
/// `;` terminator, so no separator rewrite happens here.
pub fn encode_modem_command(wire_tag: &str, value: &str) -> String {
    hex::encode(format!("+DATA:{wire_tag},{value};").as_bytes())
}
