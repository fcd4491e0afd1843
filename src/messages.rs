//! Core persisted record shapes: the raw inbound envelope, its processing
//! status, the modem registry, and the parse-error diagnostic trail.
//!
//! Field names and types here are the persistence contract other
//! collaborators depend on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Processing state attached 1:1 to a raw message.
///
/// Transitions only `New -> Processing`; a message already past `New` must
/// not be reprocessed. `Done`/`Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    New,
    Processing,
    Done,
    Failed,
}

/// Logical device class a modem can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Drifting telemetry buoy
    Buoy,
    /// Crew handset
    Handset,
    /// Legacy handheld messenger, kept for the remaining fielded units
    Legacy,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Buoy => write!(f, "buoy"),
            DeviceType::Handset => write!(f, "handset"),
            DeviceType::Legacy => write!(f, "legacy"),
        }
    }
}

/// One inbound delivery from the satellite network, stored verbatim.
///
/// Immutable after creation apart from `modem_id`, which is attached once
/// the owning modem record is resolved. The decode pipeline only ever
/// references these by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    pub id: Uuid,
    /// Modem IMEI as reported by the network
    pub imei: String,
    /// Device type string assigned by the network, not by us
    pub network_device_type: String,
    /// Network-assigned modem serial
    pub serial: String,
    /// Mobile-originated message sequence number, assigned by the device
    pub momsn: i32,
    /// Transmit time exactly as delivered (century omitted, may be
    /// percent-encoded); parsed lazily by the builders
    pub transmit_time: String,
    /// Position estimate of the relaying satellite
    pub network_latitude: String,
    pub network_longitude: String,
    /// Circular error of probability for the satellite position
    pub network_cep: String,
    pub session_status: String,
    /// Hex-encoded wire payload
    pub data: String,
    /// Owning modem, attached during processing
    pub modem_id: Option<Uuid>,
    pub received_at: DateTime<Utc>,
}

impl RawMessage {
    /// The compact field set queue destinations receive: the original
    /// network envelope, not the decoded fix.
    pub fn wire_envelope(&self) -> WireEnvelope<'_> {
        WireEnvelope {
            imei: &self.imei,
            serial: &self.serial,
            momsn: self.momsn,
            transmit_time: &self.transmit_time,
            network_latitude: &self.network_latitude,
            network_longitude: &self.network_longitude,
            network_cep: &self.network_cep,
            session_status: &self.session_status,
            data: &self.data,
        }
    }
}

/// Serialized form of the inbound envelope for queue delivery.
#[derive(Debug, Serialize)]
pub struct WireEnvelope<'a> {
    pub imei: &'a str,
    pub serial: &'a str,
    pub momsn: i32,
    pub transmit_time: &'a str,
    pub network_latitude: &'a str,
    pub network_longitude: &'a str,
    pub network_cep: &'a str,
    pub session_status: &'a str,
    pub data: &'a str,
}

/// A physical satellite modem. Distinct from the logical device it is
/// attached to; a modem is associated with at most one device at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Modem {
    pub id: Uuid,
    pub imei: String,
    /// Modem hardware type as assigned by the network
    pub modem_type: String,
    pub serial: String,
    /// Logical device class this modem is linked to; `None` until an
    /// operator links it, which also means nothing can be routed from it
    pub device_type: Option<DeviceType>,
    pub created_at: DateTime<Utc>,
}

impl Modem {
    /// Provision a modem record from the first message seen for an IMEI.
    /// The logical device link is left for the operator.
    pub fn provision(imei: &str, modem_type: &str, serial: &str) -> Self {
        Self {
            id: Uuid::now_v7(),
            imei: imei.to_string(),
            modem_type: modem_type.to_string(),
            serial: serial.to_string(),
            device_type: None,
            created_at: Utc::now(),
        }
    }
}

/// A named message queue a route can deliver to. Credentials and the
/// actual transport live with the queue client, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueRecord {
    pub id: Uuid,
    pub name: String,
    pub url: String,
}

/// Append-only diagnostic record written whenever decode or dispatch of a
/// message fails. Never mutates the original message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsingError {
    pub id: Uuid,
    /// Where the message came from, e.g. the satellite network label
    pub source: String,
    /// Id of the message that failed, as text
    pub message_id: String,
    pub error: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl ParsingError {
    pub fn new(source: &str, message_id: impl ToString, error: impl ToString) -> Self {
        Self {
            id: Uuid::now_v7(),
            source: source.to_string(),
            message_id: message_id.to_string(),
            error: error.to_string(),
            status: "new".to_string(),
            created_at: Utc::now(),
        }
    }
}
