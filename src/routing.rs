//! The endpoint routing table: which decoded messages of which type flow
//! from which source device to which destinations.
//!
//! Validation returns the full list of human-readable violations so an
//! operator can fix everything in one round-trip. An empty list means the
//! candidate is valid.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::messages::DeviceType;
use crate::store::RelayStore;

/// Routing key for decoded message records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteMessageType {
    /// 4D location fix
    Pk001,
    /// Position and velocity fix
    Pk004,
    /// Device command
    Command,
}

impl std::fmt::Display for RouteMessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteMessageType::Pk001 => write!(f, "pk001"),
            RouteMessageType::Pk004 => write!(f, "pk004"),
            RouteMessageType::Command => write!(f, "command"),
        }
    }
}

/// Destination variant a route can deliver to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    /// Message queue
    Queue,
    /// Buoy via its satellite modem
    Buoy,
    /// Handset via its satellite modem
    Handset,
    /// Legacy handheld messenger
    Legacy,
}

impl EndpointKind {
    /// The device class behind this endpoint, if it is device-backed.
    pub fn device_type(self) -> Option<DeviceType> {
        match self {
            EndpointKind::Queue => None,
            EndpointKind::Buoy => Some(DeviceType::Buoy),
            EndpointKind::Handset => Some(DeviceType::Handset),
            EndpointKind::Legacy => Some(DeviceType::Legacy),
        }
    }
}

impl std::fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointKind::Queue => write!(f, "queue"),
            EndpointKind::Buoy => write!(f, "buoy"),
            EndpointKind::Handset => write!(f, "handset"),
            EndpointKind::Legacy => write!(f, "legacy"),
        }
    }
}

/// One configured forwarding rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteEntry {
    pub id: Uuid,
    pub source_device_type: DeviceType,
    /// Modem id of the source device
    pub source_device_id: Uuid,
    pub msg_type: RouteMessageType,
    pub endpoint_type: EndpointKind,
    /// Queue id or modem id depending on `endpoint_type`
    pub endpoint_id: Uuid,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// A route as submitted by the management boundary, carrying the labels
/// the operator saw so stale-UI id/label mismatches can be caught.
#[derive(Debug, Clone)]
pub struct RouteCandidate {
    pub source_type: DeviceType,
    pub source_id: Uuid,
    pub source_label: String,
    pub msg_type: RouteMessageType,
    pub target_type: EndpointKind,
    pub target_id: Uuid,
    pub target_label: String,
}

impl RouteCandidate {
    /// Turn a validated candidate into a persistable, enabled route.
    pub fn into_entry(self) -> RouteEntry {
        RouteEntry {
            id: Uuid::now_v7(),
            source_device_type: self.source_type,
            source_device_id: self.source_id,
            msg_type: self.msg_type,
            endpoint_type: self.target_type,
            endpoint_id: self.target_id,
            enabled: true,
            created_at: Utc::now(),
        }
    }
}

/// Validate a candidate route against the current device/queue registry
/// and the existing route table. Checks run in order and all violations
/// are collected; an empty result means the route may be created.
pub async fn validate_route(store: &dyn RelayStore, candidate: &RouteCandidate) -> Result<Vec<String>> {
    let mut violations = Vec::new();

    confirm_modem_device(
        store,
        candidate.source_id,
        candidate.source_type,
        &candidate.source_label,
        &mut violations,
    )
    .await?;

    if let Some(device_type) = candidate.target_type.device_type() {
        confirm_modem_device(
            store,
            candidate.target_id,
            device_type,
            &candidate.target_label,
            &mut violations,
        )
        .await?;
    }

    if candidate.target_type == EndpointKind::Queue {
        confirm_queue(store, candidate.target_id, &candidate.target_label, &mut violations).await?;
    }

    confirm_pairing(
        candidate.source_type,
        candidate.msg_type,
        candidate.target_type,
        &mut violations,
    );

    let duplicates = store
        .enabled_duplicate_routes(
            candidate.source_type,
            candidate.source_id,
            candidate.msg_type,
            candidate.target_type,
            candidate.target_id,
        )
        .await?;
    if !duplicates.is_empty() {
        let ids = duplicates
            .iter()
            .map(|r| r.id.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        violations.push(format!("Duplicate routes found: {ids}"));
    }

    Ok(violations)
}

async fn confirm_modem_device(
    store: &dyn RelayStore,
    modem_id: Uuid,
    device_type: DeviceType,
    label: &str,
    violations: &mut Vec<String>,
) -> Result<()> {
    let Some(modem) = store.modem(modem_id).await? else {
        violations.push(format!("No modem with ID: {modem_id}"));
        return Ok(());
    };

    if label != modem.serial {
        violations.push(format!("Wrong label for modem ID: {modem_id} -> {label}"));
    }
    if modem.device_type != Some(device_type) {
        violations.push(format!("Modem ID: {modem_id} is not of type: {device_type}"));
    }
    Ok(())
}

async fn confirm_queue(
    store: &dyn RelayStore,
    queue_id: Uuid,
    label: &str,
    violations: &mut Vec<String>,
) -> Result<()> {
    let Some(queue) = store.queue(queue_id).await? else {
        violations.push(format!("No queue with ID: {queue_id}"));
        return Ok(());
    };

    if label != queue.name {
        violations.push(format!("Wrong label for queue ID: {queue_id} -> {label}"));
    }
    Ok(())
}

fn confirm_pairing(
    source: DeviceType,
    msg_type: RouteMessageType,
    target: EndpointKind,
    violations: &mut Vec<String>,
) {
    if source == DeviceType::Buoy {
        if target == EndpointKind::Buoy {
            violations.push("Buoy cannot target another buoy".to_string());
        }
        if msg_type != RouteMessageType::Pk001 {
            violations.push("Buoy message type must be pk001".to_string());
        }
    }

    if source == DeviceType::Handset {
        if target == EndpointKind::Handset {
            violations.push("Handset cannot target another handset".to_string());
        }
        if target == EndpointKind::Buoy && msg_type != RouteMessageType::Command {
            violations.push(format!("Handset cannot send {msg_type} to buoy"));
        }
    }
}

/// Violations blocking the detach of a device or queue still referenced by
/// any route, as source or destination. Routes must be removed first.
pub async fn detach_violations(
    store: &dyn RelayStore,
    participant: EndpointKind,
    participant_id: Uuid,
) -> Result<Vec<String>> {
    let routes = store.routes_referencing(participant, participant_id).await?;
    if routes.is_empty() {
        return Ok(Vec::new());
    }
    let ids = routes
        .iter()
        .map(|r| r.id.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    Ok(vec![format!("Routes contain item: {ids}")])
}
