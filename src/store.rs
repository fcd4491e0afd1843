//! Storage contract for the relay core, plus an in-memory implementation.
//!
//! Persistent storage technology is a collaborator, not part of this core:
//! everything the pipeline needs from it is expressed by [`RelayStore`].
//! The in-memory store backs tests and the simulation CLI, and is the
//! reference for the contract's semantics, most importantly the
//! compare-and-set processing-status guard.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::commands::CommandMessage;
use crate::fixes::{Pk001Fix, Pk004Fix};
use crate::messages::{DeviceType, Modem, ParsingError, ProcessingStatus, QueueRecord, RawMessage};
use crate::routing::{EndpointKind, RouteEntry, RouteMessageType};

/// Everything the decode/dispatch pipeline needs from persistent storage.
///
/// Implementations must make `begin_processing` a single-writer guard:
/// exactly one caller may observe status `new` and transition it to
/// `processing`. Two workers racing on the same message id is the one
/// known correctness risk in the pipeline and must be closed here, with a
/// transaction or an optimistic version check, never left to chance.
#[async_trait]
pub trait RelayStore: Send + Sync {
    // Raw inbound messages
    async fn insert_raw_message(&self, message: RawMessage) -> Result<Uuid>;
    async fn raw_message(&self, id: Uuid) -> Result<Option<RawMessage>>;
    /// Compare-and-set `new -> processing`. Returns false when the message
    /// is already past `new`, in which case the caller must not reprocess.
    async fn begin_processing(&self, id: Uuid) -> Result<bool>;
    async fn finish_processing(&self, id: Uuid, status: ProcessingStatus) -> Result<()>;
    async fn processing_status(&self, id: Uuid) -> Result<Option<ProcessingStatus>>;
    async fn attach_modem(&self, raw_id: Uuid, modem_id: Uuid) -> Result<()>;

    // Modem registry
    async fn modems_by_imei(&self, imei: &str) -> Result<Vec<Modem>>;
    async fn insert_modem(&self, modem: Modem) -> Result<Uuid>;
    async fn modem(&self, id: Uuid) -> Result<Option<Modem>>;
    async fn link_modem(&self, id: Uuid, device_type: DeviceType) -> Result<bool>;

    // Queue registry
    async fn insert_queue(&self, queue: QueueRecord) -> Result<Uuid>;
    async fn queue(&self, id: Uuid) -> Result<Option<QueueRecord>>;

    // Decoded records, one table per message type
    async fn insert_pk001(&self, fix: Pk001Fix) -> Result<Uuid>;
    async fn pk001(&self, id: Uuid) -> Result<Option<Pk001Fix>>;
    async fn insert_pk004(&self, fix: Pk004Fix) -> Result<Uuid>;
    async fn pk004(&self, id: Uuid) -> Result<Option<Pk004Fix>>;
    async fn insert_command(&self, command: CommandMessage) -> Result<Uuid>;
    async fn command(&self, id: Uuid) -> Result<Option<CommandMessage>>;

    // Diagnostics
    async fn insert_parsing_error(&self, error: ParsingError) -> Result<Uuid>;
    async fn parsing_errors(&self) -> Result<Vec<ParsingError>>;

    // Route table
    async fn insert_route(&self, route: RouteEntry) -> Result<Uuid>;
    async fn set_route_enabled(&self, id: Uuid, enabled: bool) -> Result<bool>;
    async fn delete_route(&self, id: Uuid) -> Result<bool>;
    /// Enabled routes matching (source type, source id, message type),
    /// the dispatch fan-out set. Point-in-time snapshot.
    async fn enabled_routes_for(
        &self,
        source_type: DeviceType,
        source_id: Uuid,
        msg_type: RouteMessageType,
    ) -> Result<Vec<RouteEntry>>;
    /// Enabled routes identical to a candidate's full tuple, for the
    /// duplicate check during validation.
    async fn enabled_duplicate_routes(
        &self,
        source_type: DeviceType,
        source_id: Uuid,
        msg_type: RouteMessageType,
        endpoint_type: EndpointKind,
        endpoint_id: Uuid,
    ) -> Result<Vec<RouteEntry>>;
    /// Routes referencing a participant in either role, source or
    /// destination. Backs the detach guard.
    async fn routes_referencing(
        &self,
        participant: EndpointKind,
        participant_id: Uuid,
    ) -> Result<Vec<RouteEntry>>;
}

#[derive(Default)]
struct Tables {
    raw_messages: HashMap<Uuid, RawMessage>,
    statuses: HashMap<Uuid, ProcessingStatus>,
    modems: HashMap<Uuid, Modem>,
    queues: HashMap<Uuid, QueueRecord>,
    pk001: HashMap<Uuid, Pk001Fix>,
    pk004: HashMap<Uuid, Pk004Fix>,
    commands: HashMap<Uuid, CommandMessage>,
    parsing_errors: Vec<ParsingError>,
    routes: HashMap<Uuid, RouteEntry>,
}

/// In-memory [`RelayStore`]. The status CAS is serialized by the table
/// write lock, which is exactly the single-writer guarantee the contract
/// asks of real storage.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All PK001 records, insertion-order unspecified. Test/simulation
    /// helper, not part of the storage contract.
    pub async fn pk001_records(&self) -> Vec<Pk001Fix> {
        self.tables.read().await.pk001.values().cloned().collect()
    }

    pub async fn pk004_records(&self) -> Vec<Pk004Fix> {
        self.tables.read().await.pk004.values().cloned().collect()
    }

    pub async fn command_records(&self) -> Vec<CommandMessage> {
        self.tables.read().await.commands.values().cloned().collect()
    }
}

#[async_trait]
impl RelayStore for MemoryStore {
    async fn insert_raw_message(&self, message: RawMessage) -> Result<Uuid> {
        let id = message.id;
        let mut tables = self.tables.write().await;
        tables.statuses.insert(id, ProcessingStatus::New);
        tables.raw_messages.insert(id, message);
        Ok(id)
    }

    async fn raw_message(&self, id: Uuid) -> Result<Option<RawMessage>> {
        Ok(self.tables.read().await.raw_messages.get(&id).cloned())
    }

    async fn begin_processing(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.statuses.get_mut(&id) {
            Some(status @ ProcessingStatus::New) => {
                *status = ProcessingStatus::Processing;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn finish_processing(&self, id: Uuid, status: ProcessingStatus) -> Result<()> {
        self.tables.write().await.statuses.insert(id, status);
        Ok(())
    }

    async fn processing_status(&self, id: Uuid) -> Result<Option<ProcessingStatus>> {
        Ok(self.tables.read().await.statuses.get(&id).copied())
    }

    async fn attach_modem(&self, raw_id: Uuid, modem_id: Uuid) -> Result<()> {
        let mut tables = self.tables.write().await;
        if let Some(raw) = tables.raw_messages.get_mut(&raw_id) {
            raw.modem_id = Some(modem_id);
        }
        Ok(())
    }

    async fn modems_by_imei(&self, imei: &str) -> Result<Vec<Modem>> {
        Ok(self
            .tables
            .read()
            .await
            .modems
            .values()
            .filter(|m| m.imei == imei)
            .cloned()
            .collect())
    }

    async fn insert_modem(&self, modem: Modem) -> Result<Uuid> {
        let id = modem.id;
        self.tables.write().await.modems.insert(id, modem);
        Ok(id)
    }

    async fn modem(&self, id: Uuid) -> Result<Option<Modem>> {
        Ok(self.tables.read().await.modems.get(&id).cloned())
    }

    async fn link_modem(&self, id: Uuid, device_type: DeviceType) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.modems.get_mut(&id) {
            Some(modem) => {
                modem.device_type = Some(device_type);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_queue(&self, queue: QueueRecord) -> Result<Uuid> {
        let id = queue.id;
        self.tables.write().await.queues.insert(id, queue);
        Ok(id)
    }

    async fn queue(&self, id: Uuid) -> Result<Option<QueueRecord>> {
        Ok(self.tables.read().await.queues.get(&id).cloned())
    }

    async fn insert_pk001(&self, fix: Pk001Fix) -> Result<Uuid> {
        let id = fix.id;
        self.tables.write().await.pk001.insert(id, fix);
        Ok(id)
    }

    async fn pk001(&self, id: Uuid) -> Result<Option<Pk001Fix>> {
        Ok(self.tables.read().await.pk001.get(&id).cloned())
    }

    async fn insert_pk004(&self, fix: Pk004Fix) -> Result<Uuid> {
        let id = fix.id;
        self.tables.write().await.pk004.insert(id, fix);
        Ok(id)
    }

    async fn pk004(&self, id: Uuid) -> Result<Option<Pk004Fix>> {
        Ok(self.tables.read().await.pk004.get(&id).cloned())
    }

    async fn insert_command(&self, command: CommandMessage) -> Result<Uuid> {
        let id = command.id;
        self.tables.write().await.commands.insert(id, command);
        Ok(id)
    }

    async fn command(&self, id: Uuid) -> Result<Option<CommandMessage>> {
        Ok(self.tables.read().await.commands.get(&id).cloned())
    }

    async fn insert_parsing_error(&self, error: ParsingError) -> Result<Uuid> {
        let id = error.id;
        self.tables.write().await.parsing_errors.push(error);
        Ok(id)
    }

    async fn parsing_errors(&self) -> Result<Vec<ParsingError>> {
        Ok(self.tables.read().await.parsing_errors.clone())
    }

    async fn insert_route(&self, route: RouteEntry) -> Result<Uuid> {
        let id = route.id;
        self.tables.write().await.routes.insert(id, route);
        Ok(id)
    }

    async fn set_route_enabled(&self, id: Uuid, enabled: bool) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.routes.get_mut(&id) {
            Some(route) => {
                route.enabled = enabled;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_route(&self, id: Uuid) -> Result<bool> {
        Ok(self.tables.write().await.routes.remove(&id).is_some())
    }

    async fn enabled_routes_for(
        &self,
        source_type: DeviceType,
        source_id: Uuid,
        msg_type: RouteMessageType,
    ) -> Result<Vec<RouteEntry>> {
        let mut routes: Vec<RouteEntry> = self
            .tables
            .read()
            .await
            .routes
            .values()
            .filter(|r| {
                r.enabled
                    && r.source_device_type == source_type
                    && r.source_device_id == source_id
                    && r.msg_type == msg_type
            })
            .cloned()
            .collect();
        // Deterministic fan-out order
        routes.sort_by_key(|r| r.created_at);
        Ok(routes)
    }

    async fn enabled_duplicate_routes(
        &self,
        source_type: DeviceType,
        source_id: Uuid,
        msg_type: RouteMessageType,
        endpoint_type: EndpointKind,
        endpoint_id: Uuid,
    ) -> Result<Vec<RouteEntry>> {
        Ok(self
            .tables
            .read()
            .await
            .routes
            .values()
            .filter(|r| {
                r.enabled
                    && r.source_device_type == source_type
                    && r.source_device_id == source_id
                    && r.msg_type == msg_type
                    && r.endpoint_type == endpoint_type
                    && r.endpoint_id == endpoint_id
            })
            .cloned()
            .collect())
    }

    async fn routes_referencing(
        &self,
        participant: EndpointKind,
        participant_id: Uuid,
    ) -> Result<Vec<RouteEntry>> {
        Ok(self
            .tables
            .read()
            .await
            .routes
            .values()
            .filter(|r| {
                let as_source = participant
                    .device_type()
                    .is_some_and(|dt| r.source_device_type == dt && r.source_device_id == participant_id);
                let as_target =
                    r.endpoint_type == participant && r.endpoint_id == participant_id;
                as_source || as_target
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_raw() -> RawMessage {
        RawMessage {
            id: Uuid::now_v7(),
            imei: "300434063836590".to_string(),
            network_device_type: "SATMODEM".to_string(),
            serial: "123456".to_string(),
            momsn: 1,
            transmit_time: "20-03-15 22:12:51".to_string(),
            network_latitude: "37.7740".to_string(),
            network_longitude: "-122.4050".to_string(),
            network_cep: "2.0".to_string(),
            session_status: "0".to_string(),
            data: String::new(),
            modem_id: None,
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn begin_processing_is_single_shot() {
        let store = MemoryStore::new();
        let id = store.insert_raw_message(sample_raw()).await.unwrap();

        assert!(store.begin_processing(id).await.unwrap());
        // Second caller loses the race
        assert!(!store.begin_processing(id).await.unwrap());
        assert_eq!(
            store.processing_status(id).await.unwrap(),
            Some(ProcessingStatus::Processing)
        );
    }

    #[tokio::test]
    async fn begin_processing_unknown_message_is_false() {
        let store = MemoryStore::new();
        assert!(!store.begin_processing(Uuid::now_v7()).await.unwrap());
    }

    #[tokio::test]
    async fn disabled_routes_are_not_dispatched() {
        let store = MemoryStore::new();
        let source = Uuid::now_v7();
        let target = Uuid::now_v7();

        let mut route = crate::routing::RouteCandidate {
            source_type: DeviceType::Buoy,
            source_id: source,
            source_label: "b1".to_string(),
            msg_type: RouteMessageType::Pk001,
            target_type: EndpointKind::Queue,
            target_id: target,
            target_label: "q1".to_string(),
        }
        .into_entry();
        route.enabled = false;
        store.insert_route(route).await.unwrap();

        let matches = store
            .enabled_routes_for(DeviceType::Buoy, source, RouteMessageType::Pk001)
            .await
            .unwrap();
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn routes_referencing_matches_both_roles() {
        let store = MemoryStore::new();
        let modem_id = Uuid::now_v7();

        let as_source = crate::routing::RouteCandidate {
            source_type: DeviceType::Handset,
            source_id: modem_id,
            source_label: "h1".to_string(),
            msg_type: RouteMessageType::Command,
            target_type: EndpointKind::Buoy,
            target_id: Uuid::now_v7(),
            target_label: "b1".to_string(),
        }
        .into_entry();
        let as_target = crate::routing::RouteCandidate {
            source_type: DeviceType::Buoy,
            source_id: Uuid::now_v7(),
            source_label: "b2".to_string(),
            msg_type: RouteMessageType::Pk001,
            target_type: EndpointKind::Handset,
            target_id: modem_id,
            target_label: "h1".to_string(),
        }
        .into_entry();
        store.insert_route(as_source).await.unwrap();
        store.insert_route(as_target).await.unwrap();

        let found = store
            .routes_referencing(EndpointKind::Handset, modem_id)
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
    }
}
