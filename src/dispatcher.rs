//! Orchestration of the decode/dispatch pipeline: one unit of work per
//! raw message id, processed by an internal worker pool.
//!
//! Decode and build failures are converted into persisted parsing-error
//! records and never propagate to the caller. The one loud abort is a
//! consistency fault in the modem registry, which needs an operator.

use anyhow::Result;
use std::sync::Arc;
use thiserror::Error;
use tracing::{Instrument, debug, error, info, warn};
use uuid::Uuid;

use crate::commands::CommandMessage;
use crate::endpoints::EndpointResolver;
use crate::fixes::{Pk001Fix, Pk004Fix};
use crate::formatters;
use crate::messages::{Modem, ParsingError, ProcessingStatus};
use crate::routing::RouteMessageType;
use crate::store::RelayStore;

/// Source label written into parsing-error records
const NETWORK_SOURCE: &str = "satnet";

const INTERNAL_QUEUE_SIZE: usize = 1_000;

/// Failures that abort `process_inbound` loudly instead of being folded
/// into a parsing-error record.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("raw message {0} not found")]
    MessageNotFound(Uuid),

    /// Multiple modem records share one network identifier. Guessing which
    /// one owns the message would corrupt downstream data; an operator has
    /// to repair the registry first.
    #[error("multiple modem records for imei {imei}")]
    ConsistencyFault { imei: String },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Decode/dispatch pipeline with an internal worker pool.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn RelayStore>,
    resolver: Arc<dyn EndpointResolver>,
    work_tx: flume::Sender<Uuid>,
    work_rx: Option<flume::Receiver<Uuid>>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn RelayStore>, resolver: Arc<dyn EndpointResolver>) -> Self {
        let (work_tx, work_rx) = flume::bounded(INTERNAL_QUEUE_SIZE);
        Self {
            store,
            resolver,
            work_tx,
            work_rx: Some(work_rx),
        }
    }

    /// Spawn the worker pool. Must be called once, after construction.
    pub fn start(mut self, num_workers: usize) -> Self {
        let work_rx = self
            .work_rx
            .take()
            .expect("start() can only be called once");

        for worker_id in 0..num_workers {
            let rx = work_rx.clone();
            let dispatcher = self.clone();

            tokio::spawn(
                async move {
                    info!("dispatch worker {} started", worker_id);
                    while let Ok(raw_id) = rx.recv_async().await {
                        if let Err(e) = dispatcher.process_inbound(raw_id).await {
                            // Only consistency faults and storage failures
                            // reach here; parse failures are recorded, not
                            // raised.
                            error!(raw_message_id = %raw_id, "processing aborted: {e}");
                            metrics::counter!("relay.dispatch.aborts").increment(1);
                        }
                        metrics::gauge!("relay.dispatch.queue_depth").set(rx.len() as f64);
                    }
                    info!("dispatch worker {} stopped", worker_id);
                }
                .instrument(tracing::info_span!("dispatch_worker", worker_id)),
            );
        }

        self
    }

    /// Enqueue a raw message for the worker pool. Blocks until there is
    /// room; inbound messages are never dropped.
    pub async fn enqueue(&self, raw_id: Uuid) -> Result<()> {
        self.work_tx
            .send_async(raw_id)
            .await
            .map_err(|_| anyhow::anyhow!("dispatch queue disconnected"))
    }

    /// Process one inbound raw message end to end.
    ///
    /// Guarded by the processing-status invariant: a message already past
    /// `new` is a no-op, so replayed deliveries and racing workers cannot
    /// create duplicate derived records.
    pub async fn process_inbound(&self, raw_id: Uuid) -> Result<(), DispatchError> {
        let raw = self
            .store
            .raw_message(raw_id)
            .await?
            .ok_or(DispatchError::MessageNotFound(raw_id))?;

        if !self.store.begin_processing(raw_id).await? {
            debug!(raw_message_id = %raw_id, "message already processed, skipping");
            return Ok(());
        }
        metrics::counter!("relay.messages.processed").increment(1);

        let modem = match self.resolve_modem(&raw).await {
            Ok(modem) => modem,
            Err(e) => {
                self.store
                    .finish_processing(raw_id, ProcessingStatus::Failed)
                    .await?;
                return Err(e);
            }
        };
        if raw.modem_id.is_none() {
            self.store.attach_modem(raw_id, modem.id).await?;
        }

        let payload = match crate::protocol::decode_payload(&raw.data) {
            Ok(payload) => payload,
            Err(e) => {
                self.record_parse_failure(raw_id, &e.to_string()).await?;
                return Ok(());
            }
        };

        // Routing needs the modem linked to a logical device; an unlinked
        // modem can still have its fixes persisted.
        let source = modem.device_type.map(|dt| (dt, modem.id));

        let built = match payload.message_type.as_str() {
            "PK001" => match Pk001Fix::from_payload(&raw, &payload) {
                Ok(fix) => {
                    let fix_id = self.store.insert_pk001(fix).await?;
                    Some((fix_id, RouteMessageType::Pk001))
                }
                Err(e) => {
                    self.record_parse_failure(raw_id, &e.to_string()).await?;
                    return Ok(());
                }
            },
            "PK004" => match Pk004Fix::from_payload(&raw, &payload) {
                Ok(fix) => {
                    let fix_id = self.store.insert_pk004(fix).await?;
                    Some((fix_id, RouteMessageType::Pk004))
                }
                Err(e) => {
                    self.record_parse_failure(raw_id, &e.to_string()).await?;
                    return Ok(());
                }
            },
            "PK005" => {
                let Some((device_type, modem_id)) = source else {
                    self.record_unroutable(raw_id, &modem).await?;
                    return Ok(());
                };
                match CommandMessage::beacon_toggle(&raw, &payload, device_type, modem_id) {
                    Ok(Some(command)) => {
                        let command_id = self.store.insert_command(command).await?;
                        Some((command_id, RouteMessageType::Command))
                    }
                    // Unrecognized toggle value: best-effort no-op
                    Ok(None) => None,
                    Err(e) => {
                        self.record_parse_failure(raw_id, &e.to_string()).await?;
                        return Ok(());
                    }
                }
            }
            "PK006" => {
                let Some((device_type, modem_id)) = source else {
                    self.record_unroutable(raw_id, &modem).await?;
                    return Ok(());
                };
                match CommandMessage::update_interval(&raw, &payload, device_type, modem_id) {
                    Ok(command) => {
                        let command_id = self.store.insert_command(command).await?;
                        Some((command_id, RouteMessageType::Command))
                    }
                    Err(e) => {
                        self.record_parse_failure(raw_id, &e.to_string()).await?;
                        return Ok(());
                    }
                }
            }
            other => {
                metrics::counter!("relay.messages.unknown_type").increment(1);
                self.record_parse_failure(raw_id, &format!("No router for {other}"))
                    .await?;
                return Ok(());
            }
        };

        if let Some((message_id, msg_type)) = built {
            match source {
                Some((device_type, modem_id)) => {
                    // A store failure here must still leave the message in
                    // a terminal status, not stranded in `processing`
                    if let Err(e) = self
                        .dispatch_to_endpoints(device_type, modem_id, message_id, msg_type)
                        .await
                    {
                        self.store
                            .finish_processing(raw_id, ProcessingStatus::Failed)
                            .await?;
                        return Err(e.into());
                    }
                }
                None => {
                    // Record persisted, nothing to route it from
                    self.record_unroutable(raw_id, &modem).await?;
                    return Ok(());
                }
            }
        }

        self.store
            .finish_processing(raw_id, ProcessingStatus::Done)
            .await?;
        Ok(())
    }

    /// Fan a decoded message out to every enabled matching route.
    ///
    /// Each destination is attempted independently: one failed send is
    /// logged with enough context to replay it manually and never blocks
    /// the remaining destinations. Also the entry point for manual
    /// replays of already-processed messages.
    pub async fn dispatch_to_endpoints(
        &self,
        source_type: crate::messages::DeviceType,
        source_id: Uuid,
        message_id: Uuid,
        msg_type: RouteMessageType,
    ) -> Result<()> {
        let routes = self
            .store
            .enabled_routes_for(source_type, source_id, msg_type)
            .await?;
        info!(
            source_type = %source_type,
            source_id = %source_id,
            msg_type = %msg_type,
            endpoints = routes.len(),
            "dispatching message"
        );

        for route in routes {
            metrics::counter!("relay.dispatch.attempts").increment(1);

            let payload = match formatters::format_for(
                self.store.as_ref(),
                msg_type,
                route.endpoint_type,
                message_id,
            )
            .await
            {
                Ok(Some(payload)) => payload,
                Ok(None) => {
                    // Config gap, already logged by the formatter table
                    metrics::counter!("relay.dispatch.no_formatter").increment(1);
                    continue;
                }
                Err(e) => {
                    error!(
                        route_id = %route.id,
                        endpoint_type = %route.endpoint_type,
                        endpoint_id = %route.endpoint_id,
                        msg_type = %msg_type,
                        message_id = %message_id,
                        "formatting failed: {e:#}"
                    );
                    metrics::counter!("relay.dispatch.format_failures").increment(1);
                    continue;
                }
            };

            match self.resolver.resolve(route.endpoint_type, route.endpoint_id).await {
                Ok(Some(endpoint)) => {
                    if let Err(e) = endpoint.send(&payload).await {
                        // Full context so the send can be replayed by hand
                        error!(
                            route_id = %route.id,
                            endpoint_type = %route.endpoint_type,
                            endpoint_id = %route.endpoint_id,
                            msg_type = %msg_type,
                            message_id = %message_id,
                            "endpoint send failed: {e:#}"
                        );
                        metrics::counter!("relay.dispatch.send_failures").increment(1);
                    } else {
                        debug!(
                            route_id = %route.id,
                            endpoint = %endpoint.label(),
                            message_id = %message_id,
                            "delivered"
                        );
                        metrics::counter!("relay.dispatch.sends").increment(1);
                    }
                }
                Ok(None) => {
                    warn!(
                        route_id = %route.id,
                        endpoint_type = %route.endpoint_type,
                        endpoint_id = %route.endpoint_id,
                        "route references a missing endpoint"
                    );
                }
                Err(e) => {
                    error!(
                        route_id = %route.id,
                        endpoint_type = %route.endpoint_type,
                        endpoint_id = %route.endpoint_id,
                        "endpoint resolution failed: {e:#}"
                    );
                }
            }
        }

        Ok(())
    }

    /// Find or provision the modem owning a raw message by its network
    /// identifier. Zero matches provisions a new record; more than one is
    /// a consistency fault.
    async fn resolve_modem(
        &self,
        raw: &crate::messages::RawMessage,
    ) -> Result<Modem, DispatchError> {
        let mut modems = self.store.modems_by_imei(&raw.imei).await?;
        match modems.len() {
            0 => {
                info!(imei = %raw.imei, "no modem for imei, provisioning");
                let modem = Modem::provision(&raw.imei, &raw.network_device_type, &raw.serial);
                self.store.insert_modem(modem.clone()).await?;
                Ok(modem)
            }
            1 => Ok(modems.remove(0)),
            _ => {
                error!(imei = %raw.imei, count = modems.len(), "ambiguous modem registry");
                Err(DispatchError::ConsistencyFault {
                    imei: raw.imei.clone(),
                })
            }
        }
    }

    async fn record_parse_failure(&self, raw_id: Uuid, error: &str) -> Result<()> {
        warn!(raw_message_id = %raw_id, error, "recording parse failure");
        metrics::counter!("relay.messages.parse_errors").increment(1);
        self.store
            .insert_parsing_error(ParsingError::new(NETWORK_SOURCE, raw_id, error))
            .await?;
        self.store
            .finish_processing(raw_id, ProcessingStatus::Failed)
            .await?;
        Ok(())
    }

    async fn record_unroutable(&self, raw_id: Uuid, modem: &Modem) -> Result<()> {
        let error = format!("modem {} is not linked to a device, cannot route", modem.id);
        warn!(raw_message_id = %raw_id, %error, "message decoded but unroutable");
        self.store
            .insert_parsing_error(ParsingError::new(NETWORK_SOURCE, raw_id, &error))
            .await?;
        self.store
            .finish_processing(raw_id, ProcessingStatus::Done)
            .await?;
        Ok(())
    }
}
