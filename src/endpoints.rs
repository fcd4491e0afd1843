//! Delivery endpoints: unrelated transports sharing only a `send`
//! capability.
//!
//! Queue, modem, and legacy-messenger destinations have nothing in common
//! beyond accepting a formatted payload, so they are modeled as a
//! capability trait with variant-specific implementations rather than a
//! shared base carrying unrelated fields.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::messages::{Modem, QueueRecord};
use crate::routing::EndpointKind;
use crate::store::RelayStore;

/// Payload handed to an endpoint's send: already formatted for the
/// destination, either plain text or a hex-encoded wire envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundPayload {
    Text(String),
    Hex(String),
}

impl OutboundPayload {
    pub fn as_str(&self) -> &str {
        match self {
            OutboundPayload::Text(s) | OutboundPayload::Hex(s) => s,
        }
    }
}

/// One delivery destination. `send` makes a single synchronous attempt
/// and raises on transport failure; retry policy is the caller's concern.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Human-readable identity for logging failed sends
    fn label(&self) -> String;
    async fn send(&self, payload: &OutboundPayload) -> Result<()>;
}

/// Resolves a route's (endpoint type, endpoint id) into a sendable
/// endpoint. `None` means the referenced record no longer exists.
#[async_trait]
pub trait EndpointResolver: Send + Sync {
    async fn resolve(&self, kind: EndpointKind, id: Uuid) -> Result<Option<Arc<dyn Endpoint>>>;
}

/// Message queue destination (SQS).
pub struct QueueEndpoint {
    client: aws_sdk_sqs::Client,
    record: QueueRecord,
}

#[async_trait]
impl Endpoint for QueueEndpoint {
    fn label(&self) -> String {
        format!("queue {} ({})", self.record.name, self.record.id)
    }

    async fn send(&self, payload: &OutboundPayload) -> Result<()> {
        self.client
            .send_message()
            .queue_url(&self.record.url)
            .message_body(payload.as_str())
            .send()
            .await
            .with_context(|| format!("sending to {}", self.label()))?;
        debug!(queue = %self.record.name, "queued message");
        Ok(())
    }
}

/// Device modem destination: a mobile-terminated message posted to the
/// satellite gateway, addressed by IMEI. Payload must already be
/// hex-encoded.
pub struct ModemEndpoint {
    http: reqwest::Client,
    gateway_url: String,
    username: Option<String>,
    password: Option<String>,
    modem_id: Uuid,
    imei: String,
}

#[async_trait]
impl Endpoint for ModemEndpoint {
    fn label(&self) -> String {
        format!("modem {} (imei {})", self.modem_id, self.imei)
    }

    async fn send(&self, payload: &OutboundPayload) -> Result<()> {
        let (Some(username), Some(password)) = (&self.username, &self.password) else {
            bail!("modem gateway credentials not configured");
        };

        let form = [
            ("imei", self.imei.as_str()),
            ("data", payload.as_str()),
            ("username", username.as_str()),
            ("password", password.as_str()),
        ];
        let response = self
            .http
            .post(&self.gateway_url)
            .form(&form)
            .send()
            .await
            .with_context(|| format!("posting to {}", self.label()))?;
        response
            .error_for_status()
            .with_context(|| format!("gateway rejected send to {}", self.label()))?;
        Ok(())
    }
}

/// Legacy handheld messenger destination, addressed by serial. Takes the
/// formatted text as-is; no hex framing.
pub struct LegacyEndpoint {
    http: reqwest::Client,
    gateway_url: String,
    username: Option<String>,
    password: Option<String>,
    modem_id: Uuid,
    serial: String,
}

#[async_trait]
impl Endpoint for LegacyEndpoint {
    fn label(&self) -> String {
        format!("legacy messenger {} (serial {})", self.modem_id, self.serial)
    }

    async fn send(&self, payload: &OutboundPayload) -> Result<()> {
        let (Some(username), Some(password)) = (&self.username, &self.password) else {
            bail!("legacy gateway credentials not configured");
        };

        let url = format!("{}/{}", self.gateway_url.trim_end_matches('/'), self.serial);
        let params = [
            ("username", username.as_str()),
            ("password", password.as_str()),
            ("message", payload.as_str()),
        ];
        let response = self
            .http
            .post(&url)
            .query(&params)
            .send()
            .await
            .with_context(|| format!("posting to {}", self.label()))?;
        response
            .error_for_status()
            .with_context(|| format!("gateway rejected send to {}", self.label()))?;
        Ok(())
    }
}

/// Production resolver: looks endpoint records up in the store and wires
/// them to their live transports.
pub struct LiveEndpointResolver {
    store: Arc<dyn RelayStore>,
    config: RelayConfig,
    http: reqwest::Client,
    sqs: aws_sdk_sqs::Client,
}

impl LiveEndpointResolver {
    pub async fn new(store: Arc<dyn RelayStore>, config: RelayConfig) -> Self {
        let aws_config = aws_config::load_from_env().await;
        Self {
            store,
            config,
            http: reqwest::Client::new(),
            sqs: aws_sdk_sqs::Client::new(&aws_config),
        }
    }

    fn modem_endpoint(&self, modem: &Modem) -> Arc<dyn Endpoint> {
        Arc::new(ModemEndpoint {
            http: self.http.clone(),
            gateway_url: self.config.modem_gateway_url.clone(),
            username: self.config.modem_username.clone(),
            password: self.config.modem_password.clone(),
            modem_id: modem.id,
            imei: modem.imei.clone(),
        })
    }

    fn legacy_endpoint(&self, modem: &Modem) -> Arc<dyn Endpoint> {
        Arc::new(LegacyEndpoint {
            http: self.http.clone(),
            gateway_url: self.config.legacy_gateway_url.clone(),
            username: self.config.legacy_username.clone(),
            password: self.config.legacy_password.clone(),
            modem_id: modem.id,
            serial: modem.serial.clone(),
        })
    }
}

#[async_trait]
impl EndpointResolver for LiveEndpointResolver {
    async fn resolve(&self, kind: EndpointKind, id: Uuid) -> Result<Option<Arc<dyn Endpoint>>> {
        match kind {
            EndpointKind::Queue => {
                let Some(record) = self.store.queue(id).await? else {
                    return Ok(None);
                };
                Ok(Some(Arc::new(QueueEndpoint {
                    client: self.sqs.clone(),
                    record,
                })))
            }
            EndpointKind::Buoy | EndpointKind::Handset => {
                let Some(modem) = self.store.modem(id).await? else {
                    return Ok(None);
                };
                Ok(Some(self.modem_endpoint(&modem)))
            }
            EndpointKind::Legacy => {
                let Some(modem) = self.store.modem(id).await? else {
                    return Ok(None);
                };
                Ok(Some(self.legacy_endpoint(&modem)))
            }
        }
    }
}

/// Endpoint that only logs, for the simulation CLI.
pub struct LoggingEndpoint {
    pub kind: EndpointKind,
    pub id: Uuid,
}

#[async_trait]
impl Endpoint for LoggingEndpoint {
    fn label(&self) -> String {
        format!("{} {}", self.kind, self.id)
    }

    async fn send(&self, payload: &OutboundPayload) -> Result<()> {
        tracing::info!(endpoint = %self.label(), payload = payload.as_str(), "simulated send");
        Ok(())
    }
}

/// Resolver that hands every route a [`LoggingEndpoint`], for the
/// simulation CLI.
pub struct LoggingResolver;

#[async_trait]
impl EndpointResolver for LoggingResolver {
    async fn resolve(&self, kind: EndpointKind, id: Uuid) -> Result<Option<Arc<dyn Endpoint>>> {
        Ok(Some(Arc::new(LoggingEndpoint { kind, id })))
    }
}
