//! SKUA - satellite telemetry decode and routing relay
//!
//! Decodes hex-encoded beacon payloads arriving from an Iridium-style
//! short-burst network, reconciles device and network clocks, and fans
//! the decoded messages out to configured destinations (message queues,
//! field modems, a legacy messenger service) through a validated route
//! table.

pub mod clock;
pub mod commands;
pub mod config;
pub mod coords;
pub mod dispatcher;
pub mod endpoints;
pub mod fixes;
pub mod formatters;
pub mod messages;
pub mod protocol;
pub mod routing;
pub mod store;

pub use dispatcher::{DispatchError, Dispatcher};
pub use messages::{DeviceType, Modem, ProcessingStatus, RawMessage};
pub use protocol::{DecodedPayload, ProtocolError, decode_payload};
pub use store::{MemoryStore, RelayStore};
