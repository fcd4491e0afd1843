use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use skua::config::RelayConfig;
use skua::dispatcher::Dispatcher;
use skua::endpoints::{LiveEndpointResolver, LoggingResolver};
use skua::messages::{DeviceType, Modem, RawMessage};
use skua::routing::{EndpointKind, RouteCandidate, RouteMessageType, validate_route};
use skua::store::{MemoryStore, RelayStore};

#[derive(Parser, Debug)]
#[command(name = "skua", about = "Satellite telemetry decode and routing relay")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode a hex-encoded wire payload and print its fields
    Decode {
        /// Hex payload as delivered by the network
        hex_payload: String,
    },
    /// Run a sample message through the full pipeline with logging
    /// endpoints instead of live transports
    Simulate,
    /// Run the relay worker pool until interrupted
    Relay,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    match args.command {
        Command::Decode { hex_payload } => handle_decode(&hex_payload),
        Command::Simulate => handle_simulate().await,
        Command::Relay => handle_relay().await,
    }
}

fn handle_decode(hex_payload: &str) -> Result<()> {
    let payload = skua::decode_payload(hex_payload).context("decoding payload")?;
    println!("type: {}", payload.message_type);
    for (i, field) in payload.fields.iter().enumerate() {
        println!("  [{i}] {field}");
    }
    Ok(())
}

/// End-to-end dry run: one buoy modem, one handset modem, a PK001 message
/// routed buoy -> handset, with sends logged instead of transmitted.
async fn handle_simulate() -> Result<()> {
    let memory = Arc::new(MemoryStore::new());
    let store: Arc<dyn RelayStore> = memory.clone();

    let buoy = linked_modem("300434063836590", DeviceType::Buoy);
    let handset = linked_modem("300434063836591", DeviceType::Handset);
    store.insert_modem(buoy.clone()).await?;
    store.insert_modem(handset.clone()).await?;

    let candidate = RouteCandidate {
        source_type: DeviceType::Buoy,
        source_id: buoy.id,
        source_label: buoy.serial.clone(),
        msg_type: RouteMessageType::Pk001,
        target_type: EndpointKind::Handset,
        target_id: handset.id,
        target_label: handset.serial.clone(),
    };
    let violations = validate_route(store.as_ref(), &candidate).await?;
    anyhow::ensure!(violations.is_empty(), "sample route invalid: {violations:?}");
    store.insert_route(candidate.into_entry()).await?;

    let wire = "PK001;lat:3745.5000,NS:N,lon:12230.0000,EW:W,utc:193454.0000,batt:3.92,sog:2,cog:18.5,sta:3";
    let raw = RawMessage {
        id: Uuid::now_v7(),
        imei: buoy.imei.clone(),
        network_device_type: "SATMODEM".to_string(),
        serial: buoy.serial.clone(),
        momsn: 441,
        transmit_time: "20-03-15 22:12:51".to_string(),
        network_latitude: "37.7740".to_string(),
        network_longitude: "-122.4050".to_string(),
        network_cep: "2.0".to_string(),
        session_status: "0".to_string(),
        data: hex::encode(wire.as_bytes()),
        modem_id: None,
        received_at: chrono::Utc::now(),
    };
    let raw_id = store.insert_raw_message(raw).await?;

    let dispatcher = Dispatcher::new(store.clone(), Arc::new(LoggingResolver)).start(1);
    dispatcher.enqueue(raw_id).await?;

    // Give the worker a moment to drain before exiting
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    info!(
        fixes = memory.pk001_records().await.len(),
        "simulation complete"
    );
    Ok(())
}

async fn handle_relay() -> Result<()> {
    let config = RelayConfig::from_env();
    let store: Arc<dyn RelayStore> = Arc::new(MemoryStore::new());
    let resolver = Arc::new(LiveEndpointResolver::new(store.clone(), config.clone()).await);

    let _dispatcher = Dispatcher::new(store, resolver).start(config.dispatch_workers);
    info!(workers = config.dispatch_workers, "relay started");

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");
    Ok(())
}

fn linked_modem(imei: &str, device_type: DeviceType) -> Modem {
    let mut modem = Modem::provision(imei, "SATMODEM", &imei[imei.len() - 6..]);
    modem.device_type = Some(device_type);
    modem
}
