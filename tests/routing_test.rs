//! Route table validation tests: pairing rules, registry cross-checks,
//! duplicate detection, and the detach guard.

use std::sync::Arc;
use uuid::Uuid;

use skua::messages::{DeviceType, Modem, QueueRecord};
use skua::routing::{
    EndpointKind, RouteCandidate, RouteMessageType, detach_violations, validate_route,
};
use skua::store::{MemoryStore, RelayStore};

fn linked_modem(imei: &str, device_type: DeviceType) -> Modem {
    let mut modem = Modem::provision(imei, "SATMODEM", &imei[imei.len() - 6..]);
    modem.device_type = Some(device_type);
    modem
}

fn candidate(
    source: &Modem,
    msg_type: RouteMessageType,
    target_type: EndpointKind,
    target_id: Uuid,
    target_label: &str,
) -> RouteCandidate {
    RouteCandidate {
        source_type: source.device_type.unwrap(),
        source_id: source.id,
        source_label: source.serial.clone(),
        msg_type,
        target_type,
        target_id,
        target_label: target_label.to_string(),
    }
}

async fn seeded_store() -> (Arc<MemoryStore>, Modem, Modem, Modem, QueueRecord) {
    let store = Arc::new(MemoryStore::new());
    let buoy = linked_modem("300434063836590", DeviceType::Buoy);
    let handset = linked_modem("300434063836591", DeviceType::Handset);
    let legacy = linked_modem("300434063836592", DeviceType::Legacy);
    let queue = QueueRecord {
        id: Uuid::now_v7(),
        name: "position-reports".to_string(),
        url: "https://sqs.us-west-2.amazonaws.com/123456789012/position-reports".to_string(),
    };
    store.insert_modem(buoy.clone()).await.unwrap();
    store.insert_modem(handset.clone()).await.unwrap();
    store.insert_modem(legacy.clone()).await.unwrap();
    store.insert_queue(queue.clone()).await.unwrap();
    (store, buoy, handset, legacy, queue)
}

#[tokio::test]
async fn accepts_valid_buoy_to_queue_route() {
    let (store, buoy, _, _, queue) = seeded_store().await;
    let violations = validate_route(
        store.as_ref(),
        &candidate(
            &buoy,
            RouteMessageType::Pk001,
            EndpointKind::Queue,
            queue.id,
            &queue.name,
        ),
    )
    .await
    .unwrap();
    assert!(violations.is_empty(), "unexpected: {violations:?}");
}

#[tokio::test]
async fn buoy_cannot_target_another_buoy() {
    let (store, buoy, _, _, _) = seeded_store().await;
    let other_buoy = linked_modem("300434063836599", DeviceType::Buoy);
    store.insert_modem(other_buoy.clone()).await.unwrap();

    let violations = validate_route(
        store.as_ref(),
        &candidate(
            &buoy,
            RouteMessageType::Pk001,
            EndpointKind::Buoy,
            other_buoy.id,
            &other_buoy.serial,
        ),
    )
    .await
    .unwrap();
    assert!(violations.contains(&"Buoy cannot target another buoy".to_string()));
}

#[tokio::test]
async fn buoy_may_only_send_position_reports() {
    let (store, buoy, handset, _, _) = seeded_store().await;
    let violations = validate_route(
        store.as_ref(),
        &candidate(
            &buoy,
            RouteMessageType::Pk004,
            EndpointKind::Handset,
            handset.id,
            &handset.serial,
        ),
    )
    .await
    .unwrap();
    assert!(violations.contains(&"Buoy message type must be pk001".to_string()));
}

#[tokio::test]
async fn handset_may_only_send_commands_to_buoy() {
    let (store, buoy, handset, _, _) = seeded_store().await;

    let violations = validate_route(
        store.as_ref(),
        &candidate(
            &handset,
            RouteMessageType::Pk004,
            EndpointKind::Buoy,
            buoy.id,
            &buoy.serial,
        ),
    )
    .await
    .unwrap();
    assert!(violations.contains(&"Handset cannot send pk004 to buoy".to_string()));

    let violations = validate_route(
        store.as_ref(),
        &candidate(
            &handset,
            RouteMessageType::Command,
            EndpointKind::Buoy,
            buoy.id,
            &buoy.serial,
        ),
    )
    .await
    .unwrap();
    assert!(violations.is_empty(), "unexpected: {violations:?}");
}

/// A stale management UI can submit an id/label pair that no longer
/// matches; the mismatch must surface as a violation, not silently bind
/// to the wrong device.
#[tokio::test]
async fn stale_label_is_rejected() {
    let (store, buoy, handset, _, _) = seeded_store().await;
    let violations = validate_route(
        store.as_ref(),
        &candidate(
            &buoy,
            RouteMessageType::Pk001,
            EndpointKind::Handset,
            handset.id,
            "wrong-serial",
        ),
    )
    .await
    .unwrap();
    assert_eq!(
        violations,
        vec![format!(
            "Wrong label for modem ID: {} -> wrong-serial",
            handset.id
        )]
    );
}

#[tokio::test]
async fn missing_modem_and_wrong_type_are_reported() {
    let (store, buoy, _, legacy, _) = seeded_store().await;

    let ghost = Uuid::now_v7();
    let violations = validate_route(
        store.as_ref(),
        &candidate(&buoy, RouteMessageType::Pk001, EndpointKind::Handset, ghost, "x"),
    )
    .await
    .unwrap();
    assert!(violations.contains(&format!("No modem with ID: {ghost}")));

    // A legacy messenger posing as a handset target
    let violations = validate_route(
        store.as_ref(),
        &candidate(
            &buoy,
            RouteMessageType::Pk001,
            EndpointKind::Handset,
            legacy.id,
            &legacy.serial,
        ),
    )
    .await
    .unwrap();
    assert!(violations.contains(&format!("Modem ID: {} is not of type: handset", legacy.id)));
}

/// Duplicate detection only considers enabled routes: a disabled copy of
/// the same tuple does not block re-creation.
#[tokio::test]
async fn duplicate_check_ignores_disabled_routes() {
    let (store, buoy, handset, _, _) = seeded_store().await;
    let cand = candidate(
        &buoy,
        RouteMessageType::Pk001,
        EndpointKind::Handset,
        handset.id,
        &handset.serial,
    );

    let route_id = store
        .insert_route(cand.clone().into_entry())
        .await
        .unwrap();

    let violations = validate_route(store.as_ref(), &cand).await.unwrap();
    assert_eq!(
        violations,
        vec![format!("Duplicate routes found: {route_id}")]
    );

    store.set_route_enabled(route_id, false).await.unwrap();
    let violations = validate_route(store.as_ref(), &cand).await.unwrap();
    assert!(violations.is_empty(), "unexpected: {violations:?}");
}

/// A device referenced by any route, as source or destination, cannot be
/// detached until those routes are removed.
#[tokio::test]
async fn detach_guard_reports_referencing_routes() {
    let (store, buoy, handset, _, _) = seeded_store().await;
    let route_id = store
        .insert_route(
            candidate(
                &buoy,
                RouteMessageType::Pk001,
                EndpointKind::Handset,
                handset.id,
                &handset.serial,
            )
            .into_entry(),
        )
        .await
        .unwrap();

    // Destination role
    let violations = detach_violations(store.as_ref(), EndpointKind::Handset, handset.id)
        .await
        .unwrap();
    assert_eq!(violations, vec![format!("Routes contain item: {route_id}")]);

    // Source role
    let violations = detach_violations(store.as_ref(), EndpointKind::Buoy, buoy.id)
        .await
        .unwrap();
    assert_eq!(violations, vec![format!("Routes contain item: {route_id}")]);

    store.delete_route(route_id).await.unwrap();
    let violations = detach_violations(store.as_ref(), EndpointKind::Handset, handset.id)
        .await
        .unwrap();
    assert!(violations.is_empty());
}
