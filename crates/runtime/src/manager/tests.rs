use super::*;
use crate::events::EventStream;
use crate::store::MemoryProductStore;
use crate::testing::{MockUsbBackend, micropython_device, unsupported_device};

const SETTLE: Duration = Duration::from_millis(20);
const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

fn spawn_manager(backend: &MockUsbBackend, store: &MemoryProductStore) -> BoardHandle {
    BoardManager::spawn_with_settle_delay(
        Box::new(backend.clone()),
        Box::new(store.clone()),
        SETTLE,
    )
}

async fn next_event(stream: &mut EventStream) -> BoardEvent {
    tokio::time::timeout(EVENT_TIMEOUT, stream.recv())
        .await
        .expect("no event in time")
        .expect("event stream closed")
}

#[tokio::test]
async fn zero_devices_reports_no_devices() {
    let backend = MockUsbBackend::new();
    let store = MemoryProductStore::new();
    let handle = spawn_manager(&backend, &store);
    let mut events = handle.subscribe();

    assert!(!handle.detect_devices().await.unwrap());

    match next_event(&mut events).await {
        BoardEvent::StatusChanged(ConnectionState::Error { kind, .. }) => {
            assert_eq!(kind, ConnectionErrorKind::NoDevices);
        }
        other => panic!("expected error status, got {other:?}"),
    }
    match next_event(&mut events).await {
        BoardEvent::ConnectionError { kind, .. } => {
            assert_eq!(kind.as_str(), "NO_DEVICES");
        }
        other => panic!("expected connection error, got {other:?}"),
    }
}

#[tokio::test]
async fn supported_device_connects_and_is_remembered() {
    let device = micropython_device(5);
    let backend = MockUsbBackend::new().with_device(device.clone());
    let store = MemoryProductStore::new();
    let handle = spawn_manager(&backend, &store);
    let mut events = handle.subscribe();

    assert!(handle.detect_devices().await.unwrap());

    match next_event(&mut events).await {
        BoardEvent::StatusChanged(ConnectionState::Connected(connected)) => {
            assert_eq!(connected, device);
        }
        other => panic!("expected connected status, got {other:?}"),
    }
    match next_event(&mut events).await {
        BoardEvent::BoardConnect(connected) => assert_eq!(connected, device),
        other => panic!("expected board connect, got {other:?}"),
    }

    assert!(store.snapshot().contains(&5));
    assert_eq!(
        handle.state().await.unwrap(),
        ConnectionState::Connected(device.clone())
    );
    assert_eq!(handle.current_device().await.unwrap(), Some(device));
    assert_eq!(backend.open_count(), 1);
}

#[tokio::test]
async fn remembered_product_id_auto_connects() {
    let device = unsupported_device(7);
    let backend = MockUsbBackend::new().with_device(device.clone());
    let store = MemoryProductStore::new().with_product(7);
    let handle = spawn_manager(&backend, &store);

    let connect = handle.wait_for(
        |e| matches!(e, BoardEvent::BoardConnect(_)),
        EVENT_TIMEOUT,
    );
    assert!(handle.detect_devices().await.unwrap());
    connect.wait().await.unwrap();
}

#[tokio::test]
async fn detect_is_a_noop_while_attempt_is_in_flight() {
    let backend = MockUsbBackend::new().with_device(micropython_device(5));
    backend.require_permission();
    let store = MemoryProductStore::new();
    let handle = spawn_manager(&backend, &store);

    assert!(handle.detect_devices().await.unwrap());
    assert_eq!(
        handle.state().await.unwrap(),
        ConnectionState::AwaitingPermission
    );

    // Rapid repeated calls must not trigger a second permission dialog
    // or a second open attempt.
    assert!(!handle.detect_devices().await.unwrap());
    assert!(!handle.detect_devices().await.unwrap());
    assert_eq!(backend.permission_requests(), 1);
    assert_eq!(backend.open_count(), 0);

    let connect = handle.wait_for(
        |e| matches!(e, BoardEvent::BoardConnect(_)),
        EVENT_TIMEOUT,
    );
    backend.resolve_permission(true);
    connect.wait().await.unwrap();
    assert_eq!(backend.open_count(), 1);
}

#[tokio::test]
async fn permission_denied_surfaces_as_error() {
    let backend = MockUsbBackend::new().with_device(micropython_device(5));
    backend.require_permission();
    let store = MemoryProductStore::new();
    let handle = spawn_manager(&backend, &store);

    let error = handle.wait_for(
        |e| matches!(e, BoardEvent::ConnectionError { .. }),
        EVENT_TIMEOUT,
    );
    handle.detect_devices().await.unwrap();
    backend.resolve_permission(false);

    match error.wait().await.unwrap() {
        BoardEvent::ConnectionError { kind, .. } => {
            assert_eq!(kind, ConnectionErrorKind::PermissionDenied);
        }
        other => panic!("expected connection error, got {other:?}"),
    }
    assert_eq!(handle.current_device().await.unwrap(), None);
}

#[tokio::test]
async fn unsupported_devices_await_approval() {
    let device = unsupported_device(9);
    let backend = MockUsbBackend::new().with_device(device.clone());
    let store = MemoryProductStore::new();
    let handle = spawn_manager(&backend, &store);

    assert!(!handle.detect_devices().await.unwrap());
    assert_eq!(
        handle.state().await.unwrap(),
        ConnectionState::AwaitingApproval(vec![device])
    );
}

#[tokio::test]
async fn approve_by_device_id_connects() {
    let device = unsupported_device(9);
    let backend = MockUsbBackend::new().with_device(device.clone());
    let store = MemoryProductStore::new();
    let handle = spawn_manager(&backend, &store);

    handle.detect_devices().await.unwrap();

    let connect = handle.wait_for(
        |e| matches!(e, BoardEvent::BoardConnect(_)),
        EVENT_TIMEOUT,
    );
    assert!(handle.approve_device(&device.device_name).await.unwrap());
    connect.wait().await.unwrap();
    assert!(store.snapshot().contains(&9));
}

#[tokio::test]
async fn approving_an_unknown_id_is_a_caller_error() {
    let backend = MockUsbBackend::new().with_device(unsupported_device(9));
    let store = MemoryProductStore::new();
    let handle = spawn_manager(&backend, &store);

    handle.detect_devices().await.unwrap();
    assert!(matches!(
        handle.approve_device("/dev/nonexistent").await,
        Err(Error::UnknownDevice(_))
    ));
}

#[tokio::test]
async fn denying_reports_not_supported() {
    let backend = MockUsbBackend::new().with_device(unsupported_device(9));
    let store = MemoryProductStore::new();
    let handle = spawn_manager(&backend, &store);

    handle.detect_devices().await.unwrap();

    let error = handle.wait_for(
        |e| matches!(e, BoardEvent::ConnectionError { .. }),
        EVENT_TIMEOUT,
    );
    handle.deny_device().await.unwrap();
    match error.wait().await.unwrap() {
        BoardEvent::ConnectionError { kind, .. } => {
            assert_eq!(kind, ConnectionErrorKind::NotSupported);
        }
        other => panic!("expected connection error, got {other:?}"),
    }
}

#[tokio::test]
async fn disconnect_closes_and_notifies_in_order() {
    let device = micropython_device(5);
    let backend = MockUsbBackend::new().with_device(device.clone());
    let store = MemoryProductStore::new();
    let handle = spawn_manager(&backend, &store);

    let connect = handle.wait_for(
        |e| matches!(e, BoardEvent::BoardConnect(_)),
        EVENT_TIMEOUT,
    );
    handle.detect_devices().await.unwrap();
    connect.wait().await.unwrap();

    let mut events = handle.subscribe();
    handle.disconnect().await.unwrap();

    match next_event(&mut events).await {
        BoardEvent::StatusChanged(ConnectionState::Error { kind, .. }) => {
            assert_eq!(kind, ConnectionErrorKind::ConnectionLost);
        }
        other => panic!("expected error status, got {other:?}"),
    }
    assert!(matches!(
        next_event(&mut events).await,
        BoardEvent::ConnectionError {
            kind: ConnectionErrorKind::ConnectionLost,
            ..
        }
    ));
    match next_event(&mut events).await {
        BoardEvent::BoardDisconnect(Some(disconnected)) => assert_eq!(disconnected, device),
        other => panic!("expected board disconnect, got {other:?}"),
    }
    assert_eq!(handle.current_device().await.unwrap(), None);
}

#[tokio::test]
async fn forget_twice_is_idempotent() {
    let device = unsupported_device(7);
    let backend = MockUsbBackend::new().with_device(device.clone());
    let store = MemoryProductStore::new().with_product(7);
    let handle = spawn_manager(&backend, &store);

    let connect = handle.wait_for(
        |e| matches!(e, BoardEvent::BoardConnect(_)),
        EVENT_TIMEOUT,
    );
    handle.detect_devices().await.unwrap();
    connect.wait().await.unwrap();

    handle.forget_device().await.unwrap();
    assert!(store.snapshot().is_empty());
    // No longer remembered, so the re-detect lands in approval.
    assert_eq!(
        handle.state().await.unwrap(),
        ConnectionState::AwaitingApproval(vec![device])
    );

    // Second forget on an already-disconnected manager: no panic, set
    // untouched.
    handle.forget_device().await.unwrap();
    assert!(store.snapshot().is_empty());
}

#[tokio::test]
async fn reader_fault_with_devices_attached_is_a_port_failure() {
    let backend = MockUsbBackend::new().with_device(micropython_device(5));
    let store = MemoryProductStore::new();
    let handle = spawn_manager(&backend, &store);

    let connect = handle.wait_for(
        |e| matches!(e, BoardEvent::BoardConnect(_)),
        EVENT_TIMEOUT,
    );
    handle.detect_devices().await.unwrap();
    connect.wait().await.unwrap();

    let settling = handle.wait_for(
        |e| matches!(e, BoardEvent::StatusChanged(ConnectionState::Connecting)),
        EVENT_TIMEOUT,
    );
    let error = handle.wait_for(
        |e| matches!(e, BoardEvent::ConnectionError { .. }),
        EVENT_TIMEOUT,
    );
    backend.last_link().unwrap().fail_reader();

    settling.wait().await.unwrap();
    match error.wait().await.unwrap() {
        BoardEvent::ConnectionError { kind, .. } => {
            assert_eq!(kind, ConnectionErrorKind::CantOpenPort);
        }
        other => panic!("expected connection error, got {other:?}"),
    }
}

#[tokio::test]
async fn reader_fault_after_unplug_is_a_lost_connection() {
    let backend = MockUsbBackend::new().with_device(micropython_device(5));
    let store = MemoryProductStore::new();
    let handle = spawn_manager(&backend, &store);

    let connect = handle.wait_for(
        |e| matches!(e, BoardEvent::BoardConnect(_)),
        EVENT_TIMEOUT,
    );
    handle.detect_devices().await.unwrap();
    connect.wait().await.unwrap();

    let error = handle.wait_for(
        |e| matches!(e, BoardEvent::ConnectionError { .. }),
        EVENT_TIMEOUT,
    );
    backend.clear_devices();
    backend.last_link().unwrap().fail_reader();

    match error.wait().await.unwrap() {
        BoardEvent::ConnectionError { kind, .. } => {
            assert_eq!(kind, ConnectionErrorKind::ConnectionLost);
        }
        other => panic!("expected connection error, got {other:?}"),
    }
}

#[tokio::test]
async fn interactive_output_surfaces_as_receive_data() {
    let backend = MockUsbBackend::new().with_device(micropython_device(5));
    let store = MemoryProductStore::new();
    let handle = spawn_manager(&backend, &store);

    let connect = handle.wait_for(
        |e| matches!(e, BoardEvent::BoardConnect(_)),
        EVENT_TIMEOUT,
    );
    handle.detect_devices().await.unwrap();
    connect.wait().await.unwrap();

    let data = handle.wait_for(
        |e| matches!(e, BoardEvent::ReceiveData(_)),
        EVENT_TIMEOUT,
    );
    backend.last_link().unwrap().push_chunk(b"hello\n\r\n>>> ");

    match data.wait().await.unwrap() {
        BoardEvent::ReceiveData(text) => assert_eq!(text, "hello"),
        other => panic!("expected receive data, got {other:?}"),
    }
}

#[tokio::test]
async fn silent_exchange_round_trips_through_the_wire() {
    let backend = MockUsbBackend::new().with_device(micropython_device(5));
    backend.set_auto_response(b"[('main.py', 32768, 512)]\x04\x04");
    let store = MemoryProductStore::new();
    let handle = spawn_manager(&backend, &store);

    let connect = handle.wait_for(
        |e| matches!(e, BoardEvent::BoardConnect(_)),
        EVENT_TIMEOUT,
    );
    handle.detect_devices().await.unwrap();
    connect.wait().await.unwrap();

    let out = handle.write_silent("anything").await.unwrap();
    assert_eq!(out, "[('main.py', 32768, 512)]");
}

#[tokio::test]
async fn overlapping_silent_exchanges_are_rejected() {
    let backend = MockUsbBackend::new().with_device(micropython_device(5));
    let store = MemoryProductStore::new();
    let handle = spawn_manager(&backend, &store);

    let connect = handle.wait_for(
        |e| matches!(e, BoardEvent::BoardConnect(_)),
        EVENT_TIMEOUT,
    );
    handle.detect_devices().await.unwrap();
    connect.wait().await.unwrap();

    let first_handle = handle.clone();
    let first = tokio::spawn(async move { first_handle.write_silent("one").await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(matches!(
        handle.write_silent("two").await,
        Err(Error::SynchronousBusy)
    ));

    backend.last_link().unwrap().push_chunk(b"done\x04\x04");
    assert_eq!(first.await.unwrap().unwrap(), "done");
}

#[tokio::test]
async fn writes_require_an_open_connection() {
    let backend = MockUsbBackend::new();
    let store = MemoryProductStore::new();
    let handle = spawn_manager(&backend, &store);

    assert!(matches!(
        handle.write_interactive("print(1)").await,
        Err(Error::NotConnected)
    ));
    assert!(matches!(
        handle.write_silent("print(1)").await,
        Err(Error::NotConnected)
    ));
}

#[tokio::test]
async fn shutdown_stops_the_manager() {
    let backend = MockUsbBackend::new();
    let store = MemoryProductStore::new();
    let handle = spawn_manager(&backend, &store);

    handle.shutdown();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(matches!(
        handle.detect_devices().await,
        Err(Error::ChannelClosed)
    ));
}
