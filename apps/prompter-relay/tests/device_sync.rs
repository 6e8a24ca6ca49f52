//! End-to-end sync through the relay using real client sessions.
//! Separate local buses model separate devices; a shared bus models two
//! tabs on one of them.

use prompter_proto::Role;
use prompter_relay::relay::RelayState;
use prompter_relay::relay_router;
use prompter_sync::{LocalBus, SyncConfig, SyncSession, SyncedValue};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const KEY: &str = "teleprompter-state";

async fn start_relay_on(listener: tokio::net::TcpListener, access_key: Option<&str>) {
    let state = RelayState::new(access_key.map(str::to_string));
    let app = relay_router(state);
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("relay serve");
    });
}

fn device_config(role: Role, relay: &Url, access_key: Option<&str>) -> SyncConfig {
    SyncConfig {
        initial_role: role,
        relay_url: Some(relay.clone()),
        access_key: access_key.map(str::to_string),
        ping_interval: Duration::from_millis(100),
        pong_window: Duration::from_millis(40),
        echo_window: Duration::from_millis(20),
        reconnect_delay: Duration::from_millis(200),
        ..SyncConfig::default()
    }
}

async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..300 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// The relay greets only the newest connection with a peer count, so
/// "somebody sees a peer" is the order-independent readiness signal.
fn linked(a: &SyncSession, b: &SyncSession) -> bool {
    a.status().connected_devices >= 1 || b.status().connected_devices >= 1
}

#[tokio::test]
async fn two_devices_converge_over_the_relay() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let relay_url = Url::parse(&format!("ws://{}/ws", listener.local_addr().unwrap())).unwrap();
    start_relay_on(listener, None).await;

    let operator = SyncSession::with_bus(
        device_config(Role::Host, &relay_url, None),
        Arc::new(LocalBus::new()),
    );
    let stage = SyncSession::with_bus(
        device_config(Role::Viewer, &relay_url, None),
        Arc::new(LocalBus::new()),
    );

    let control = SyncedValue::new(operator.clone(), KEY, 0i64);
    let mirror = SyncedValue::new(stage.clone(), KEY, 0i64);

    wait_until("both devices to reach the relay", || {
        linked(&operator, &stage)
    })
    .await;

    control.set(42);
    wait_until("the viewer to converge", || mirror.get() == 42).await;
}

#[tokio::test]
async fn access_key_is_carried_by_clients() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let relay_url = Url::parse(&format!("ws://{}/ws", listener.local_addr().unwrap())).unwrap();
    start_relay_on(listener, Some("opensesame")).await;

    let a = SyncSession::with_bus(
        device_config(Role::Host, &relay_url, Some("opensesame")),
        Arc::new(LocalBus::new()),
    );
    let b = SyncSession::with_bus(
        device_config(Role::Host, &relay_url, Some("opensesame")),
        Arc::new(LocalBus::new()),
    );

    let va = SyncedValue::new(a.clone(), KEY, 0i64);
    let vb = SyncedValue::new(b.clone(), KEY, 0i64);

    wait_until("keyed clients to reach the relay", || linked(&a, &b)).await;

    va.set(5);
    wait_until("keyed clients to sync", || vb.get() == 5).await;
}

#[tokio::test]
async fn relay_outage_degrades_to_tab_sync_then_recovers() {
    // Reserve a port, then leave it dark: the relay is down when the
    // devices start.
    let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);
    let relay_url = Url::parse(&format!("ws://{addr}/ws")).unwrap();

    let browser = Arc::new(LocalBus::new());
    let operator =
        SyncSession::with_bus(device_config(Role::Host, &relay_url, None), browser.clone());
    let backup_tab = SyncSession::with_bus(device_config(Role::Host, &relay_url, None), browser);
    let remote = SyncSession::with_bus(
        device_config(Role::Viewer, &relay_url, None),
        Arc::new(LocalBus::new()),
    );

    let control = SyncedValue::new(operator.clone(), KEY, 0i64);
    let tab_mirror = SyncedValue::new(backup_tab, KEY, 0i64);
    let remote_mirror = SyncedValue::new(remote.clone(), KEY, 0i64);

    // Tab sync keeps working and the session still reports connected.
    control.set(1);
    wait_until("the sibling tab to converge", || tab_mirror.get() == 1).await;
    assert_eq!(remote_mirror.get(), 0, "the remote device is unreachable");
    assert!(
        operator.status().connected,
        "local-only sync still counts as connected"
    );
    wait_until("the relay outage to surface", || {
        operator.status().error.is_some()
    })
    .await;

    // Relay comes up on the same port; clients reconnect on their own.
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    start_relay_on(listener, None).await;

    wait_until("every client to reconnect", || {
        operator.status().error.is_none() && remote.status().error.is_none()
    })
    .await;

    control.set(2);
    wait_until("the remote device to converge", || remote_mirror.get() == 2).await;
    assert_eq!(tab_mirror.get(), 2);
}
