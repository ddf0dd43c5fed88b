// DeviceChannel behaviour against a scripted broker.

mod support;

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use petlink_core::{CommandState, CoreError, DeviceId, PresenceEvent, SessionState};
use support::{memory_channel, wait_until};

const D1_STATUS: &str = "/topic/device/D1/command-status";
const D1_PRESENCE: &str = "/topic/device/D1/presence";
const D2_STATUS: &str = "/topic/device/D2/command-status";
const D2_PRESENCE: &str = "/topic/device/D2/presence";

fn device(id: &str) -> DeviceId {
    DeviceId::new(id).unwrap()
}

fn status_json(device: &str, req: &str, status: &str) -> String {
    json!({
        "reqId": req,
        "deviceId": device,
        "type": "feed",
        "status": status,
        "createdAt": "2024-01-01T00:00:00Z"
    })
    .to_string()
}

// ── Binding ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_presence_frame_updates_slot_exactly() {
    let (channel, broker) = memory_channel();
    channel.connect();
    wait_until("connected", || channel.is_connected()).await;

    channel.subscribe_device(device("D1"));
    wait_until("bound", || broker.live_destinations().len() == 2).await;
    assert!(channel.is_bound());

    let delivered = broker.publish(
        D1_PRESENCE,
        r#"{"deviceId":"D1","online":true,"ts":"2024-01-01T00:00:00Z"}"#,
    );
    assert_eq!(delivered, 1);
    wait_until("presence", || channel.presence().is_some()).await;

    let expected: PresenceEvent = serde_json::from_value(json!({
        "deviceId": "D1",
        "online": true,
        "ts": "2024-01-01T00:00:00Z"
    }))
    .unwrap();
    assert_eq!(*channel.presence().unwrap(), expected);
    assert!(channel.command_status().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_command_status_frame_replaces_slot() {
    let (channel, broker) = memory_channel();
    channel.connect();
    channel.subscribe_device(device("D1"));
    wait_until("bound", || broker.live_destinations().len() == 2).await;

    broker.publish(D1_STATUS, &status_json("D1", "r-1", "SENT"));
    wait_until("first status", || channel.command_status().is_some()).await;

    broker.publish(D1_STATUS, &status_json("D1", "r-2", "ACKED"));
    wait_until("second status", || {
        channel
            .command_status()
            .is_some_and(|s| s.req_id == "r-2")
    })
    .await;

    let status = channel.command_status().unwrap();
    assert_eq!(status.status, CommandState::Acked);
    assert_eq!(status.device_id, "D1");
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_before_connect_binds_on_connect() {
    let (channel, broker) = memory_channel();

    channel.subscribe_device(device("D1"));
    assert_eq!(channel.current_device(), Some(device("D1")));
    assert!(!channel.is_bound());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.connections(), 0);

    channel.connect();
    wait_until("bound after connect", || channel.is_bound()).await;
    wait_until("broker sees subscriptions", || {
        broker.live_destinations() == vec![D1_STATUS.to_owned(), D1_PRESENCE.to_owned()]
    })
    .await;
}

// ── Switching ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_switch_device_drops_old_topics() {
    let (channel, broker) = memory_channel();
    channel.connect();
    channel.subscribe_device(device("D1"));
    wait_until("D1 bound", || broker.live_destinations().len() == 2).await;
    let old_ids = broker.subscription_ids(D1_STATUS);

    channel.subscribe_device(device("D2"));
    wait_until("D2 bound", || {
        broker.live_destinations() == vec![D2_STATUS.to_owned(), D2_PRESENCE.to_owned()]
    })
    .await;

    // A straggler for D1's old subscription id must be ignored.
    broker.publish_to(&old_ids[0], D1_STATUS, &status_json("D1", "r-1", "ACKED"));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(channel.command_status(), None);
    assert_eq!(channel.current_device(), Some(device("D2")));
}

#[tokio::test(start_paused = true)]
async fn test_switch_clears_slots() {
    let (channel, broker) = memory_channel();
    channel.connect();
    channel.subscribe_device(device("D1"));
    wait_until("bound", || channel.is_bound()).await;
    wait_until("broker bound", || broker.live_destinations().len() == 2).await;

    broker.publish(D1_STATUS, &status_json("D1", "r-1", "PENDING"));
    broker.publish(
        D1_PRESENCE,
        r#"{"deviceId":"D1","online":false,"ts":"2024-01-01T00:00:00Z"}"#,
    );
    wait_until("slots filled", || {
        channel.command_status().is_some() && channel.presence().is_some()
    })
    .await;

    channel.subscribe_device(device("D2"));
    assert!(channel.command_status().is_none());
    assert!(channel.presence().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_frame_for_other_device_is_discarded() {
    let (channel, broker) = memory_channel();
    channel.connect();
    channel.subscribe_device(device("Y"));
    wait_until("bound", || broker.live_destinations().len() == 2).await;

    broker.publish("/topic/device/Y/command-status", &status_json("X", "r-1", "ACKED"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(channel.command_status().is_none());

    broker.publish("/topic/device/Y/command-status", &status_json("Y", "r-2", "ACKED"));
    wait_until("own status", || channel.command_status().is_some()).await;
    assert_eq!(channel.command_status().unwrap().req_id, "r-2");
}

// ── Errors ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_malformed_payload_reports_decode_error_and_continues() {
    let (channel, broker) = memory_channel();
    let mut errors = channel.errors();
    channel.connect();
    channel.subscribe_device(device("D1"));
    wait_until("bound", || broker.live_destinations().len() == 2).await;

    broker.publish(D1_PRESENCE, "{not json");
    let err = errors.recv().await.unwrap();
    match &*err {
        CoreError::Decode { destination, .. } => assert_eq!(destination, D1_PRESENCE),
        other => panic!("expected Decode, got {other:?}"),
    }
    assert!(channel.presence().is_none());
    assert!(channel.is_connected());

    broker.publish(
        D1_PRESENCE,
        r#"{"deviceId":"D1","online":true,"ts":"2024-01-01T00:00:00Z"}"#,
    );
    wait_until("presence after bad frame", || channel.presence().is_some()).await;
    assert_eq!(broker.connections(), 1);
}

// ── Reconnect ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_reconnect_rebinds_without_clearing_slots() {
    let (channel, broker) = memory_channel();
    channel.connect();
    channel.subscribe_device(device("D1"));
    wait_until("bound", || broker.live_destinations().len() == 2).await;

    broker.publish(
        D1_PRESENCE,
        r#"{"deviceId":"D1","online":true,"ts":"2024-01-01T00:00:00Z"}"#,
    );
    wait_until("presence", || channel.presence().is_some()).await;

    broker.kill();
    wait_until("disconnected", || !channel.is_connected()).await;
    assert!(channel.presence().is_some());
    assert!(!channel.is_bound());

    wait_until("rebound", || channel.is_bound()).await;
    wait_until("broker rebound", || broker.live_destinations().len() == 2).await;
    assert_eq!(broker.connections(), 2);
    assert!(channel.presence().is_some());

    broker.publish(D1_STATUS, &status_json("D1", "r-9", "ACKED"));
    wait_until("status after reconnect", || channel.command_status().is_some()).await;
}

#[tokio::test(start_paused = true)]
async fn test_one_failure_schedules_exactly_one_reconnect() {
    let (channel, broker) = memory_channel();
    let mut state = channel.connection_state();
    channel.connect();
    wait_until("connected", || channel.is_connected()).await;

    broker.kill();
    state
        .wait_for(|s| matches!(s, SessionState::Reconnecting { attempt: 1 }))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(2900)).await;
    assert_eq!(broker.connections(), 1);

    wait_until("reconnected", || channel.is_connected()).await;
    assert_eq!(broker.connections(), 2);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(broker.connections(), 2);
}

// ── Disconnect ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_disconnect_leaves_nothing_behind() {
    let (channel, broker) = memory_channel();
    channel.connect();
    channel.subscribe_device(device("D1"));
    wait_until("bound", || broker.live_destinations().len() == 2).await;
    broker.publish(D1_STATUS, &status_json("D1", "r-1", "SENT"));
    wait_until("status", || channel.command_status().is_some()).await;

    channel.disconnect();

    assert_eq!(channel.current_device(), None);
    assert!(channel.command_status().is_none());
    assert!(channel.presence().is_none());
    assert!(!channel.is_bound());
    assert!(!channel.is_connected());
    assert_eq!(channel.session().active_subscriptions(), 0);
    assert!(!channel.session().reconnect_pending());

    wait_until("broker dropped", || !broker.is_live()).await;
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(broker.connections(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_during_reconnect_wait_cancels_it() {
    let (channel, broker) = memory_channel();
    let mut state = channel.connection_state();
    channel.connect();
    channel.subscribe_device(device("D1"));
    wait_until("bound", || broker.live_destinations().len() == 2).await;

    broker.kill();
    state
        .wait_for(|s| matches!(s, SessionState::Reconnecting { .. }))
        .await
        .unwrap();

    channel.disconnect();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(broker.connections(), 1);
    assert_eq!(channel.current_device(), None);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_disconnect_starts_idle() {
    let (channel, broker) = memory_channel();
    channel.connect();
    channel.subscribe_device(device("D1"));
    wait_until("bound", || channel.is_bound()).await;

    channel.disconnect();
    channel.connect();
    wait_until("connected again", || channel.is_connected()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!channel.is_bound());
    assert!(broker.live_destinations().is_empty());

    channel.subscribe_device(device("D2"));
    wait_until("D2 bound", || {
        broker.live_destinations() == vec![D2_STATUS.to_owned(), D2_PRESENCE.to_owned()]
    })
    .await;
}
