//! Session lifecycle tests against the scripted transport

use super::*;
use crate::codec;
use crate::test_utils::{
    FixedClock, MockCall, MockTransport, RecordingSink, SinkRecord, sample_frame,
};
use crate::transport::TransportEvent;
use crate::types::CharProperties;
use futures::StreamExt;
use std::time::Duration;
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(1);

fn session(
    transport: &MockTransport,
    config: LinkConfig,
) -> (LinkSession<MockTransport>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let session =
        LinkSession::with_clock(transport.clone(), config, Arc::clone(&sink), FixedClock(2000));
    (session, sink)
}

async fn wait_for_state(session: &LinkSession<MockTransport>, target: LinkState) {
    let mut updates = Box::pin(session.state_updates());
    let reached = tokio::time::timeout(WAIT, async {
        while let Some(state) = updates.next().await {
            if state == target {
                return;
            }
        }
    })
    .await;
    assert!(reached.is_ok(), "session never reached {target}, still {}", session.state());
}

#[tokio::test]
async fn connect_reaches_streaming() {
    let transport = MockTransport::with_peripheral();
    let (mut session, _sink) = session(&transport, LinkConfig::default());
    assert_eq!(session.state(), LinkState::Disconnected);

    session.connect().await.unwrap();

    assert_eq!(session.state(), LinkState::Streaming);
    assert_eq!(session.peripheral().unwrap().address, "00:00:00:00:00:02");
    assert!(session.telemetry_endpoint().is_some());
    assert!(session.command_endpoint().is_some());
    assert!(!session.is_degraded());
    assert_eq!(transport.scan_timeouts(), vec![Duration::from_secs(5)]);
    assert_eq!(
        transport.calls(),
        vec![
            MockCall::Scan,
            MockCall::Connect("00:00:00:00:00:02".to_string()),
            MockCall::DiscoverServices,
            MockCall::Events,
            MockCall::Subscribe(TELEMETRY_CHAR_UUID),
        ]
    );

    session.close().await.unwrap();
}

#[tokio::test]
async fn no_matching_peripheral_returns_to_disconnected() {
    let transport = MockTransport::new();
    let (mut session, _sink) = session(&transport, LinkConfig::default());

    let err = session.connect().await.unwrap_err();

    assert!(matches!(err, LinkError::NoMatchingPeripheral { scanned: 0, .. }));
    assert_eq!(session.state(), LinkState::Disconnected);
    assert_eq!(transport.calls(), vec![MockCall::Scan]);
}

#[tokio::test]
async fn connection_failure_releases_link() {
    let transport = MockTransport::with_peripheral().failing_connect("peer refused");
    let (mut session, _sink) = session(&transport, LinkConfig::default());

    let err = session.connect().await.unwrap_err();

    assert!(matches!(err, LinkError::Connection { .. }));
    assert!(err.to_string().contains("peer refused"));
    assert_eq!(session.state(), LinkState::Disconnected);
    assert_eq!(transport.calls().last(), Some(&MockCall::Disconnect));
}

#[tokio::test(start_paused = true)]
async fn connect_timeout_is_a_connection_error() {
    let transport = MockTransport::with_peripheral().hanging_connect();
    let config = LinkConfig { connect_timeout: Duration::from_millis(250), ..LinkConfig::default() };
    let (mut session, _sink) = session(&transport, config);

    let err = session.connect().await.unwrap_err();

    assert!(matches!(err, LinkError::Connection { .. }), "got {err:?}");
    assert_eq!(session.state(), LinkState::Disconnected);
}

#[tokio::test]
async fn missing_endpoint_returns_to_disconnected() {
    let transport = MockTransport::with_peripheral().with_services(Vec::new());
    let (mut session, _sink) = session(&transport, LinkConfig::default());

    let err = session.connect().await.unwrap_err();

    assert!(matches!(
        err,
        LinkError::EndpointNotFound { service, characteristic }
            if service == SERVICE_UUID && characteristic == TELEMETRY_CHAR_UUID
    ));
    assert_eq!(session.state(), LinkState::Disconnected);
    assert!(session.peripheral().is_none());
}

#[tokio::test]
async fn characteristic_without_notify_is_unsupported() {
    let transport = MockTransport::with_peripheral()
        .with_char_properties(CharProperties::READ | CharProperties::WRITE);
    let (mut session, _sink) = session(&transport, LinkConfig::default());

    let err = session.connect().await.unwrap_err();

    assert!(matches!(err, LinkError::UnsupportedCharacteristic { .. }));
    assert_eq!(session.state(), LinkState::Disconnected);
    assert!(!transport.calls().iter().any(|c| matches!(c, MockCall::Subscribe(_))));
    assert_eq!(transport.calls().last(), Some(&MockCall::Disconnect));
}

#[tokio::test]
async fn indicate_only_characteristic_streams() {
    let transport = MockTransport::with_peripheral().with_char_properties(CharProperties::INDICATE);
    let (mut session, _sink) = session(&transport, LinkConfig::default());

    session.connect().await.unwrap();

    assert_eq!(session.state(), LinkState::Streaming);
    assert!(session.command_endpoint().is_none());
    let err = session.send_command("hello").await.unwrap_err();
    assert!(matches!(err, LinkError::CommandWrite { .. }));
}

#[tokio::test]
async fn command_only_mode_enters_degraded() {
    let transport = MockTransport::with_peripheral()
        .with_char_properties(CharProperties::READ | CharProperties::WRITE);
    let config = LinkConfig { allow_command_only: true, ..LinkConfig::default() };
    let (mut session, _sink) = session(&transport, config);

    session.connect().await.unwrap();

    assert_eq!(session.state(), LinkState::Degraded);
    assert!(session.is_degraded());
    assert!(session.telemetry_endpoint().is_none());
    session.send_command("ping").await.unwrap();
    assert_eq!(transport.written(), vec![b"ping".to_vec()]);

    // Disconnects are still observed without a subscription.
    transport.push_disconnect("peer gone").await;
    wait_for_state(&session, LinkState::Disconnected).await;
    assert_eq!(transport.disconnects(), 1);
    assert!(session.command_endpoint().is_none());
}

#[tokio::test]
async fn notifications_reach_sink_with_skew() {
    let transport = MockTransport::with_peripheral();
    let (mut session, sink) = session(&transport, LinkConfig::default());
    session.connect().await.unwrap();

    transport.push_notification(codec::encode(&sample_frame(1000)).to_vec()).await;

    let records = sink.wait_for(1, WAIT).await;
    assert_eq!(records, vec![SinkRecord::Frame { timestamp_ms: 1000, skew_ms: 1000 }]);
    session.close().await.unwrap();
}

#[tokio::test]
async fn decode_failure_does_not_change_state() {
    let transport = MockTransport::with_peripheral();
    let (mut session, sink) = session(&transport, LinkConfig::default());
    session.connect().await.unwrap();

    transport.push_notification(b"garbage".to_vec()).await;
    transport.push_notification(codec::encode(&sample_frame(2000)).to_vec()).await;

    let records = sink.wait_for(2, WAIT).await;
    assert_eq!(
        records,
        vec![
            SinkRecord::DecodeError { length: 7 },
            SinkRecord::Frame { timestamp_ms: 2000, skew_ms: 0 },
        ]
    );
    assert_eq!(session.state(), LinkState::Streaming);
    session.close().await.unwrap();
}

#[tokio::test]
async fn other_characteristics_are_ignored() {
    let transport = MockTransport::with_peripheral();
    let (mut session, sink) = session(&transport, LinkConfig::default());
    session.connect().await.unwrap();

    transport
        .push_event(TransportEvent::Notification {
            characteristic: Uuid::from_u128(0x2a19),
            payload: vec![0x64],
        })
        .await;
    transport.push_notification(codec::encode(&sample_frame(1500)).to_vec()).await;

    let records = sink.wait_for(1, WAIT).await;
    assert_eq!(records, vec![SinkRecord::Frame { timestamp_ms: 1500, skew_ms: 500 }]);
    session.close().await.unwrap();
}

#[tokio::test]
async fn transport_disconnect_releases_link() {
    let transport = MockTransport::with_peripheral();
    let (mut session, _sink) = session(&transport, LinkConfig::default());
    session.connect().await.unwrap();
    let token = session.link_token().unwrap();

    transport.push_disconnect("supervision timeout").await;
    wait_for_state(&session, LinkState::Disconnected).await;

    // Released without the owner calling close().
    assert!(token.is_cancelled());
    assert!(session.peripheral().is_none());
    assert!(session.telemetry_endpoint().is_none());
    assert!(session.command_endpoint().is_none());
    assert!(session.link_token().is_none());
    assert_eq!(transport.calls().last(), Some(&MockCall::Disconnect));
    assert!(!transport.calls().iter().any(|c| matches!(c, MockCall::Unsubscribe(_))));

    let err = session.send_command("hello").await.unwrap_err();
    assert!(err.is_disconnect());

    session.close().await.unwrap();
    assert_eq!(session.state(), LinkState::Disconnected);
    assert_eq!(transport.disconnects(), 1);
}

#[tokio::test]
async fn lost_link_close_ignores_disconnect_failure() {
    let transport = MockTransport::with_peripheral().failing_disconnect("not connected");
    let (mut session, _sink) = session(&transport, LinkConfig::default());
    session.connect().await.unwrap();

    transport.push_disconnect("out of range").await;
    wait_for_state(&session, LinkState::Disconnected).await;

    session.close().await.unwrap();
    assert_eq!(session.state(), LinkState::Disconnected);
}

#[tokio::test]
async fn orderly_close_reports_disconnect_failure() {
    let transport = MockTransport::with_peripheral().failing_disconnect("adapter busy");
    let (mut session, _sink) = session(&transport, LinkConfig::default());
    session.connect().await.unwrap();

    let err = session.close().await.unwrap_err();

    assert!(matches!(err, LinkError::Transport { .. }));
    assert_eq!(session.state(), LinkState::Disconnected);
}

#[tokio::test]
async fn closed_event_channel_ends_in_disconnected() {
    let transport = MockTransport::with_peripheral();
    let (mut session, _sink) = session(&transport, LinkConfig::default());
    session.connect().await.unwrap();

    transport.close_events();

    wait_for_state(&session, LinkState::Disconnected).await;
}

#[tokio::test]
async fn write_on_dead_link_ends_in_disconnected() {
    let transport = MockTransport::with_peripheral().dropping_link_on_write();
    let (mut session, _sink) = session(&transport, LinkConfig::default());
    session.connect().await.unwrap();
    let token = session.link_token().unwrap();

    let err = session.send_command("hello").await.unwrap_err();

    // The link is fully released by the time the error is returned.
    assert!(err.is_disconnect());
    assert_eq!(session.state(), LinkState::Disconnected);
    assert!(token.is_cancelled());
    assert!(session.peripheral().is_none());
    assert_eq!(transport.disconnects(), 1);
    session.close().await.unwrap();
    assert_eq!(transport.disconnects(), 1);
}

/// Sink that takes its time over each frame and notes the session state
/// at the moment the frame was fully handled.
#[derive(Default)]
struct SlowSink {
    states: std::sync::Mutex<Option<watch::Receiver<LinkState>>>,
    started: std::sync::atomic::AtomicBool,
    finished_in: std::sync::Mutex<Vec<LinkState>>,
}

impl TelemetrySink for SlowSink {
    fn report_frame(&self, _frame: crate::TelemetryFrame, _skew_ms: u64) {
        self.started.store(true, std::sync::atomic::Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(100));
        let state = self.states.lock().unwrap().as_ref().map(|rx| *rx.borrow());
        self.finished_in.lock().unwrap().extend(state);
    }

    fn report_decode_error(&self, _length_observed: usize) {}

    fn report_command_error(&self, _detail: &str) {}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn write_side_loss_waits_for_frame_in_flight() {
    let transport = MockTransport::with_peripheral().dropping_link_on_write();
    let sink = Arc::new(SlowSink::default());
    let mut session = LinkSession::new(transport.clone(), LinkConfig::default(), Arc::clone(&sink));
    *sink.states.lock().unwrap() = Some(session.state.subscribe());
    session.connect().await.unwrap();

    transport.push_notification(codec::encode(&sample_frame(2000)).to_vec()).await;
    while !sink.started.load(std::sync::atomic::Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    session.send_command("hello").await.unwrap_err();

    // Disconnected is only published after the frame in flight was handled.
    assert_eq!(session.state(), LinkState::Disconnected);
    let finished_in = sink.finished_in.lock().unwrap().clone();
    assert_eq!(finished_in.len(), 1);
    assert_ne!(finished_in[0], LinkState::Disconnected);
    session.close().await.unwrap();
}

#[tokio::test]
async fn disconnect_skips_unsubscribe() {
    let transport = MockTransport::with_peripheral();
    let (mut session, _sink) = session(&transport, LinkConfig::default());
    session.connect().await.unwrap();

    session.disconnect().await.unwrap();

    assert_eq!(session.state(), LinkState::Disconnected);
    assert!(session.peripheral().is_none());
    assert!(!transport.calls().iter().any(|c| matches!(c, MockCall::Unsubscribe(_))));
    assert_eq!(transport.calls().last(), Some(&MockCall::Disconnect));
}

#[tokio::test]
async fn rejected_write_keeps_streaming() {
    let transport = MockTransport::with_peripheral().rejecting_writes("GATT error 0x03");
    let (mut session, _sink) = session(&transport, LinkConfig::default());
    session.connect().await.unwrap();

    let err = session.send_command("hello").await.unwrap_err();

    assert!(matches!(err, LinkError::CommandWrite { .. }));
    assert_eq!(session.state(), LinkState::Streaming);
    session.close().await.unwrap();
}

#[tokio::test]
async fn write_mode_follows_config() {
    let transport = MockTransport::with_peripheral();
    let config = LinkConfig { write_with_response: false, ..LinkConfig::default() };
    let (mut session, _sink) = session(&transport, config);
    session.connect().await.unwrap();

    session.send_command("status").await.unwrap();

    assert!(transport.calls().contains(&MockCall::Write {
        payload: b"status".to_vec(),
        with_response: false,
    }));
    session.close().await.unwrap();
}

#[tokio::test]
async fn orderly_close_unsubscribes_then_disconnects() {
    let transport = MockTransport::with_peripheral();
    let (mut session, sink) = session(&transport, LinkConfig::default());
    session.connect().await.unwrap();

    session.close().await.unwrap();

    assert_eq!(session.state(), LinkState::Disconnected);
    assert!(session.peripheral().is_none());
    assert!(session.link_token().is_none());
    let calls = transport.calls();
    assert_eq!(
        &calls[calls.len() - 2..],
        &[MockCall::Unsubscribe(TELEMETRY_CHAR_UUID), MockCall::Disconnect]
    );
    assert!(sink.records().is_empty());
}

#[tokio::test]
async fn commands_require_a_connection() {
    let transport = MockTransport::with_peripheral();
    let (mut session, _sink) = session(&transport, LinkConfig::default());

    let err = session.send_command("hello").await.unwrap_err();
    assert!(matches!(err, LinkError::NotConnected { .. }));

    // Closing an idle session is harmless.
    session.close().await.unwrap();
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn reconnect_runs_full_sequence() {
    let transport = MockTransport::with_peripheral();
    let (mut session, _sink) = session(&transport, LinkConfig::default());

    session.connect().await.unwrap();
    transport.push_disconnect("out of range").await;
    wait_for_state(&session, LinkState::Disconnected).await;

    session.connect().await.unwrap();

    assert_eq!(session.state(), LinkState::Streaming);
    let scans = transport.calls().iter().filter(|c| **c == MockCall::Scan).count();
    assert_eq!(scans, 2);
    session.close().await.unwrap();
}

#[tokio::test]
async fn state_updates_start_with_current_state() {
    let transport = MockTransport::with_peripheral();
    let (mut session, _sink) = session(&transport, LinkConfig::default());
    session.connect().await.unwrap();

    let mut updates = Box::pin(session.state_updates());
    assert_eq!(updates.next().await, Some(LinkState::Streaming));

    session.close().await.unwrap();
    assert_eq!(updates.next().await, Some(LinkState::Disconnected));
}
