//! Session manager integration tests.
//!
//! A recording session port paired with a real [`UpdatePipeline`] over
//! scripted firmware ports.

use prulety::app::ota::{FirmwareUpdater, UpdatePhase, UpdatePipeline, UpdateTiming};
use prulety::app::session::{DeviceIdentity, SessionManager, SessionTiming};
use prulety::detection::EventId;

use crate::mock_ports::{
    CountingDelay, CountingRestart, MockSession, MockWriter, ScriptedSource, SessionCall,
};

type Pipeline = UpdatePipeline<ScriptedSource, MockWriter, CountingDelay, CountingRestart>;
type Manager = SessionManager<MockSession, Pipeline>;

const ID: &str = "BIRD-112233";

fn manager(session: MockSession, source: ScriptedSource) -> Manager {
    let pipeline = UpdatePipeline::new(
        source,
        MockWriter::with_capacity(1 << 20),
        CountingDelay::default(),
        CountingRestart::default(),
        UpdateTiming {
            chunk_size: 256,
            ..UpdateTiming::default()
        },
    );
    let identity = DeviceIdentity {
        device_id: String::from(ID),
        firmware_version: String::from("2.1.0"),
    };
    SessionManager::new(session, pipeline, identity, SessionTiming::default())
}

fn topic(leaf: &str) -> String {
    format!("prulety/{}/{}", ID, leaf)
}

fn progress_values(m: &Manager) -> Vec<(u64, String)> {
    m.session()
        .published_on("/ota_progress")
        .iter()
        .map(|body| {
            let v: serde_json::Value = serde_json::from_str(body).expect("valid json");
            (
                v["progress"].as_u64().expect("progress"),
                v["message"].as_str().expect("message").to_string(),
            )
        })
        .collect()
}

// ── Handshake ─────────────────────────────────────────────────

#[test]
fn reconnect_subscribes_and_registers_before_anything_else() {
    let mut m = manager(MockSession::refusing(), ScriptedSource::image(10));
    m.initialize(0);
    assert!(!m.is_connected());

    // Dropped, not queued for later.
    m.publish_event(EventId(1), 100);

    m.session_mut().refuse_connect = false;
    m.tick(5_001);
    assert!(m.is_connected());
    m.publish_event(EventId(2), 5_002);

    let calls = &m.session().calls;
    let client_id = format!("ESP32_{}", ID);
    assert_eq!(
        calls[..4],
        [
            SessionCall::Connect(client_id.clone()),
            SessionCall::Connect(client_id),
            SessionCall::Subscribe(topic("command")),
            SessionCall::Subscribe(topic("response")),
        ]
    );
    assert_eq!(
        calls[4],
        SessionCall::Publish {
            topic: topic("register"),
            body: format!(r#"{{"type":"register","device_id":"{}","firmware":"2.1.0"}}"#, ID),
        }
    );
    assert_eq!(
        calls[5],
        SessionCall::Publish {
            topic: topic("bird_detection"),
            body: String::from(r#"{"payload":{"timestamp":5002}}"#),
        }
    );
    assert_eq!(calls.len(), 6);
}

#[test]
fn lost_broker_is_retried_on_interval_only() {
    let mut m = manager(MockSession::new(), ScriptedSource::image(10));
    m.initialize(0);
    assert_eq!(m.state().last_reconnect_attempt_ms, 0);

    m.session_mut().up = false;
    m.session_mut().refuse_connect = true;
    m.tick(1_000);
    assert!(!m.is_connected());
    let connects = |m: &Manager| {
        m.session()
            .calls
            .iter()
            .filter(|c| matches!(c, SessionCall::Connect(_)))
            .count()
    };
    assert_eq!(connects(&m), 1, "1000 ms since boot is inside the interval");

    m.tick(5_001);
    assert_eq!(connects(&m), 2);
    m.tick(9_000);
    assert_eq!(connects(&m), 2);
    m.tick(10_002);
    assert_eq!(connects(&m), 3);
    assert_eq!(m.state().last_reconnect_attempt_ms, 10_002);
}

#[test]
fn heartbeat_and_link_report_shapes() {
    use prulety::app::ports::LinkStatus;

    let mut m = manager(MockSession::new(), ScriptedSource::image(10));
    m.initialize(0);
    m.tick(30_001);
    assert_eq!(
        m.session().published_on("/status"),
        vec![String::from(r#"{"status":"online","uptime":30001}"#)]
    );

    let mut status = LinkStatus::default();
    status.ssid.push_str("garden").unwrap();
    status.bssid.push_str("AA:BB:CC:DD:EE:FF").unwrap();
    status.ip.push_str("10.0.0.7").unwrap();
    status.rssi = -71;
    m.publish_link_status(&status, 42);
    assert_eq!(
        m.session().published_on("/data"),
        vec![String::from(
            r#"{"payload":{"ssid":"garden","bssid":"AA:BB:CC:DD:EE:FF","rssi":-71,"ip":"10.0.0.7","timestamp":42}}"#
        )]
    );
}

// ── Command dispatch ──────────────────────────────────────────

#[test]
fn unknown_or_invalid_commands_change_nothing() {
    let mut m = manager(MockSession::new(), ScriptedSource::image(10));
    m.initialize(0);
    let before = *m.updater().state();
    let publishes = m.session().publish_count();

    for payload in [
        &br#"{"type":"reboot"}"#[..],
        br#"{"url":"http://fw/n.bin"}"#,
        br#"{"type":"ota_update"}"#,
        br#"{"type":"ota_update","url":"ftp://fw/n.bin"}"#,
        br#"{"type":"ota_update","url":"   "}"#,
        b"not json",
        b"",
    ] {
        m.dispatch(&topic("command"), payload);
    }
    m.dispatch(&topic("response"), br#"{"type":"ota_update","url":"http://fw/n.bin"}"#);

    assert_eq!(*m.updater().state(), before);
    assert_eq!(m.session().publish_count(), publishes);
    assert_eq!(m.updater().source().opened, 0);
}

#[test]
fn responses_and_plain_commands_are_acknowledged_only() {
    let mut m = manager(MockSession::new(), ScriptedSource::image(10));
    m.initialize(0);
    let publishes = m.session().publish_count();
    m.dispatch(&topic("response"), br#"{"type":"registered"}"#);
    m.dispatch(&topic("response"), br#"{"type":"ack"}"#);
    m.dispatch(&topic("command"), br#"{"type":"command"}"#);
    assert_eq!(m.session().publish_count(), publishes);
    assert_eq!(m.updater().state().phase, UpdatePhase::Idle);
}

#[test]
fn ota_command_streams_progress_to_broker() {
    let mut session = MockSession::new();
    session.push_inbound(
        &topic("command"),
        br#"{"type":"ota_update","url":"http://fw.local/node.bin"}"#,
    );
    let mut m = manager(session, ScriptedSource::image(2048));
    m.initialize(0);
    m.tick(10);

    assert_eq!(m.updater().state().phase, UpdatePhase::Succeeded);
    assert_eq!(m.updater().restart_port().count, 1);

    let progress = progress_values(&m);
    let percents: Vec<u64> = progress.iter().map(|(p, _)| *p).collect();
    assert_eq!(percents.first(), Some(&0));
    assert_eq!(percents.last(), Some(&100));
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    assert!(percents.iter().all(|p| p % 5 == 0));
    assert_eq!(
        progress.last().map(|(_, msg)| msg.as_str()),
        Some("Update complete! Rebooting...")
    );
}

#[test]
fn failed_update_reports_zero_and_accepts_next_request() {
    let mut m = manager(MockSession::new(), ScriptedSource::truncated(1000, 400));
    m.initialize(0);
    m.dispatch(&topic("command"), br#"{"type":"ota_update","url":"http://fw/n.bin"}"#);

    assert_eq!(
        progress_values(&m).last(),
        Some(&(0, String::from("Download incomplete")))
    );
    assert_eq!(m.updater().state().phase, UpdatePhase::Idle);
    assert_eq!(m.updater().restart_port().count, 0);

    m.dispatch(&topic("command"), br#"{"type":"ota_update","url":"http://fw/n.bin"}"#);
    assert_eq!(m.updater().source().opened, 2);
}

#[test]
fn update_while_offline_still_runs_but_publishes_nothing() {
    let mut m = manager(MockSession::new(), ScriptedSource::image(512));
    m.initialize(0);
    let publishes = m.session().publish_count();
    m.session_mut().up = false;

    m.dispatch(&topic("command"), br#"{"type":"ota_update","url":"http://fw/n.bin"}"#);

    assert_eq!(m.updater().state().phase, UpdatePhase::Succeeded);
    assert_eq!(m.session().publish_count(), publishes);
}
