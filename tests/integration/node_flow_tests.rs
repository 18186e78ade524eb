//! Whole-node flow on the host build of every adapter.
//!
//! Mirrors the control loop in `main.rs`: stored config → identity →
//! WiFi → MQTT session, with the beam sampled every 5 ms and a firmware
//! update delivered over the loopback broker.

use core::cell::Cell;
use core::convert::Infallible;
use std::rc::Rc;

use embedded_hal::digital::{ErrorType, InputPin};

use prulety::adapters::device_id;
use prulety::adapters::http_fetch::HttpFetcher;
use prulety::adapters::mqtt::MqttAdapter;
use prulety::adapters::nvs::NvsAdapter;
use prulety::adapters::ota_writer::{OtaWriter, SystemRestart};
use prulety::adapters::wifi::WifiAdapter;
use prulety::app::ota::{FirmwareUpdater, UpdatePhase, UpdatePipeline, UpdateTiming};
use prulety::app::ports::{ConfigPort, LinkStatusPort, SessionPort};
use prulety::app::session::{DeviceIdentity, SessionManager, SessionTiming};
use prulety::config::NodeConfig;
use prulety::detection::ClusterDetector;
use prulety::drivers::ir_beam::IrBeam;
use prulety::drivers::watchdog::{FeedingDelay, Watchdog};

use crate::mock_ports::CountingDelay;

type HostPipeline = UpdatePipeline<HttpFetcher, OtaWriter, FeedingDelay<CountingDelay>, SystemRestart>;
type HostSession = SessionManager<MqttAdapter, HostPipeline>;

/// Receiver output driven by a list of `(from_ms, to_ms)` LOW windows.
struct BeamScript {
    windows: Vec<(u64, u64)>,
    clock: Rc<Cell<u64>>,
}

impl ErrorType for BeamScript {
    type Error = Infallible;
}

impl InputPin for BeamScript {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        self.is_low().map(|low| !low)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        let t = self.clock.get();
        Ok(self.windows.iter().any(|&(from, to)| t >= from && t < to))
    }
}

struct Node {
    config: NodeConfig,
    watchdog: Watchdog,
    session: HostSession,
}

/// `images` are served by the loopback HTTP server as `(url, body)`.
fn boot(nvs: &NvsAdapter, images: Vec<(&str, Vec<u8>)>) -> Node {
    let config = NodeConfig::load_or_default(nvs);
    let identity = DeviceIdentity {
        device_id: device_id::resolve(&config, &device_id::read_mac()),
        firmware_version: config.firmware_version.clone(),
    };
    let watchdog = Watchdog::new();
    let mut fetcher = HttpFetcher::new(watchdog.clone());
    for (url, body) in images {
        fetcher.serve(url, body);
    }
    let pipeline = UpdatePipeline::new(
        fetcher,
        OtaWriter::new(),
        FeedingDelay::new(CountingDelay::default(), watchdog.clone()),
        SystemRestart::default(),
        UpdateTiming::from_config(&config),
    );
    let session = SessionManager::new(
        MqttAdapter::new(&config),
        pipeline,
        identity,
        SessionTiming::from_config(&config),
    );
    Node {
        config,
        watchdog,
        session,
    }
}

fn published_on<'a>(session: &'a HostSession, leaf: &str) -> Vec<&'a [u8]> {
    session
        .session()
        .published()
        .iter()
        .filter(|(t, _)| t.ends_with(leaf))
        .map(|(_, body)| body.as_slice())
        .collect()
}

#[test]
fn first_boot_uses_mac_identity_and_defaults() {
    let nvs = NvsAdapter::new().unwrap();
    let node = boot(&nvs, Vec::new());
    assert_eq!(node.session.identity().device_id, "BIRD-EFCAFE");
    assert_eq!(node.session.topics().command(), "prulety/BIRD-EFCAFE/command");
    assert_eq!(node.config, NodeConfig::default());
}

#[test]
fn stored_device_id_overrides_mac() {
    let nvs = NvsAdapter::new().unwrap();
    let stored = NodeConfig {
        device_id: String::from("BIRD-FEEDER"),
        cluster_gap_ms: 250,
        ..NodeConfig::default()
    };
    nvs.save(&stored).unwrap();

    let node = boot(&nvs, Vec::new());
    assert_eq!(node.session.identity().device_id, "BIRD-FEEDER");
    assert_eq!(node.config.cluster_gap_ms, 250);
}

#[test]
fn beam_clusters_become_detections_on_the_broker() {
    let nvs = NvsAdapter::new().unwrap();
    let mut node = boot(&nvs, Vec::new());

    let mut wifi = WifiAdapter::new("meadow", "password1").unwrap();
    wifi.connect(0).unwrap();
    assert!(!wifi.is_online());
    wifi.poll(0);
    assert!(wifi.is_online());
    node.session.initialize(0);
    assert_eq!(
        node.session.session().subscriptions(),
        &[
            String::from("prulety/BIRD-EFCAFE/command"),
            String::from("prulety/BIRD-EFCAFE/response"),
        ]
    );

    // Bird one flaps three times; bird two arrives well after the gap.
    let clock = Rc::new(Cell::new(0u64));
    let mut beam = IrBeam::new(BeamScript {
        windows: vec![(100, 120), (150, 170), (260, 280), (900, 940)],
        clock: clock.clone(),
    });
    let mut detector = ClusterDetector::new(u64::from(node.config.cluster_gap_ms));
    let step = u64::from(node.config.sensor_poll_interval_ms);

    let mut now = 0;
    while now <= 1_500 {
        clock.set(now);
        if let Some(event) = detector.poll(beam.triggered(), now) {
            node.session.publish_event(event, now);
        }
        wifi.poll(now);
        if wifi.is_online() {
            node.session.tick(now);
        }
        now += step;
    }

    assert_eq!(detector.event_count(), 2);
    assert_eq!(
        published_on(&node.session, "/bird_detection"),
        vec![
            &br#"{"payload":{"timestamp":100}}"#[..],
            &br#"{"payload":{"timestamp":900}}"#[..],
        ]
    );
    assert_eq!(beam.read_errors(), 0);
}

#[test]
fn node_without_wifi_credentials_keeps_counting_offline() {
    let nvs = NvsAdapter::new().unwrap();
    let mut node = boot(&nvs, Vec::new());

    let mut wifi = WifiAdapter::new("", "").unwrap();
    assert!(wifi.connect(0).is_err());

    let clock = Rc::new(Cell::new(0u64));
    let mut beam = IrBeam::new(BeamScript {
        windows: vec![(100, 140), (700, 720)],
        clock: clock.clone(),
    });
    let mut detector = ClusterDetector::new(u64::from(node.config.cluster_gap_ms));
    let step = u64::from(node.config.sensor_poll_interval_ms);

    let mut now = 0;
    while now <= 1_500 {
        node.watchdog.feed();
        clock.set(now);
        if let Some(event) = detector.poll(beam.triggered(), now) {
            node.session.publish_event(event, now);
        }
        wifi.poll(now);
        if wifi.is_online() {
            node.session.tick(now);
        }
        now += step;
    }

    assert_eq!(detector.event_count(), 2);
    assert!(!wifi.is_online());
    assert!(!node.session.is_connected());
    assert!(node.session.session().published().is_empty());
    assert_eq!(node.watchdog.feed_count(), 301);
}

#[test]
fn ota_over_loopback_broker_restarts_into_new_image() {
    let image: Vec<u8> = (0..10_000u32).map(|i| (i % 199) as u8).collect();
    let nvs = NvsAdapter::new().unwrap();
    let mut node = boot(&nvs, vec![("https://fw.example/node-2.bin", image.clone())]);
    node.session.initialize(0);

    assert!(node.session.session().inject(
        "prulety/BIRD-EFCAFE/command",
        br#"{"type":"ota_update","url":"https://fw.example/node-2.bin"}"#,
    ));
    node.session.tick(20);

    let pipeline = node.session.updater();
    assert_eq!(pipeline.state().phase, UpdatePhase::Succeeded);
    assert_eq!(pipeline.writer().committed(), Some(image.as_slice()));
    assert_eq!(pipeline.restart_port().requested(), 1);

    // Request and response head, ten 1 KiB reads, a yield after each of
    // the first nine chunks, then the settle pause.
    assert_eq!(node.watchdog.feed_count(), 2 + 10 + 9 + 1);

    let progress = published_on(&node.session, "/ota_progress");
    let last: serde_json::Value = serde_json::from_slice(progress[progress.len() - 1]).unwrap();
    assert_eq!(last["progress"], 100);
    assert_eq!(last["message"], "Update complete! Rebooting...");
}

#[test]
fn broker_outage_drops_telemetry_then_recovers() {
    let nvs = NvsAdapter::new().unwrap();
    let mut node = boot(&nvs, Vec::new());
    node.session.initialize(0);

    node.session.session_mut().set_broker(false);
    node.session.tick(1_000);
    assert!(!node.session.is_connected());
    node.session.publish_event(prulety::detection::EventId(1), 1_100);
    assert!(published_on(&node.session, "/bird_detection").is_empty());

    node.session.session_mut().set_broker(true);
    node.session.tick(5_500);
    assert!(node.session.is_connected());
    assert_eq!(node.session.session().subscriptions().len(), 2);
    assert_eq!(published_on(&node.session, "/register").len(), 2);
    assert!(node.session.session().is_connected());
}
