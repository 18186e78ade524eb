//! Průlety sensor node: main entry point.
//!
//! Single cooperative control loop over hexagonal adapters.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                     Adapters (outer ring)                     │
//! │                                                               │
//! │  MqttAdapter   HttpFetcher   OtaWriter   WifiAdapter   NVS    │
//! │  (Session)     (Source)      (Writer)    (LinkStatus)  (Cfg)  │
//! │                                                               │
//! │  ──────────────── Port Trait Boundary ───────────────────     │
//! │                                                               │
//! │  ┌─────────────────────────────────────────────────────┐      │
//! │  │  SessionManager ──owns──▶ UpdatePipeline            │      │
//! │  └─────────────────────────────────────────────────────┘      │
//! │                                                               │
//! │  IrBeam ──▶ ClusterDetector ──event──▶ SessionManager         │
//! └───────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use anyhow::Result;
use log::{info, warn};

use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::delay::FreeRtos;
use esp_idf_svc::hal::gpio::{AnyInputPin, PinDriver};
use esp_idf_svc::hal::peripherals::Peripherals;

use prulety::adapters::device_id;
use prulety::adapters::http_fetch::HttpFetcher;
use prulety::adapters::mqtt::MqttAdapter;
use prulety::adapters::nvs::NvsAdapter;
use prulety::adapters::ota_writer::{self, OtaWriter, SystemRestart};
use prulety::adapters::time::UptimeClock;
use prulety::adapters::wifi::WifiAdapter;
use prulety::app::ota::{UpdatePipeline, UpdateTiming};
use prulety::app::ports::LinkStatusPort;
use prulety::app::session::{DeviceIdentity, SessionManager, SessionTiming};
use prulety::config::NodeConfig;
use prulety::detection::ClusterDetector;
use prulety::drivers::ir_beam::{self, IrBeam};
use prulety::drivers::watchdog::{FeedingDelay, Watchdog};
use prulety::error::Error;
use prulety::pins;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  Průlety node v{}                 ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    ota_writer::mark_running_valid();
    let watchdog = Watchdog::new();
    let clock = UptimeClock::new();

    // ── 2. Config + identity ──────────────────────────────────
    let nvs = NvsAdapter::new().map_err(Error::from)?;
    let config = NodeConfig::load_or_default(&nvs);
    let mac = device_id::read_mac();
    let identity = DeviceIdentity {
        device_id: device_id::resolve(&config, &mac),
        firmware_version: config.firmware_version.clone(),
    };
    info!("Device ID: {} (fw {})", identity.device_id, identity.firmware_version);

    // ── 3. Peripherals ────────────────────────────────────────
    let peripherals = Peripherals::take()?;
    ir_beam::start_carrier().map_err(Error::from)?;
    // SAFETY: the receiver pin is not claimed by any other driver.
    let sensor_pin = PinDriver::input(unsafe { AnyInputPin::new(pins::IR_SENSOR_GPIO) })?;
    let mut beam = IrBeam::new(sensor_pin);

    let sys_loop = EspSystemEventLoop::take()?;
    let mut wifi = WifiAdapter::new(
        peripherals.modem,
        sys_loop,
        &config.wifi_ssid,
        &config.wifi_password,
    )
    .map_err(Error::from)?;
    if wifi.connect(clock.now_ms()).is_err() {
        warn!("WiFi: offline for now, detection continues");
    }

    // ── 4. Domain core ────────────────────────────────────────
    let pipeline = UpdatePipeline::new(
        HttpFetcher::new(watchdog.clone()),
        OtaWriter::new(),
        FeedingDelay::new(FreeRtos, watchdog.clone()),
        SystemRestart::default(),
        UpdateTiming::from_config(&config),
    );
    let mut session = SessionManager::new(
        MqttAdapter::new(&config, watchdog.clone()),
        pipeline,
        identity,
        SessionTiming::from_config(&config),
    );
    let mut detector = ClusterDetector::new(u64::from(config.cluster_gap_ms));

    // ── 5. Control loop ───────────────────────────────────────
    let link_interval = u64::from(config.link_report_interval_ms);
    let mut last_link_report = 0u64;
    let mut session_started = false;
    info!("Entering control loop (poll {} ms)", config.sensor_poll_interval_ms);

    loop {
        watchdog.feed();
        let now = clock.now_ms();

        if let Some(event) = detector.poll(beam.triggered(), now) {
            info!("Beam: passage #{}", event.0);
            session.publish_event(event, now);
        }

        wifi.poll(now);
        if wifi.is_online() {
            if !session_started {
                session.initialize(now);
                session_started = true;
            }
            session.tick(now);
            if now.saturating_sub(last_link_report) > link_interval {
                if let Some(status) = wifi.status() {
                    session.publish_link_status(&status, now);
                }
                last_link_report = now;
            }
        }

        FreeRtos::delay_ms(config.sensor_poll_interval_ms);
    }
}
