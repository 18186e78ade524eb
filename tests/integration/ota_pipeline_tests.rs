//! Update pipeline integration tests.
//!
//! Drives [`UpdatePipeline`] through [`FirmwareUpdater::start`] against
//! scripted sources and writers, then once more over the host build of
//! the real adapters.

use prulety::adapters::http_fetch::HttpFetcher;
use prulety::adapters::ota_writer::{OtaWriter, SystemRestart};
use prulety::app::ota::{
    FirmwareUpdater, Rejected, UpdateError, UpdatePhase, UpdatePipeline, UpdateTiming,
};
use prulety::app::ports::{FetchError, FlashError};
use prulety::drivers::watchdog::Watchdog;

use crate::mock_ports::{CountingDelay, CountingRestart, MockWriter, RecordingProgress, ScriptedSource};

type TestPipeline = UpdatePipeline<ScriptedSource, MockWriter, CountingDelay, CountingRestart>;

const URL: &str = "http://fw.local/node.bin";

fn timing(chunk_size: usize) -> UpdateTiming {
    UpdateTiming {
        chunk_size,
        yield_ms: 1,
        settle_ms: 1_000,
    }
}

fn pipeline(source: ScriptedSource, writer: MockWriter) -> TestPipeline {
    UpdatePipeline::new(
        source,
        writer,
        CountingDelay::default(),
        CountingRestart::default(),
        timing(100),
    )
}

// ── Success path ──────────────────────────────────────────────

#[test]
fn full_image_is_committed_and_restarts_once() {
    let mut p = pipeline(ScriptedSource::image(1000), MockWriter::with_capacity(4096));
    let mut progress = RecordingProgress::default();

    assert_eq!(p.start(URL, &mut progress), Ok(()));

    assert_eq!(p.state().phase, UpdatePhase::Succeeded);
    assert_eq!(p.state().bytes_written, 1000);
    assert!(p.writer().committed);
    assert_eq!(p.writer().image, p.source().body);
    assert_eq!(p.restart_port().count, 1);
    assert_eq!(p.source().closed, 1);
    assert_eq!(
        progress.percents(),
        vec![0, 5, 10, 20, 30, 40, 50, 60, 70, 80, 90, 95, 100]
    );
    assert_eq!(progress.reports[0].1, "Starting OTA update...");
    assert_eq!(progress.reports[1].1, "Downloading firmware...");
    assert_eq!(progress.last_message(), Some("Update complete! Rebooting..."));
}

#[test]
fn single_chunk_image_skips_intermediate_reports() {
    let mut p = UpdatePipeline::new(
        ScriptedSource::image(300),
        MockWriter::with_capacity(4096),
        CountingDelay::default(),
        CountingRestart::default(),
        timing(4096),
    );
    let mut progress = RecordingProgress::default();
    p.start(URL, &mut progress).unwrap();
    assert_eq!(progress.percents(), vec![0, 5, 90, 95, 100]);
    assert_eq!(p.restart_port().count, 1);
}

// ── Failure paths ─────────────────────────────────────────────

#[test]
fn truncated_download_aborts_without_restart() {
    let mut p = pipeline(ScriptedSource::truncated(1000, 400), MockWriter::with_capacity(4096));
    let mut progress = RecordingProgress::default();

    assert_eq!(p.start(URL, &mut progress), Ok(()));

    assert_eq!(p.state().phase, UpdatePhase::Idle);
    assert_eq!(
        p.last_failure(),
        Some(UpdateError::Incomplete {
            written: 400,
            expected: 1000
        })
    );
    assert_eq!(progress.reports.last(), Some(&(0, String::from("Download incomplete"))));
    assert_eq!(p.writer().aborted, 1);
    assert!(!p.writer().committed);
    assert_eq!(p.restart_port().count, 0);
    assert!(!progress.percents().contains(&100));
}

#[test]
fn read_error_mid_stream_counts_as_incomplete() {
    let mut source = ScriptedSource::image(1000);
    source.fail_after = Some(500);
    let mut p = pipeline(source, MockWriter::with_capacity(4096));
    let mut progress = RecordingProgress::default();
    p.start(URL, &mut progress).unwrap();
    assert!(matches!(
        p.last_failure(),
        Some(UpdateError::Incomplete { written: 500, .. })
    ));
    assert_eq!(p.restart_port().count, 0);
}

#[test]
fn non_200_status_is_reported_as_download_failure() {
    let mut source = ScriptedSource::image(1000);
    source.status = 404;
    let mut p = pipeline(source, MockWriter::with_capacity(4096));
    let mut progress = RecordingProgress::default();
    p.start(URL, &mut progress).unwrap();

    assert_eq!(p.last_failure(), Some(UpdateError::HttpStatus(404)));
    assert_eq!(progress.last_message(), Some("Failed to download firmware"));
    assert!(!p.writer().is_open);
    assert_eq!(p.source().closed, 1);
}

#[test]
fn connection_refused_is_reported_as_download_failure() {
    let mut source = ScriptedSource::image(1000);
    source.refuse_open = true;
    let mut p = pipeline(source, MockWriter::with_capacity(4096));
    let mut progress = RecordingProgress::default();
    p.start(URL, &mut progress).unwrap();
    assert_eq!(p.last_failure(), Some(UpdateError::Fetch(FetchError::Connect)));
    assert_eq!(progress.percents(), vec![0, 0]);
}

#[test]
fn missing_content_length_is_invalid_size() {
    let mut source = ScriptedSource::image(1000);
    source.content_length = None;
    let mut p = pipeline(source, MockWriter::with_capacity(4096));
    let mut progress = RecordingProgress::default();
    p.start(URL, &mut progress).unwrap();
    assert_eq!(p.last_failure(), Some(UpdateError::InvalidLength));
    assert_eq!(progress.last_message(), Some("Invalid firmware size"));
}

#[test]
fn image_larger_than_slot_is_not_enough_space() {
    let mut p = pipeline(ScriptedSource::image(1000), MockWriter::with_capacity(999));
    let mut progress = RecordingProgress::default();
    p.start(URL, &mut progress).unwrap();
    assert_eq!(
        p.last_failure(),
        Some(UpdateError::StorageOpen(FlashError::InsufficientSpace))
    );
    assert_eq!(progress.last_message(), Some("Not enough space"));
    assert_eq!(p.source().closed, 1);
}

#[test]
fn flash_write_error_aborts() {
    let mut writer = MockWriter::with_capacity(4096);
    writer.fail_write = true;
    let mut p = pipeline(ScriptedSource::image(1000), writer);
    let mut progress = RecordingProgress::default();
    p.start(URL, &mut progress).unwrap();
    assert_eq!(p.last_failure(), Some(UpdateError::WriteFailed(FlashError::WriteFailed)));
    assert_eq!(progress.last_message(), Some("Flash write failed"));
    assert_eq!(p.writer().aborted, 1);
}

#[test]
fn finalize_error_fails_after_verifying_report() {
    let mut writer = MockWriter::with_capacity(4096);
    writer.fail_finalize = true;
    let mut p = pipeline(ScriptedSource::image(1000), writer);
    let mut progress = RecordingProgress::default();
    p.start(URL, &mut progress).unwrap();

    let tail: Vec<u8> = progress.percents().into_iter().rev().take(2).collect();
    assert_eq!(tail, vec![0, 95]);
    assert_eq!(progress.last_message(), Some("Update failed"));
    assert_eq!(p.restart_port().count, 0);
}

#[test]
fn failed_attempt_can_be_retried() {
    let mut p = pipeline(ScriptedSource::truncated(1000, 400), MockWriter::with_capacity(4096));
    let mut progress = RecordingProgress::default();
    p.start(URL, &mut progress).unwrap();
    assert_eq!(p.state().phase, UpdatePhase::Idle);

    progress.reports.clear();
    assert_eq!(p.start(URL, &mut progress), Ok(()));
    assert_eq!(progress.percents()[0], 0);
    assert_eq!(p.source().opened, 2);
}

// ── Single slot ───────────────────────────────────────────────

#[test]
fn second_request_during_download_is_rejected_without_side_effects() {
    let mut p = pipeline(ScriptedSource::image(1000), MockWriter::with_capacity(4096));
    let mut progress = RecordingProgress::default();

    p.begin(URL, &mut progress).unwrap();
    p.step(&mut progress);
    let before = *p.state();
    let reports_before = progress.reports.len();

    let mut second = RecordingProgress::default();
    assert_eq!(
        p.begin("http://fw.local/other.bin", &mut second),
        Err(Rejected::AlreadyInProgress)
    );
    assert_eq!(*p.state(), before);
    assert_eq!(progress.reports.len(), reports_before);
    assert!(second.reports.is_empty());
    assert_eq!(p.source().opened, 1);

    while matches!(p.step(&mut progress), UpdatePhase::Writing | UpdatePhase::Verifying) {}
    assert_eq!(p.state().phase, UpdatePhase::Succeeded);
}

#[test]
fn succeeded_pipeline_refuses_further_requests() {
    let mut p = pipeline(ScriptedSource::image(100), MockWriter::with_capacity(4096));
    let mut progress = RecordingProgress::default();
    p.start(URL, &mut progress).unwrap();
    assert_eq!(p.start(URL, &mut progress), Err(Rejected::AlreadyInProgress));
    assert_eq!(p.restart_port().count, 1);
}

// ── Host adapters end to end ──────────────────────────────────

#[test]
fn host_adapters_carry_an_image_into_the_slot() {
    let image: Vec<u8> = (0..5000u32).map(|i| (i * 7 % 256) as u8).collect();
    let mut fetcher = HttpFetcher::new(Watchdog::new());
    fetcher.serve(URL, image.clone());

    let mut p = UpdatePipeline::new(
        fetcher,
        OtaWriter::with_capacity(8192),
        CountingDelay::default(),
        SystemRestart::default(),
        timing(1024),
    );
    let mut progress = RecordingProgress::default();
    p.start(URL, &mut progress).unwrap();

    assert_eq!(p.state().phase, UpdatePhase::Succeeded);
    assert_eq!(p.writer().committed(), Some(image.as_slice()));
    assert_eq!(p.restart_port().requested(), 1);
    assert!(!p.source().is_open());
}

#[test]
fn host_adapters_report_unknown_image() {
    let mut p = UpdatePipeline::new(
        HttpFetcher::new(Watchdog::new()),
        OtaWriter::with_capacity(8192),
        CountingDelay::default(),
        SystemRestart::default(),
        timing(1024),
    );
    let mut progress = RecordingProgress::default();
    p.start("http://fw.local/missing.bin", &mut progress).unwrap();
    assert_eq!(p.last_failure(), Some(UpdateError::HttpStatus(404)));
    assert!(p.writer().committed().is_none());
    assert_eq!(p.restart_port().requested(), 0);
}
