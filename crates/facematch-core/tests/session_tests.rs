//! End-to-end session tests with scripted capabilities.
//!
//! Frames are solid-colour images. The fake locator reports a face when the
//! blue channel is bright, and the fake embedder embeds the crop's mean colour,
//! so identical colours score 1.0.

use facematch_core::{
    BoundingBox, DetectorError, Embedding, EmbeddingProvider, FaceLocator, FrameDisposition,
    FrameOutcome, FrameTask, PixelLayout, RawFrame, RecognizerError, ReferenceError, Rotation,
    ScoreReport, Session, SessionConfig, SessionError, NO_FACE_SENTINEL,
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

const FACE: [u8; 3] = [200, 50, 180];
const STRANGER: [u8; 3] = [0, 255, 130];
const NO_FACE: [u8; 3] = [90, 90, 20];
/// Red value that makes the locator block until released.
const GATE_RED: u8 = 1;
/// Green value that makes the locator return a box outside the image.
const DEGENERATE_GREEN: u8 = 7;
/// Green value that makes the locator panic.
const PANIC_GREEN: u8 = 3;
const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Default)]
struct Probe {
    locate_calls: Arc<AtomicUsize>,
    embed_calls: Arc<AtomicUsize>,
    locator_dropped: Arc<AtomicBool>,
}

struct Gate {
    entered: mpsc::Sender<()>,
    release: mpsc::Receiver<()>,
}

struct ColorLocator {
    probe: Probe,
    gate: Option<Gate>,
}

impl FaceLocator for ColorLocator {
    fn locate_faces(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        self.probe.locate_calls.fetch_add(1, Ordering::SeqCst);
        let Rgb([r, g, b]) = *image.get_pixel(0, 0);
        let (w, h) = (image.width() as f32, image.height() as f32);

        if r == GATE_RED {
            if let Some(gate) = &self.gate {
                let _ = gate.entered.send(());
                let _ = gate.release.recv();
            }
        }
        if g == PANIC_GREEN {
            panic!("locator crashed");
        }
        if b < 128 {
            return Ok(vec![]);
        }
        if g == DEGENERATE_GREEN {
            return Ok(vec![BoundingBox::new(w + 10.0, 0.0, w + 40.0, h)]);
        }
        Ok(vec![
            BoundingBox::new(w / 4.0, h / 4.0, w * 3.0 / 4.0, h * 3.0 / 4.0),
            BoundingBox::new(0.0, 0.0, 2.0, 2.0),
        ])
    }
}

impl Drop for ColorLocator {
    fn drop(&mut self) {
        self.probe.locator_dropped.store(true, Ordering::SeqCst);
    }
}

struct MeanColorEmbedder {
    probe: Probe,
}

impl EmbeddingProvider for MeanColorEmbedder {
    fn input_size(&self) -> (u32, u32) {
        (16, 16)
    }

    fn dimension(&self) -> usize {
        3
    }

    fn embed(&mut self, face: &RgbImage) -> Result<Embedding, RecognizerError> {
        self.probe.embed_calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(face.dimensions(), self.input_size());
        let mut sum = [0.0f32; 3];
        for p in face.pixels() {
            for c in 0..3 {
                sum[c] += p.0[c] as f32;
            }
        }
        Ok(Embedding::normalized(sum.to_vec())?)
    }
}

fn png(color: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(64, 48, Rgb(color));
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

fn frame(sequence: u64, color: [u8; 3]) -> FrameTask {
    let (width, height) = (32u32, 24u32);
    FrameTask {
        frame: RawFrame {
            data: color.repeat((width * height) as usize),
            width,
            height,
            layout: PixelLayout::Rgb8,
        },
        rotation: Rotation::Deg90,
        sequence,
    }
}

fn start(probe: &Probe, gate: Option<Gate>) -> (Session, mpsc::Receiver<ScoreReport>) {
    let (tx, rx) = mpsc::channel();
    let session = Session::start(
        ColorLocator { probe: probe.clone(), gate },
        MeanColorEmbedder { probe: probe.clone() },
        move |report: ScoreReport| {
            let _ = tx.send(report);
        },
    )
    .unwrap();
    (session, rx)
}

fn similarity(report: &ScoreReport) -> f32 {
    report.outcome.similarity().expect("expected a scored frame")
}

#[test]
fn matching_face_scores_above_threshold() {
    let probe = Probe::default();
    let (mut session, rx) = start(&probe, None);

    let reference = session.configure(SessionConfig::new(png(FACE))).unwrap();
    assert_eq!(reference.dimension(), 3);
    assert!(session.is_ready());

    assert_eq!(session.submit_frame(frame(1, FACE)), FrameDisposition::Accepted);
    let report = rx.recv_timeout(TIMEOUT).unwrap();

    assert_eq!(report.sequence, 1);
    assert!(similarity(&report) >= 0.5);
    assert!((similarity(&report) - 1.0).abs() < 1e-4);
    assert!(report.outcome.matched());
}

#[test]
fn stranger_scores_below_threshold() {
    let probe = Probe::default();
    let (mut session, rx) = start(&probe, None);
    session.configure(SessionConfig::new(png(FACE))).unwrap();

    session.submit_frame(frame(1, STRANGER));
    let report = rx.recv_timeout(TIMEOUT).unwrap();

    let sim = similarity(&report);
    assert!(sim < 0.5, "similarity {sim}");
    assert!((-1.0..=1.0).contains(&sim));
    assert!(!report.outcome.matched());
}

#[test]
fn frame_without_face_emits_sentinel_without_embedding() {
    let probe = Probe::default();
    let (mut session, rx) = start(&probe, None);
    session.configure(SessionConfig::new(png(FACE))).unwrap();
    let embeds_after_setup = probe.embed_calls.load(Ordering::SeqCst);
    assert_eq!(embeds_after_setup, 1);

    session.submit_frame(frame(3, NO_FACE));
    let report = rx.recv_timeout(TIMEOUT).unwrap();

    assert_eq!(report.outcome, FrameOutcome::NoFaceDetected);
    assert_eq!(report.outcome.legacy_value(), NO_FACE_SENTINEL);
    assert!(!report.outcome.matched());
    assert_eq!(probe.embed_calls.load(Ordering::SeqCst), embeds_after_setup);
    assert_eq!(session.stats().no_face, 1);
}

#[test]
fn faceless_reference_fails_setup_and_blocks_scoring() {
    let probe = Probe::default();
    let (mut session, rx) = start(&probe, None);

    let err = session.configure(SessionConfig::new(png(NO_FACE))).unwrap_err();
    assert!(matches!(err, SessionError::Reference(ReferenceError::NoFaceInReference)));
    assert!(!session.is_ready());

    for seq in 0..5 {
        assert_eq!(session.submit_frame(frame(seq, FACE)), FrameDisposition::NotReady);
    }
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(session.stats().not_ready, 5);

    // A new reference recovers the session.
    session.configure(SessionConfig::new(png(FACE))).unwrap();
    session.submit_frame(frame(10, FACE));
    assert!(rx.recv_timeout(TIMEOUT).unwrap().outcome.matched());
}

#[test]
fn frames_before_configuration_are_discarded() {
    let probe = Probe::default();
    let (session, rx) = start(&probe, None);

    assert_eq!(session.submit_frame(frame(1, FACE)), FrameDisposition::NotReady);
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(probe.locate_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn busy_worker_keeps_only_latest_frame() {
    let probe = Probe::default();
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let gate = Gate { entered: entered_tx, release: release_rx };
    let (mut session, rx) = start(&probe, Some(gate));
    session.configure(SessionConfig::new(png(FACE))).unwrap();

    let slow = [GATE_RED, 50, 180];
    assert_eq!(session.submit_frame(frame(1, slow)), FrameDisposition::Accepted);
    entered_rx.recv_timeout(TIMEOUT).unwrap();
    assert!(session.stats().busy);

    assert_eq!(session.submit_frame(frame(2, FACE)), FrameDisposition::Accepted);
    for seq in 3..=10 {
        assert_eq!(
            session.submit_frame(frame(seq, FACE)),
            FrameDisposition::Replaced { dropped_sequence: seq - 1 }
        );
    }
    release_tx.send(()).unwrap();

    let first = rx.recv_timeout(TIMEOUT).unwrap();
    let second = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(first.sequence, 1);
    assert_eq!(second.sequence, 10);
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

    let stats = session.stats();
    assert_eq!(stats.submitted, 10);
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.dropped, 8);
}

#[test]
fn degenerate_crop_skips_frame_and_pipeline_continues() {
    let probe = Probe::default();
    let (mut session, rx) = start(&probe, None);
    session.configure(SessionConfig::new(png(FACE))).unwrap();

    session.submit_frame(frame(1, [200, DEGENERATE_GREEN, 180]));
    // Wait for the skip to register before posting the next frame.
    let deadline = Instant::now() + TIMEOUT;
    while session.stats().skipped == 0 {
        assert!(Instant::now() < deadline, "frame was never skipped");
        std::thread::sleep(Duration::from_millis(5));
    }

    session.submit_frame(frame(2, FACE));
    let report = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(report.sequence, 2);
    assert!(report.outcome.matched());
    assert_eq!(session.stats().skipped, 1);
}

#[test]
fn threshold_from_config_applies() {
    let probe = Probe::default();
    let (mut session, rx) = start(&probe, None);
    let config = SessionConfig {
        similarity_threshold: 0.3,
        ..SessionConfig::new(png(FACE))
    };
    session.configure(config).unwrap();
    assert_eq!(session.config().unwrap().similarity_threshold, 0.3);

    session.submit_frame(frame(1, STRANGER));
    assert!(rx.recv_timeout(TIMEOUT).unwrap().outcome.matched());
}

#[test]
fn invalid_config_is_rejected() {
    let probe = Probe::default();
    let (mut session, _rx) = start(&probe, None);

    let config = SessionConfig {
        reference_rotation: 30,
        ..SessionConfig::new(png(FACE))
    };
    assert!(matches!(session.configure(config), Err(SessionError::Config(_))));

    let garbage = SessionConfig::new(vec![0xde, 0xad, 0xbe, 0xef]);
    assert!(matches!(session.configure(garbage), Err(SessionError::Image(_))));
    assert!(session.config().is_none());
}

#[test]
fn stop_rejects_frames_and_releases_capabilities() {
    let probe = Probe::default();
    let (mut session, _rx) = start(&probe, None);
    session.configure(SessionConfig::new(png(FACE))).unwrap();

    session.stop();
    assert_eq!(session.submit_frame(frame(1, FACE)), FrameDisposition::Stopped);
    let stats = session.stats();
    assert_eq!(stats.submitted, 1);
    assert_eq!(stats.dropped, 1);
    assert!(stats.settled());
    assert!(matches!(
        session.configure(SessionConfig::new(png(FACE))),
        Err(SessionError::Stopped)
    ));

    session.join();
    assert!(probe.locator_dropped.load(Ordering::SeqCst));
}

#[test]
fn stop_does_not_wait_for_in_flight_frame() {
    let probe = Probe::default();
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let gate = Gate { entered: entered_tx, release: release_rx };
    let (mut session, rx) = start(&probe, Some(gate));
    session.configure(SessionConfig::new(png(FACE))).unwrap();

    session.submit_frame(frame(1, [GATE_RED, 50, 180]));
    entered_rx.recv_timeout(TIMEOUT).unwrap();

    // Returns while the worker is still blocked in the locator.
    session.stop();
    assert!(!probe.locator_dropped.load(Ordering::SeqCst));

    release_tx.send(()).unwrap();
    session.join();
    assert!(probe.locator_dropped.load(Ordering::SeqCst));
    // The abandoned frame's result is never delivered.
    assert!(rx.try_recv().is_err());
}

#[test]
fn panicking_locator_closes_session() {
    let probe = Probe::default();
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let gate = Gate { entered: entered_tx, release: release_rx };
    let (mut session, _rx) = start(&probe, Some(gate));
    session.configure(SessionConfig::new(png(FACE))).unwrap();

    session.submit_frame(frame(1, [GATE_RED, PANIC_GREEN, 180]));
    entered_rx.recv_timeout(TIMEOUT).unwrap();

    // Queued behind the frame that is about to crash the worker.
    let ticket = session.submit_reference(SessionConfig::new(png(STRANGER))).unwrap();
    let (result_tx, result_rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = result_tx.send(ticket.blocking_wait());
    });
    release_tx.send(()).unwrap();

    let result = result_rx.recv_timeout(TIMEOUT).expect("ticket never resolved");
    assert!(matches!(result, Err(ReferenceError::WorkerStopped)));

    let deadline = Instant::now() + TIMEOUT;
    while !probe.locator_dropped.load(Ordering::SeqCst) {
        assert!(Instant::now() < deadline, "worker never exited");
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(session.submit_frame(frame(2, FACE)), FrameDisposition::Stopped);
    assert!(matches!(
        session.configure(SessionConfig::new(png(FACE))),
        Err(SessionError::Stopped)
    ));
    assert!(!session.stats().busy);
    session.join();
}

#[test]
fn result_scored_against_replaced_reference_is_dropped() {
    let probe = Probe::default();
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let gate = Gate { entered: entered_tx, release: release_rx };
    let (mut session, rx) = start(&probe, Some(gate));
    session.configure(SessionConfig::new(png(FACE))).unwrap();

    session.submit_frame(frame(1, [GATE_RED, 50, 180]));
    entered_rx.recv_timeout(TIMEOUT).unwrap();

    let ticket = session.submit_reference(SessionConfig::new(png(STRANGER))).unwrap();
    release_tx.send(()).unwrap();
    ticket.blocking_wait().unwrap();
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

    session.submit_frame(frame(2, STRANGER));
    let report = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(report.sequence, 2);
    assert!((similarity(&report) - 1.0).abs() < 1e-4);

    let stats = session.stats();
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.processed, 1);
    assert!(stats.settled());
}

#[tokio::test]
async fn async_configuration_and_channel_sink() {
    let probe = Probe::default();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut session = Session::start(
        ColorLocator { probe: probe.clone(), gate: None },
        MeanColorEmbedder { probe: probe.clone() },
        tx,
    )
    .unwrap();

    let mut readiness = session.reference();
    session.configure_async(SessionConfig::new(png(FACE))).await.unwrap();
    readiness.wait_for(|state| state.is_ready()).await.unwrap();
    assert!(readiness.borrow().image.is_some());

    session.submit_frame(frame(4, FACE));
    let report = tokio::time::timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(report.sequence, 4);
    assert!(report.outcome.matched());
}
