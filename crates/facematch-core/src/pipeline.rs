//! Frame pipeline worker.
//!
//! One dedicated thread per session pulls jobs from the [`Mailbox`] and runs
//! detection, embedding and scoring for at most one frame at a time. Frame
//! failures are soft: the frame is counted and skipped, the loop continues.

use crate::detector::{DetectorError, FaceLocator};
use crate::imaging::{self, ImagingError};
use crate::mailbox::{Job, Mailbox};
use crate::recognizer::{EmbeddingProvider, RecognizerError};
use crate::reference::ReferenceCache;
use crate::similarity::{SimilarityEngine, SimilarityError, DEFAULT_THRESHOLD};
use crate::sink::ScoreSink;
use crate::types::{Embedding, FrameOutcome, FrameTask, ScoreReport};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use thiserror::Error;

/// Why a frame produced no score.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("frame conversion failed: {0}")]
    Imaging(#[from] ImagingError),
    #[error("face detection failed: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedding failed: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("scoring failed: {0}")]
    Similarity(#[from] SimilarityError),
}

/// Live diagnostic counters for one session.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub(crate) submitted: AtomicU64,
    pub(crate) dropped: AtomicU64,
    pub(crate) processed: AtomicU64,
    pub(crate) skipped: AtomicU64,
    pub(crate) no_face: AtomicU64,
    pub(crate) not_ready: AtomicU64,
    pub(crate) busy: AtomicBool,
}

impl PipelineCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`PipelineCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Frames handed to `submit_frame`.
    pub submitted: u64,
    /// Frames overwritten or discarded unprocessed, rejected after stop, or
    /// scored against a reference that has since been replaced.
    pub dropped: u64,
    /// Frames that produced a score or a no-face result.
    pub processed: u64,
    /// Frames abandoned after a per-frame failure.
    pub skipped: u64,
    /// Processed frames without a detectable face.
    pub no_face: u64,
    /// Frames discarded because the reference was not ready.
    pub not_ready: u64,
    pub busy: bool,
    pub reference_ready: bool,
}

impl PipelineStats {
    /// Every submitted frame has been accounted for and the worker is idle.
    pub fn settled(&self) -> bool {
        let accounted = self.dropped + self.processed + self.skipped + self.not_ready;
        !self.busy && accounted >= self.submitted
    }
}

/// State shared between the session handle and its worker.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) mailbox: Mailbox,
    pub(crate) reference: ReferenceCache,
    pub(crate) counters: PipelineCounters,
    threshold_bits: AtomicU32,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            mailbox: Mailbox::new(),
            reference: ReferenceCache::new(),
            counters: PipelineCounters::default(),
            threshold_bits: AtomicU32::new(DEFAULT_THRESHOLD.to_bits()),
        }
    }

    pub(crate) fn set_threshold(&self, threshold: f32) {
        self.threshold_bits.store(threshold.to_bits(), Ordering::Release);
    }

    pub(crate) fn threshold(&self) -> f32 {
        f32::from_bits(self.threshold_bits.load(Ordering::Acquire))
    }

    pub(crate) fn stats(&self) -> PipelineStats {
        let c = &self.counters;
        PipelineStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            processed: c.processed.load(Ordering::Relaxed),
            skipped: c.skipped.load(Ordering::Relaxed),
            no_face: c.no_face.load(Ordering::Relaxed),
            not_ready: c.not_ready.load(Ordering::Relaxed),
            busy: c.busy.load(Ordering::Relaxed),
            reference_ready: self.reference.is_ready(),
        }
    }
}

/// Owns the capabilities for the lifetime of the worker thread.
struct Worker {
    shared: Arc<Shared>,
    locator: Box<dyn FaceLocator>,
    embedder: Box<dyn EmbeddingProvider>,
    sink: Box<dyn ScoreSink>,
}

/// Spawn the pipeline worker on a dedicated OS thread.
///
/// The thread exits once the mailbox is closed and drops the capabilities
/// (and with them any loaded models) on the way out.
pub(crate) fn spawn_worker(
    shared: Arc<Shared>,
    locator: Box<dyn FaceLocator>,
    embedder: Box<dyn EmbeddingProvider>,
    sink: Box<dyn ScoreSink>,
) -> std::io::Result<JoinHandle<()>> {
    let worker = Worker { shared, locator, embedder, sink };
    std::thread::Builder::new()
        .name("facematch-worker".into())
        .spawn(move || worker.run())
}

/// Closes the mailbox if the worker unwinds: pending tickets resolve as
/// `WorkerStopped` and later frames are rejected as `Stopped`.
struct CloseOnExit(Arc<Shared>);

impl Drop for CloseOnExit {
    fn drop(&mut self) {
        let shared = &self.0;
        shared.counters.busy.store(false, Ordering::Relaxed);
        if !std::thread::panicking() {
            return;
        }
        tracing::error!("pipeline worker panicked; closing session");
        if let Some(sequence) = shared.mailbox.close() {
            PipelineCounters::bump(&shared.counters.dropped);
            tracing::debug!(sequence, "pending frame discarded after worker panic");
        }
    }
}

impl Worker {
    fn run(mut self) {
        let _guard = CloseOnExit(Arc::clone(&self.shared));
        tracing::info!("pipeline worker started");
        while let Some(job) = self.shared.mailbox.take() {
            match job {
                Job::Reference(job) => {
                    self.shared.counters.busy.store(true, Ordering::Relaxed);
                    self.shared
                        .reference
                        .run_job(job, self.locator.as_mut(), self.embedder.as_mut());
                    self.shared.counters.busy.store(false, Ordering::Relaxed);
                }
                Job::Frame(task) => self.handle_frame(task),
            }
        }
        tracing::info!("pipeline worker exiting");
    }

    fn handle_frame(&mut self, task: FrameTask) {
        let counters = &self.shared.counters;
        let sequence = task.sequence;
        let generation = self.shared.reference.generation();

        let reference = match self.shared.reference.get() {
            Ok(reference) => reference,
            Err(_) => {
                PipelineCounters::bump(&counters.not_ready);
                tracing::trace!(sequence, "reference not ready; frame discarded");
                return;
            }
        };

        counters.busy.store(true, Ordering::Relaxed);
        let started = Instant::now();
        let result = self.score_frame(task, &reference);
        let elapsed = started.elapsed();
        let counters = &self.shared.counters;
        counters.busy.store(false, Ordering::Relaxed);

        match result {
            Ok(_) if self.shared.reference.generation() != generation => {
                PipelineCounters::bump(&counters.dropped);
                tracing::debug!(sequence, "reference replaced while scoring; result abandoned");
            }
            Ok(outcome) => {
                PipelineCounters::bump(&counters.processed);
                if outcome == FrameOutcome::NoFaceDetected {
                    PipelineCounters::bump(&counters.no_face);
                }

                if self.shared.mailbox.is_closed() {
                    tracing::debug!(sequence, "session stopped; result abandoned");
                    return;
                }

                tracing::trace!(sequence, ?outcome, elapsed_ms = elapsed.as_millis() as u64, "frame scored");
                self.sink.emit(ScoreReport { sequence, outcome, elapsed });
            }
            Err(err) => {
                PipelineCounters::bump(&counters.skipped);
                tracing::debug!(sequence, error = %err, "frame skipped");
            }
        }
    }

    /// Convert, locate, crop, embed and score one frame.
    fn score_frame(&mut self, task: FrameTask, reference: &Embedding) -> Result<FrameOutcome, FrameError> {
        let image = imaging::rotate(imaging::to_rgb(&task.frame)?, task.rotation);
        drop(task);

        let faces = self.locator.locate_faces(&image)?;
        let Some(face) = faces.first() else {
            tracing::trace!(brightness = imaging::avg_brightness(&image), "no face in frame");
            return Ok(FrameOutcome::NoFaceDetected);
        };

        let input = imaging::face_input(&image, face, self.embedder.input_size())?;
        let embedding = self.embedder.embed(&input)?;

        let engine = SimilarityEngine::new(self.shared.threshold());
        Ok(engine.evaluate(&embedding, reference)?)
    }
}
