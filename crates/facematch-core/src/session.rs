//! Session controller: start, configure, feed frames, stop.
//!
//! A session owns one reference cache, one mailbox and one worker thread.
//! Configuration errors are returned to the caller; per-frame problems never are.

use crate::config::{ConfigError, SessionConfig, ValidatedConfig};
use crate::detector::FaceLocator;
use crate::imaging::{self, ImagingError};
use crate::mailbox::PostOutcome;
use crate::pipeline::{self, PipelineCounters, PipelineStats, Shared};
use crate::recognizer::EmbeddingProvider;
use crate::reference::{ReferenceError, ReferenceState, ReferenceTicket};
use crate::sink::ScoreSink;
use crate::types::{Embedding, FrameTask};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("reference image: {0}")]
    Image(#[from] ImagingError),
    #[error("reference setup failed: {0}")]
    Reference(#[from] ReferenceError),
    #[error("session is stopped")]
    Stopped,
    #[error("failed to spawn pipeline worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// What happened to a submitted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    /// Frame is waiting for the worker.
    Accepted,
    /// Frame is waiting; it displaced an older frame that will never be processed.
    Replaced { dropped_sequence: u64 },
    /// Reference embedding is not available; frame discarded.
    NotReady,
    /// Session has been stopped; frame discarded.
    Stopped,
}

/// A running face-similarity session.
pub struct Session {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    config: Option<ValidatedConfig>,
}

impl Session {
    /// Spawn the worker thread that owns both capabilities and the sink.
    pub fn start<L, E, S>(locator: L, embedder: E, sink: S) -> Result<Self, SessionError>
    where
        L: FaceLocator + 'static,
        E: EmbeddingProvider + 'static,
        S: ScoreSink,
    {
        let shared = Arc::new(Shared::new());
        let worker = pipeline::spawn_worker(
            Arc::clone(&shared),
            Box::new(locator),
            Box::new(embedder),
            Box::new(sink),
        )?;
        tracing::info!("session started");

        Ok(Self {
            shared,
            worker: Some(worker),
            config: None,
        })
    }

    /// Validate `config` and queue the reference for embedding without waiting.
    ///
    /// Frames submitted before the ticket resolves are discarded.
    pub fn submit_reference(&mut self, config: SessionConfig) -> Result<ReferenceTicket, SessionError> {
        if self.shared.mailbox.is_closed() {
            return Err(SessionError::Stopped);
        }

        let validated = config.validate()?;
        let image = imaging::rotate(imaging::decode(&config.reference_image)?, validated.reference_rotation);

        tracing::info!(
            width = image.width(),
            height = image.height(),
            rotation = validated.reference_rotation.degrees(),
            threshold = validated.similarity_threshold,
            "configuring session"
        );

        self.shared.set_threshold(validated.similarity_threshold);
        let (job, ticket) = self.shared.reference.submit(image);
        match self.shared.mailbox.post_reference(job) {
            Ok(Some(cleared)) => {
                PipelineCounters::bump(&self.shared.counters.dropped);
                tracing::debug!(sequence = cleared, "pending frame cleared by new reference");
            }
            Ok(None) => {}
            Err(_) => return Err(SessionError::Stopped),
        }

        self.config = Some(validated);
        Ok(ticket)
    }

    /// Configure and block until the reference embedding is ready.
    ///
    /// A reference without a detectable face fails here with
    /// [`ReferenceError::NoFaceInReference`]. Do not call from async code;
    /// use [`Session::configure_async`] there.
    pub fn configure(&mut self, config: SessionConfig) -> Result<Arc<Embedding>, SessionError> {
        let ticket = self.submit_reference(config)?;
        Ok(ticket.blocking_wait()?)
    }

    pub async fn configure_async(&mut self, config: SessionConfig) -> Result<Arc<Embedding>, SessionError> {
        let ticket = self.submit_reference(config)?;
        Ok(ticket.wait().await?)
    }

    /// Hand a frame to the pipeline. Never blocks on frame processing.
    pub fn submit_frame(&self, task: FrameTask) -> FrameDisposition {
        let counters = &self.shared.counters;
        PipelineCounters::bump(&counters.submitted);

        if self.shared.mailbox.is_closed() {
            PipelineCounters::bump(&counters.dropped);
            return FrameDisposition::Stopped;
        }
        if !self.shared.reference.is_ready() {
            PipelineCounters::bump(&counters.not_ready);
            return FrameDisposition::NotReady;
        }

        match self.shared.mailbox.post_frame(task) {
            PostOutcome::Queued => FrameDisposition::Accepted,
            PostOutcome::Replaced { dropped_sequence } => {
                PipelineCounters::bump(&counters.dropped);
                tracing::debug!(sequence = dropped_sequence, "stale frame dropped");
                FrameDisposition::Replaced { dropped_sequence }
            }
            PostOutcome::Closed => {
                PipelineCounters::bump(&counters.dropped);
                FrameDisposition::Stopped
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.shared.reference.is_ready()
    }

    /// The last accepted configuration, if any.
    pub fn config(&self) -> Option<&ValidatedConfig> {
        self.config.as_ref()
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.stats()
    }

    /// Watch reference readiness and the upright reference image.
    pub fn reference(&self) -> watch::Receiver<ReferenceState> {
        self.shared.reference.subscribe()
    }

    /// Stop accepting frames and let the worker wind down.
    ///
    /// Returns immediately; an in-flight frame finishes on the worker but its
    /// result is not delivered. Idempotent.
    pub fn stop(&mut self) {
        if self.shared.mailbox.is_closed() {
            return;
        }
        if let Some(sequence) = self.shared.mailbox.close() {
            PipelineCounters::bump(&self.shared.counters.dropped);
            tracing::debug!(sequence, "pending frame discarded at shutdown");
        }
        tracing::info!("session stopped");
    }

    /// Stop and wait for the worker to exit and release its models.
    pub fn join(mut self) {
        self.stop();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("pipeline worker panicked");
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}
