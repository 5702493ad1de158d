//! Reference embedding cache.
//!
//! The reference face is embedded once per submission on the session worker.
//! Until that completes every frame is discarded. A new submission replaces
//! the cached state wholesale; a completion for an older submission is dropped.

use crate::detector::{DetectorError, FaceLocator};
use crate::imaging::{self, ImagingError};
use crate::recognizer::{EmbeddingProvider, RecognizerError};
use crate::types::Embedding;
use image::RgbImage;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{oneshot, watch};

#[derive(Error, Debug, Clone)]
pub enum ReferenceError {
    #[error("reference embedding not ready")]
    NotReady,
    #[error("no face found in reference image")]
    NoFaceInReference,
    #[error("reference crop failed: {0}")]
    Imaging(#[from] ImagingError),
    #[error("reference detection failed")]
    Detector(#[source] Arc<DetectorError>),
    #[error("reference embedding failed")]
    Recognizer(#[source] Arc<RecognizerError>),
    #[error("reference replaced by a newer submission")]
    Superseded,
    #[error("session worker stopped before the reference was computed")]
    WorkerStopped,
}

/// Readiness of the cached reference.
#[derive(Debug, Clone, Default)]
pub enum ReferenceStatus {
    #[default]
    Empty,
    Pending,
    Ready(Arc<Embedding>),
    Failed(ReferenceError),
}

/// Snapshot published to subscribers whenever the reference changes.
#[derive(Debug, Clone, Default)]
pub struct ReferenceState {
    /// Incremented on every submission.
    pub generation: u64,
    /// Upright source image, kept for preview.
    pub image: Option<Arc<RgbImage>>,
    pub status: ReferenceStatus,
}

impl ReferenceState {
    pub fn is_ready(&self) -> bool {
        matches!(self.status, ReferenceStatus::Ready(_))
    }
}

/// Work item handed to the session worker.
pub struct ReferenceJob {
    pub generation: u64,
    pub image: Arc<RgbImage>,
    reply: oneshot::Sender<Result<Arc<Embedding>, ReferenceError>>,
}

impl std::fmt::Debug for ReferenceJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceJob")
            .field("generation", &self.generation)
            .field("dimensions", &self.image.dimensions())
            .finish()
    }
}

impl ReferenceJob {
    /// Resolve the ticket without computing anything.
    pub(crate) fn supersede(self) {
        let _ = self.reply.send(Err(ReferenceError::Superseded));
    }
}

/// Completion handle for one reference submission.
#[derive(Debug)]
pub struct ReferenceTicket {
    generation: u64,
    rx: oneshot::Receiver<Result<Arc<Embedding>, ReferenceError>>,
}

impl ReferenceTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub async fn wait(self) -> Result<Arc<Embedding>, ReferenceError> {
        self.rx.await.map_err(|_| ReferenceError::WorkerStopped)?
    }

    /// Block the calling thread. Must not be called from inside an async runtime.
    pub fn blocking_wait(self) -> Result<Arc<Embedding>, ReferenceError> {
        self.rx.blocking_recv().map_err(|_| ReferenceError::WorkerStopped)?
    }
}

/// Holds the one reference embedding a session scores against.
#[derive(Debug)]
pub struct ReferenceCache {
    state: watch::Sender<ReferenceState>,
}

impl Default for ReferenceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceCache {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ReferenceState::default());
        Self { state }
    }

    /// Replace the reference. The returned job must be run by the worker.
    pub fn submit(&self, image: RgbImage) -> (ReferenceJob, ReferenceTicket) {
        let image = Arc::new(image);
        let mut generation = 0;
        self.state.send_modify(|state| {
            state.generation += 1;
            state.image = Some(Arc::clone(&image));
            state.status = ReferenceStatus::Pending;
            generation = state.generation;
        });

        tracing::debug!(generation, dimensions = ?image.dimensions(), "reference submitted");

        let (reply, rx) = oneshot::channel();
        (
            ReferenceJob { generation, image, reply },
            ReferenceTicket { generation, rx },
        )
    }

    pub fn is_ready(&self) -> bool {
        self.state.borrow().is_ready()
    }

    /// Generation of the latest submission; 0 before the first.
    pub fn generation(&self) -> u64 {
        self.state.borrow().generation
    }

    /// The cached embedding, `NotReady` while pending, or the terminal failure.
    pub fn get(&self) -> Result<Arc<Embedding>, ReferenceError> {
        match &self.state.borrow().status {
            ReferenceStatus::Ready(embedding) => Ok(Arc::clone(embedding)),
            ReferenceStatus::Failed(err) => Err(err.clone()),
            ReferenceStatus::Empty | ReferenceStatus::Pending => Err(ReferenceError::NotReady),
        }
    }

    pub fn snapshot(&self) -> ReferenceState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ReferenceState> {
        self.state.subscribe()
    }

    /// Compute the embedding for `job` and publish it if still current.
    pub fn run_job(
        &self,
        job: ReferenceJob,
        locator: &mut dyn FaceLocator,
        embedder: &mut dyn EmbeddingProvider,
    ) {
        if self.state.borrow().generation != job.generation {
            job.supersede();
            return;
        }

        let result = extract_face_embedding(locator, embedder, &job.image).map(Arc::new);
        let outcome = self.complete(job.generation, result);
        let _ = job.reply.send(outcome);
    }

    fn complete(
        &self,
        generation: u64,
        result: Result<Arc<Embedding>, ReferenceError>,
    ) -> Result<Arc<Embedding>, ReferenceError> {
        let mut current = true;
        self.state.send_if_modified(|state| {
            if state.generation != generation {
                current = false;
                return false;
            }
            state.status = match &result {
                Ok(embedding) => ReferenceStatus::Ready(Arc::clone(embedding)),
                Err(err) => ReferenceStatus::Failed(err.clone()),
            };
            true
        });

        if !current {
            tracing::debug!(generation, "discarding superseded reference result");
            return Err(ReferenceError::Superseded);
        }

        match &result {
            Ok(embedding) => {
                tracing::info!(generation, dimension = embedding.dimension(), "reference embedding ready")
            }
            Err(err) => tracing::warn!(generation, error = %err, "reference embedding failed"),
        }
        result
    }
}

/// Locate, crop, resize and embed the first face in `image`.
///
/// Shared by reference setup and one-shot comparisons. A faceless image
/// yields [`ReferenceError::NoFaceInReference`].
pub fn extract_face_embedding(
    locator: &mut dyn FaceLocator,
    embedder: &mut dyn EmbeddingProvider,
    image: &RgbImage,
) -> Result<Embedding, ReferenceError> {
    let faces = locator
        .locate_faces(image)
        .map_err(|e| ReferenceError::Detector(Arc::new(e)))?;
    let face = faces.first().ok_or(ReferenceError::NoFaceInReference)?;

    let input = imaging::face_input(image, face, embedder.input_size())?;
    embedder
        .embed(&input)
        .map_err(|e| ReferenceError::Recognizer(Arc::new(e)))
}
