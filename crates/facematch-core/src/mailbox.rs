//! Single-slot hand-off between frame producers and the session worker.
//!
//! Posting a frame while one is already waiting overwrites it: the stale frame
//! is dropped unprocessed. Reference jobs have their own slot and are always
//! taken before frames.

use crate::reference::ReferenceJob;
use crate::types::FrameTask;
use std::sync::{Condvar, Mutex, MutexGuard};

/// What the worker pulled out of the mailbox.
#[derive(Debug)]
pub enum Job {
    Reference(ReferenceJob),
    Frame(FrameTask),
}

/// Result of posting a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOutcome {
    /// Slot was empty.
    Queued,
    /// Slot held an unprocessed frame, which has been dropped.
    Replaced { dropped_sequence: u64 },
    /// Mailbox is closed; the frame was discarded.
    Closed,
}

#[derive(Default)]
struct Slots {
    reference: Option<ReferenceJob>,
    frame: Option<FrameTask>,
    closed: bool,
}

#[derive(Default)]
pub struct Mailbox {
    slots: Mutex<Slots>,
    filled: Condvar,
}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("closed", &self.is_closed())
            .field("pending_frame", &self.has_pending_frame())
            .finish()
    }
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave the slots half-written,
    // so a poisoned mutex is still usable.
    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn post_frame(&self, task: FrameTask) -> PostOutcome {
        let mut slots = self.lock();
        if slots.closed {
            return PostOutcome::Closed;
        }
        let outcome = match slots.frame.replace(task) {
            Some(stale) => PostOutcome::Replaced { dropped_sequence: stale.sequence },
            None => PostOutcome::Queued,
        };
        drop(slots);
        self.filled.notify_one();
        outcome
    }

    /// Queue a reference job, clearing any waiting frame.
    ///
    /// Returns the job back if the mailbox is closed.
    pub fn post_reference(&self, job: ReferenceJob) -> Result<Option<u64>, ReferenceJob> {
        let mut slots = self.lock();
        if slots.closed {
            return Err(job);
        }
        if let Some(older) = slots.reference.replace(job) {
            older.supersede();
        }
        let cleared = slots.frame.take().map(|f| f.sequence);
        drop(slots);
        self.filled.notify_one();
        Ok(cleared)
    }

    /// Block until a job is available. Returns `None` once closed.
    pub fn take(&self) -> Option<Job> {
        let mut slots = self.lock();
        loop {
            if slots.closed {
                return None;
            }
            if let Some(job) = slots.reference.take() {
                return Some(Job::Reference(job));
            }
            if let Some(task) = slots.frame.take() {
                return Some(Job::Frame(task));
            }
            slots = self
                .filled
                .wait(slots)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Close the mailbox and discard anything still waiting.
    ///
    /// Returns the sequence of a discarded frame, if there was one.
    pub fn close(&self) -> Option<u64> {
        let mut slots = self.lock();
        slots.closed = true;
        slots.reference = None;
        let discarded = slots.frame.take().map(|f| f.sequence);
        drop(slots);
        self.filled.notify_all();
        discarded
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn has_pending_frame(&self) -> bool {
        self.lock().frame.is_some()
    }
}
