//! Outward delivery of per-frame scores.

use crate::types::ScoreReport;
use tokio::sync::mpsc;

/// Receives one [`ScoreReport`] per processed frame, in processing order.
///
/// Called on the session worker thread; implementations should hand the
/// report off quickly rather than block.
pub trait ScoreSink: Send + 'static {
    fn emit(&mut self, report: ScoreReport);
}

impl<F> ScoreSink for F
where
    F: FnMut(ScoreReport) + Send + 'static,
{
    fn emit(&mut self, report: ScoreReport) {
        self(report)
    }
}

impl ScoreSink for mpsc::UnboundedSender<ScoreReport> {
    fn emit(&mut self, report: ScoreReport) {
        if self.send(report).is_err() {
            tracing::debug!("score receiver dropped; discarding report");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FrameOutcome;
    use std::time::Duration;

    fn report(sequence: u64) -> ScoreReport {
        ScoreReport {
            sequence,
            outcome: FrameOutcome::NoFaceDetected,
            elapsed: Duration::ZERO,
        }
    }

    fn emit_all(sink: &mut dyn ScoreSink, sequences: &[u64]) {
        for &s in sequences {
            sink.emit(report(s));
        }
    }

    #[test]
    fn test_closure_sink() {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut sink = move |r: ScoreReport| tx.send(r.sequence).unwrap();
        emit_all(&mut sink, &[1, 2]);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_channel_sink() {
        let (mut tx, mut rx) = mpsc::unbounded_channel();
        emit_all(&mut tx, &[5]);
        assert_eq!(rx.try_recv().unwrap().sequence, 5);
    }

    #[test]
    fn test_channel_sink_tolerates_closed_receiver() {
        let (mut tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        emit_all(&mut tx, &[1]);
    }
}
