//! Progress pipe between a downloader and its consumer.
//!
//! The pipe is single-producer/single-consumer and unbuffered: [`ProgressSender::send`]
//! only returns once the consumer has taken the value, so a consumer that
//! stops listening stalls the producer. A closed pipe is reported as `None`
//! by [`ProgressReceiver::recv`] and can never be confused with a value.

use std::fmt;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

// ============================================================================
// Progress value
// ============================================================================

/// A transfer progress fraction in `[0, 1]`. `1.0` means "transfer complete".
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Progress(f64);

impl Progress {
    pub const ZERO: Progress = Progress(0.0);
    pub const COMPLETE: Progress = Progress(1.0);

    /// Returns `None` for values outside `[0, 1]` (including NaN).
    pub fn new(value: f64) -> Option<Self> {
        (0.0..=1.0).contains(&value).then_some(Self(value))
    }

    /// Computes `done / total`, clamped to 1.0. `None` when `total` is zero.
    pub fn fraction(done: u64, total: u64) -> Option<Self> {
        if total == 0 {
            return None;
        }
        Some(Self((done as f64 / total as f64).min(1.0)))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    pub fn percent(self) -> f64 {
        self.0 * 100.0
    }

    pub fn is_complete(self) -> bool {
        self.0 >= 1.0
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}%", self.percent())
    }
}

// ============================================================================
// Pipe
// ============================================================================

/// The consumer side went away before taking a value.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("progress pipe closed")]
pub struct PipeClosed;

type Handoff = (Progress, oneshot::Sender<()>);

/// Producer half of the progress pipe.
#[derive(Debug)]
pub struct ProgressSender {
    tx: mpsc::Sender<Handoff>,
}

/// Consumer half of the progress pipe.
#[derive(Debug)]
pub struct ProgressReceiver {
    rx: mpsc::Receiver<Handoff>,
}

/// Creates a connected progress pipe.
pub fn progress_pipe() -> (ProgressSender, ProgressReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (ProgressSender { tx }, ProgressReceiver { rx })
}

impl ProgressSender {
    /// Hands `progress` to the consumer and waits until it has been received.
    pub async fn send(&self, progress: Progress) -> Result<(), PipeClosed> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send((progress, ack_tx))
            .await
            .map_err(|_| PipeClosed)?;
        ack_rx.await.map_err(|_| PipeClosed)
    }
}

impl ProgressReceiver {
    /// One-shot receive. Returns `None` once the producer is gone.
    ///
    /// Cancel safe: dropping the future before it completes loses no value.
    pub async fn recv(&mut self) -> Option<Progress> {
        let (progress, ack) = self.rx.recv().await?;
        // The producer may have stopped waiting; nothing to do then.
        let _ = ack.send(());
        Some(progress)
    }
}
