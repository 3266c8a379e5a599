//! The error task, §4.5.
//!
//! Every other task reports its terminal error (if any) here instead of
//! returning it directly — the first one received wins and triggers
//! `signals.cancel`; every later one is counted in `ignored` and discarded.
//! The task itself exits only once every `ErrorReporter` clone has been
//! dropped, which happens naturally once the tasks holding them finish.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::RatePipeError;

/// A cheap, cloneable handle every cooperating task uses to report its
/// terminal error without having to return it through a `JoinHandle`.
#[derive(Clone)]
pub struct ErrorReporter {
    tx: mpsc::Sender<String>,
    ignored: Arc<AtomicU64>,
}

impl ErrorReporter {
    pub fn new(tx: mpsc::Sender<String>, ignored: Arc<AtomicU64>) -> Self {
        ErrorReporter { tx, ignored }
    }

    /// Report a fatal error. Non-blocking: if the channel is already full
    /// (another error is in flight and not yet drained), this one is
    /// dropped and counted immediately rather than risking a stall.
    pub fn report(&self, err: &RatePipeError) {
        if self.tx.try_send(err.to_string()).is_err() {
            self.ignored.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Drain `error_rx` until every sender has dropped its `ErrorReporter`
/// clone. The first message received is fatal and cancels the dispatch;
/// every later one is logged and counted into `ignored` rather than
/// overwriting it (first-fatal-wins, §7 "Fatal error").
pub async fn run(
    mut error_rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
    ignored: Arc<AtomicU64>,
) -> Option<String> {
    let mut fatal: Option<String> = None;
    while let Some(message) = error_rx.recv().await {
        if fatal.is_none() {
            tracing::error!(%message, "fatal error, cancelling dispatch");
            fatal = Some(message);
            cancel.cancel();
        } else {
            tracing::debug!(%message, "discarding additional fatal error");
            ignored.fetch_add(1, Ordering::Relaxed);
        }
    }
    tracing::debug!("error loop exiting");
    fatal
}
