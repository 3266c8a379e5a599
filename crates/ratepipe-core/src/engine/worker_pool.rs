//! The worker pool task, §4.3 — the heart of the engine.
//!
//! One of these runs per configured worker. Each iteration pulls one
//! [`super::WorkItem`] off the shared queue, renders the payload template
//! against it, and enforces the dual-deadline rule: a send that runs past
//! `soft_timeout` is still given until `hard_timeout` to finish gracefully;
//! a send that runs past `hard_timeout` is detached — its `JoinHandle` is
//! dropped rather than aborted, so the worker keeps running to whatever
//! natural conclusion it reaches, but this pool slot reports a fatal
//! [`RatePipeError::HardTimeout`] and exits rather than risk handing the
//! same (possibly wedged) worker more work.
//!
//! `Box<dyn Worker>` is wrapped in `Arc<tokio::sync::Mutex<_>>` rather than
//! `Arc<dyn Worker>`: `start`/`stop` need `&mut self`, and the detached
//! send future above needs to own a handle to the same worker with a
//! `'static` lifetime independent of this function's stack frame.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::Instant;

use super::{Signals, WorkItem};
use crate::error::RatePipeError;
use crate::logs::LogRecord;
use crate::metrics::MetricsRegistry;
use crate::template::{self, Renderer};
use crate::worker::{self, Payload, Worker};

enum SendOutcome {
    Completed(Result<Payload, String>),
    HardTimeout,
}

/// Race one `worker.send` against the dual deadline. `parent_cancel` is the
/// engine-wide cancellation token; the child context handed to the worker is
/// its own token that is cancelled either when `parent_cancel` fires or when
/// `soft_timeout` elapses, whichever comes first — the worker sees one
/// cancellation signal regardless of cause, while this supervisor still
/// enforces `hard_timeout` as a hard backstop against a worker that ignores
/// it (§9 "Open question": engine-cancel and soft-timeout both surface to the
/// worker as cancellation; only a `hard_timeout` overrun is fatal).
async fn send_operation(
    worker: Arc<AsyncMutex<Box<dyn Worker>>>,
    payload: Payload,
    soft_timeout: Duration,
    hard_timeout: Duration,
    parent_cancel: tokio_util::sync::CancellationToken,
) -> SendOutcome {
    let started = Instant::now();
    let child_ctx = parent_cancel.child_token();

    let soft_timeout_ctx = child_ctx.clone();
    let soft_timer = tokio::spawn(async move {
        tokio::time::sleep_until(started + soft_timeout).await;
        soft_timeout_ctx.cancel();
    });

    let mut handle = tokio::spawn(async move {
        let guard = worker.lock().await;
        guard.send(child_ctx, payload).await
    });

    tokio::select! {
        biased;
        result = &mut handle => {
            soft_timer.abort();
            return finish(result);
        }
        _ = tokio::time::sleep_until(started + soft_timeout) => {}
    }

    tracing::warn!(?soft_timeout, "worker exceeded soft timeout, waiting for hard deadline");

    tokio::select! {
        biased;
        result = &mut handle => finish(result),
        _ = tokio::time::sleep_until(started + hard_timeout) => {
            tracing::error!(?hard_timeout, "worker exceeded hard timeout, detaching send");
            SendOutcome::HardTimeout
        }
    }
}

fn finish(result: Result<Result<Payload, String>, tokio::task::JoinError>) -> SendOutcome {
    match result {
        Ok(inner) => SendOutcome::Completed(inner),
        Err(join_err) => SendOutcome::Completed(Err(format!("worker task panicked: {join_err}"))),
    }
}

fn log_fields(keys: &[String], data: &BTreeMap<String, String>) -> Vec<String> {
    keys.iter().map(|k| data.get(k).cloned().unwrap_or_default()).collect()
}

#[allow(clippy::too_many_arguments)]
pub async fn run_worker(
    worker_instance: Box<dyn Worker>,
    worker_variant: BTreeMap<String, String>,
    worker_template: Arc<Renderer>,
    payload_template: Arc<Renderer>,
    soft_timeout: Duration,
    hard_timeout: Duration,
    work_rx: Arc<AsyncMutex<mpsc::Receiver<WorkItem>>>,
    log_tx: Option<mpsc::Sender<LogRecord>>,
    log_data: Arc<Vec<String>>,
    log_output: Arc<Vec<String>>,
    metrics: Arc<MetricsRegistry>,
    signals: Signals,
) -> Result<(), RatePipeError> {
    let worker_payload = template::render_map(&worker_template, &worker_variant)?;
    let worker = Arc::new(AsyncMutex::new(worker_instance));

    {
        let mut guard = worker.lock().await;
        if let Err(e) = guard.start(signals.cancel.clone(), worker_payload.clone()).await {
            return Err(RatePipeError::Engine(format!("worker start failed: {e}")));
        }
    }

    loop {
        let item = {
            let mut rx = work_rx.lock().await;
            rx.recv().await
        };
        let item = match item {
            Some(item) => item,
            None => break,
        };

        let payload = template::render_map(&payload_template, &item.data)?;

        metrics.log_start(item.segment_id);
        let started = std::time::Instant::now();
        let outcome = send_operation(
            Arc::clone(&worker),
            payload,
            soft_timeout,
            hard_timeout,
            signals.cancel.clone(),
        )
        .await;
        let elapsed = started.elapsed();

        match outcome {
            SendOutcome::Completed(Ok(response)) => {
                let status = worker::status_of(&response);
                metrics.log_finish(item.segment_id, &status, elapsed, true);
                if let Some(tx) = &log_tx {
                    let record = LogRecord {
                        fingerprint: item.fingerprint,
                        success: true,
                        data_fields: log_fields(&log_data, &item.data),
                        output_fields: log_output
                            .iter()
                            .map(|k| worker::field_or_empty(&response, k))
                            .collect(),
                    };
                    let _ = tx.send(record).await;
                }
            }
            SendOutcome::Completed(Err(message)) => {
                tracing::debug!(error = %message, "worker send failed");
                metrics.log_finish(item.segment_id, "(none)", elapsed, false);
                if let Some(tx) = &log_tx {
                    let empty = Payload::new();
                    let record = LogRecord {
                        fingerprint: item.fingerprint,
                        success: false,
                        data_fields: log_fields(&log_data, &item.data),
                        output_fields: log_output
                            .iter()
                            .map(|k| worker::field_or_empty(&empty, k))
                            .collect(),
                    };
                    let _ = tx.send(record).await;
                }
            }
            SendOutcome::HardTimeout => {
                // The item's outcome is unknown — the send is still running
                // in a detached task — so neither metrics nor a log record
                // are written for it; the engine is already aborting.
                return Err(RatePipeError::HardTimeout);
            }
        }
    }

    {
        let mut guard = worker.lock().await;
        if let Err(e) = guard.stop(signals.cancel.clone(), worker_payload).await {
            tracing::warn!(error = %e, "worker stop failed");
        }
    }

    Ok(())
}
