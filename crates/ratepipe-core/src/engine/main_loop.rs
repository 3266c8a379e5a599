//! The main (producer) task, §4.2.
//!
//! On each pacing signal, pulls one row, expands it into 1..N payload
//! variants, applies resume-skip, and forwards the surviving work items to
//! the worker pool. If every variant of a row was skipped, the loop reads
//! the next row immediately rather than waiting for another pacing tick.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::{Signals, WorkItem};
use crate::data::DataSource;
use crate::error::RatePipeError;
use crate::hash::Hash128;
use crate::metrics::MetricsRegistry;

#[allow(clippy::too_many_arguments)]
pub async fn run(
    mut data_source: DataSource,
    configured_headers: Option<Vec<String>>,
    variants: Vec<BTreeMap<String, String>>,
    skip_set: Arc<HashSet<Hash128>>,
    resume: bool,
    needs_hash: bool,
    mut pacing_rx: mpsc::Receiver<u32>,
    work_tx: mpsc::Sender<WorkItem>,
    metrics: Arc<MetricsRegistry>,
    signals: Signals,
) -> Result<(), RatePipeError> {
    let headers = match configured_headers {
        Some(h) => h,
        None => match data_source.read_row()? {
            Some(row) => row,
            None => {
                signals.data_finished.cancel();
                tracing::debug!("main loop exiting: data source empty");
                return Ok(());
            }
        },
    };

    'outer: loop {
        let segment_id = tokio::select! {
            biased;
            _ = signals.cancel.cancelled() => break 'outer,
            tick = pacing_rx.recv() => match tick {
                Some(id) => id,
                None => break 'outer,
            },
        };

        loop {
            let row = match data_source.read_row() {
                Ok(Some(row)) => row,
                Ok(None) => {
                    signals.data_finished.cancel();
                    tracing::debug!("main loop exiting: data source exhausted");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "main loop exiting: data read error");
                    return Err(e);
                }
            };

            let mut dispatched_any = false;
            for variant in &variants {
                let mut data: BTreeMap<String, String> =
                    headers.iter().cloned().zip(row.iter().cloned()).collect();
                for (k, v) in variant {
                    data.insert(k.clone(), v.clone());
                }

                let fingerprint = if needs_hash {
                    Hash128::of(&data)
                } else {
                    Hash128 { hi: 0, lo: 0 }
                };

                if resume && skip_set.contains(&fingerprint) {
                    metrics.log_skip();
                    continue;
                }

                dispatched_any = true;
                let item = WorkItem { data, fingerprint, segment_id };
                tokio::select! {
                    result = work_tx.send(item) => {
                        if result.is_err() {
                            tracing::debug!("main loop exiting: worker pool gone");
                            return Ok(());
                        }
                    }
                    _ = signals.cancel.cancelled() => {
                        tracing::debug!("main loop exiting: cancelled mid-dispatch");
                        return Ok(());
                    }
                }
            }

            if dispatched_any {
                break;
            }
        }
    }

    tracing::debug!("main loop exiting: cancelled");
    Ok(())
}
