//! The rate task, §4.6.
//!
//! Reads newline-delimited commands from an interactive input stream: a
//! bare number changes the dispatch rate, a blank line requests an
//! immediate status snapshot. A line that is neither is a rate-parse
//! error, fatal per §7.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use super::Signals;
use crate::error::RatePipeError;

pub async fn run(
    input: Box<dyn AsyncBufRead + Unpin + Send>,
    rate_tx: mpsc::Sender<f64>,
    status_tx: mpsc::Sender<()>,
    signals: Signals,
) -> Result<(), RatePipeError> {
    let mut lines = BufReader::new(input).lines();

    loop {
        let line = tokio::select! {
            biased;
            _ = signals.cancel.cancelled() => break,
            _ = signals.workers_finished.cancelled() => break,
            result = lines.next_line() => result?,
        };

        let line = match line {
            Some(line) => line,
            None => break,
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            let _ = status_tx.try_send(());
            continue;
        }

        match trimmed.parse::<f64>() {
            Ok(rate) => {
                tokio::select! {
                    biased;
                    _ = signals.cancel.cancelled() => break,
                    result = rate_tx.send(rate) => {
                        if result.is_err() {
                            break;
                        }
                    }
                }
            }
            Err(_) => {
                tracing::error!(line = %trimmed, "unrecognized rate command");
                return Err(RatePipeError::Validation(format!(
                    "rate command {trimmed:?} is neither blank nor a number"
                )));
            }
        }
    }

    tracing::debug!("rate loop exiting");
    Ok(())
}
