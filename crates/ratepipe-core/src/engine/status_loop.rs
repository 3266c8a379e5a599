//! The status task, §4.7.
//!
//! Renders a metrics snapshot to the output writer every ten seconds and
//! whenever the rate task asks for one on demand (a blank line on stdin, or
//! the ticker reopening a segment on a rate change).
//! Purely observational: nothing here affects dispatch, so it exits the
//! moment the run stops needing progress output.

use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::{OutputWriter, Signals};
use crate::metrics::MetricsRegistry;
use crate::stats::Stats;

const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(10);

pub async fn run(
    metrics: Arc<MetricsRegistry>,
    mut status_rx: mpsc::Receiver<()>,
    writer: OutputWriter,
    signals: Signals,
) {
    let mut ticker = tokio::time::interval(SNAPSHOT_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // the first tick fires immediately; skip it

    loop {
        tokio::select! {
            biased;
            _ = signals.cancel.cancelled() => break,
            _ = signals.workers_finished.cancelled() => break,
            _ = ticker.tick() => render(&metrics, &writer),
            request = status_rx.recv() => match request {
                Some(()) => render(&metrics, &writer),
                None => break,
            },
        }
    }

    tracing::debug!("status loop exiting");
}

fn render(metrics: &MetricsRegistry, writer: &OutputWriter) {
    let snapshot = Stats::snapshot(metrics);
    let text = snapshot.render();
    let mut guard = match writer.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    let _ = writeln!(guard, "{text}");
    let _ = guard.flush();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Signals as EngineSignals;
    use std::sync::Mutex as StdMutex;

    fn sink() -> (OutputWriter, Arc<StdMutex<Vec<u8>>>) {
        let buf = Arc::new(StdMutex::new(Vec::new()));
        let writer: OutputWriter = Arc::new(StdMutex::new(Box::new(SinkWriter(Arc::clone(&buf)))));
        (writer, buf)
    }

    struct SinkWriter(Arc<StdMutex<Vec<u8>>>);
    impl std::io::Write for SinkWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn renders_on_demand_request() {
        let metrics = Arc::new(MetricsRegistry::new(2, 10.0));
        let (writer, buf) = sink();
        let (status_tx, status_rx) = mpsc::channel(4);
        let signals = EngineSignals::new();

        let handle = tokio::spawn(run(metrics, status_rx, writer, signals.clone()));
        status_tx.send(()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        signals.cancel.cancel();
        handle.await.unwrap();

        assert!(!buf.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn exits_promptly_on_cancel() {
        let metrics = Arc::new(MetricsRegistry::new(1, 10.0));
        let (writer, _buf) = sink();
        let (_status_tx, status_rx) = mpsc::channel(4);
        let signals = EngineSignals::new();
        signals.cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), run(metrics, status_rx, writer, signals))
            .await
            .expect("status loop should exit promptly");
    }
}
