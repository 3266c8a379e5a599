//! The ticker (pacing source), §4.1.
//!
//! Converts a target `rate` (items/sec) and the payload-variant fan-out into
//! a stream of pacing signals. Each tick is a non-blocking send of the
//! current segment id; a receiver that isn't ready means the producer is
//! saturated, so the tick is dropped and counted as missed rather than
//! queued.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::Signals;
use crate::metrics::MetricsRegistry;

fn tick_interval(rate: f64, variant_count: usize) -> Option<Duration> {
    if rate <= 0.0 {
        return None;
    }
    let per_second = rate / variant_count.max(1) as f64;
    Some(Duration::from_secs_f64(1.0 / per_second))
}

/// Run the ticker task until cancellation or `data_finished`, emitting one
/// pacing tick per interval and reacting to rate changes on `rate_rx`.
pub async fn run(
    initial_rate: f64,
    variant_count: usize,
    pacing_tx: mpsc::Sender<u32>,
    mut rate_rx: mpsc::Receiver<f64>,
    status_tx: mpsc::Sender<()>,
    metrics: Arc<MetricsRegistry>,
    signals: Signals,
) {
    let mut rate = initial_rate;
    let mut segment_id = metrics.current_segment_id();
    let mut interval = tick_interval(rate, variant_count);

    loop {
        if let Some(duration) = interval {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {
                    if pacing_tx.try_send(segment_id).is_err() {
                        metrics.log_miss(segment_id);
                    }
                }
                new_rate = rate_rx.recv() => {
                    match new_rate {
                        Some(new_rate) => {
                            rate = new_rate;
                            segment_id = metrics.add_segment(new_rate);
                            interval = tick_interval(rate, variant_count);
                            tracing::debug!(rate, segment_id, "ticker rate changed");
                            let _ = status_tx.try_send(());
                        }
                        None => break,
                    }
                }
                _ = signals.cancel.cancelled() => break,
                _ = signals.data_finished.cancelled() => break,
            }
        } else {
            tokio::select! {
                new_rate = rate_rx.recv() => {
                    match new_rate {
                        Some(new_rate) => {
                            rate = new_rate;
                            segment_id = metrics.add_segment(new_rate);
                            interval = tick_interval(rate, variant_count);
                            tracing::debug!(rate, segment_id, "ticker rate changed");
                            let _ = status_tx.try_send(());
                        }
                        None => break,
                    }
                }
                _ = signals.cancel.cancelled() => break,
                _ = signals.data_finished.cancelled() => break,
            }
        }
    }
    tracing::debug!("ticker loop exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_rate_has_no_interval() {
        assert_eq!(tick_interval(0.0, 1), None);
    }

    #[test]
    fn negative_rate_has_no_interval() {
        assert_eq!(tick_interval(-5.0, 1), None);
    }

    #[test]
    fn interval_divides_by_variant_count() {
        let one_variant = tick_interval(10.0, 1).unwrap();
        let two_variants = tick_interval(10.0, 2).unwrap();
        assert!(two_variants > one_variant);
    }

    #[tokio::test]
    async fn ticker_exits_on_data_finished() {
        let (pacing_tx, _pacing_rx) = mpsc::channel(1);
        let (_rate_tx, rate_rx) = mpsc::channel(1);
        let (status_tx, _status_rx) = mpsc::channel(4);
        let metrics = Arc::new(MetricsRegistry::new(1, 1000.0));
        let signals = Signals::new();
        signals.data_finished.cancel();

        tokio::time::timeout(
            Duration::from_secs(1),
            run(1000.0, 1, pacing_tx, rate_rx, status_tx, metrics, signals),
        )
        .await
        .expect("ticker should exit promptly");
    }

    #[tokio::test]
    async fn ticker_exits_on_cancel() {
        let (pacing_tx, _pacing_rx) = mpsc::channel(1);
        let (_rate_tx, rate_rx) = mpsc::channel(1);
        let (status_tx, _status_rx) = mpsc::channel(4);
        let metrics = Arc::new(MetricsRegistry::new(1, 0.0));
        let signals = Signals::new();
        signals.cancel.cancel();

        tokio::time::timeout(
            Duration::from_secs(1),
            run(0.0, 1, pacing_tx, rate_rx, status_tx, metrics, signals),
        )
        .await
        .expect("ticker should exit promptly even with rate == 0");
    }

    #[tokio::test]
    async fn rate_change_opens_a_new_segment() {
        let (pacing_tx, _pacing_rx) = mpsc::channel(1);
        let (rate_tx, rate_rx) = mpsc::channel(1);
        let (status_tx, mut status_rx) = mpsc::channel(4);
        let metrics = Arc::new(MetricsRegistry::new(1, 10.0));
        let signals = Signals::new();
        let cancel = signals.cancel.clone();

        let handle = tokio::spawn(run(10.0, 1, pacing_tx, rate_rx, status_tx, Arc::clone(&metrics), signals));
        rate_tx.send(20.0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        handle.await.unwrap();

        metrics.with_segments(|segs| assert_eq!(segs.len(), 2));
        assert_eq!(status_rx.recv().await, Some(()));
    }
}
