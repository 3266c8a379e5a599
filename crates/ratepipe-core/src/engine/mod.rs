//! The dispatch engine coordinator (§4.8).
//!
//! Seven cooperating tasks — ticker, main (producer), worker pool, log,
//! error, rate, and status — share typed, bounded channels and a handful of
//! [`tokio_util::sync::CancellationToken`]s that stand in for the engine's
//! three one-shot broadcast signals: `cancel` (abort), `data_finished`
//! (producer exhausted the data source), and `workers_finished` (every
//! worker has drained, safe for the log/error tasks to exit).
//!
//! `tokio::sync::mpsc` channels have a minimum capacity of 1 (unlike the
//! original's unbuffered Go channels); every channel named "unbuffered" in
//! §5 is built with capacity 1 here and documented as such in `DESIGN.md` —
//! the non-blocking-send/missed-tick and back-pressure semantics they exist
//! for are unaffected.

mod error_loop;
mod main_loop;
mod rate_loop;
mod status_loop;
mod ticker;
mod worker_pool;

pub use error_loop::ErrorReporter;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::data::DataSource;
use crate::error::RatePipeError;
use crate::hash::Hash128;
use crate::logs::{self, LogRecord};
use crate::metrics::MetricsRegistry;
use crate::stats::Stats;
use crate::template::{self, Renderer};
use crate::worker::{Payload, Worker, WorkerFactory};

/// One logical request, expanded from a row + payload-variant overlay
/// (§3 "WorkItem").
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub data: BTreeMap<String, String>,
    pub fingerprint: Hash128,
    pub segment_id: u32,
}

/// The three one-shot broadcast signals every task coordinates against.
/// Cloning a `Signals` clones the underlying tokens, not the signal itself —
/// every clone observes the same cancellation.
#[derive(Clone)]
pub struct Signals {
    /// Abort: a fatal error or an OS interrupt. Ticker, main, rate, and
    /// status tasks unblock and exit promptly; workers propagate it into
    /// their child contexts but keep enforcing the hard-timeout bound.
    pub cancel: CancellationToken,
    /// The producer has exhausted the data source (natural completion).
    pub data_finished: CancellationToken,
    /// Every worker has drained. The log and error tasks wait for this
    /// specifically — never for `cancel` — so trailing records flush.
    pub workers_finished: CancellationToken,
}

impl Signals {
    fn new() -> Self {
        Signals {
            cancel: CancellationToken::new(),
            data_finished: CancellationToken::new(),
            workers_finished: CancellationToken::new(),
        }
    }
}

/// A thread-safe sink for interactive output (status snapshots), shared
/// between the status task and anything else writing human-facing text
/// (§5 "Output writer").
pub type OutputWriter = Arc<StdMutex<Box<dyn Write + Send>>>;

/// The worker capability registry, keyed by `Config::worker_type`, plus the
/// entrypoint that wires the six cooperating tasks together and runs one
/// dispatch to completion.
pub struct Engine {
    factories: HashMap<String, WorkerFactory>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Engine { factories: HashMap::new() }
    }

    /// Register a worker factory under `name`, matching
    /// `config.worker_type`. Mirrors `blaster.RegisterWorkerType`.
    pub fn register_worker_type(
        &mut self,
        name: impl Into<String>,
        factory: WorkerFactory,
    ) {
        self.factories.insert(name.into(), factory);
    }

    /// Run one dispatch to completion: open the data source and log file,
    /// spawn every task in dependency order, wait for natural completion or
    /// cancellation, drain the worker pool, and return the final metrics
    /// snapshot (or the first fatal error).
    ///
    /// `rate_input` is the optional line-oriented stream for the rate task
    /// (§4.6); `output` is where status snapshots are rendered (§4.7). Pass
    /// `None` for either to disable the corresponding task.
    pub async fn run(
        &self,
        config: Config,
        rate_input: Option<Box<dyn tokio::io::AsyncBufRead + Unpin + Send>>,
        output: Option<OutputWriter>,
    ) -> Result<Stats, RatePipeError> {
        config.validate()?;

        let payload_template = template::parse_renderer(&config.payload_template)?;
        let worker_template = template::parse_renderer(&config.worker_template)?;

        let factory = self
            .factories
            .get(&config.worker_type)
            .ok_or_else(|| {
                RatePipeError::Config(format!("unregistered worker_type: {}", config.worker_type))
            })?;

        let has_log = config.log.is_some();
        let needs_hash = has_log || config.resume;

        let skip_set: HashSet<Hash128> = if config.resume {
            match &config.log {
                Some(path) => logs::load_skip_set(Path::new(path))?,
                None => HashSet::new(),
            }
        } else {
            HashSet::new()
        };

        let log_writer = match &config.log {
            Some(path) => Some(logs::open_log_writer(
                Path::new(path),
                config.resume,
                &config.log_data,
                &config.log_output,
            )?),
            None => None,
        };

        let data_source = DataSource::open(&config.data).await?;
        if let Some(headers) = &config.headers {
            tracing::debug!(count = headers.len(), "using configured headers");
        }

        let metrics = Arc::new(MetricsRegistry::new(config.workers, config.rate));
        let signals = Signals::new();

        let (pacing_tx, pacing_rx) = mpsc::channel::<u32>(1);
        let (work_tx, work_rx) = mpsc::channel::<WorkItem>(1);
        let (rate_tx, rate_rx) = mpsc::channel::<f64>(1);
        let (status_tx, status_rx) = mpsc::channel::<()>(4);
        let (error_tx, error_rx) = mpsc::channel::<String>(1);
        let ignored = Arc::new(AtomicU64::new(0));

        let reporter = ErrorReporter::new(error_tx, Arc::clone(&ignored));
        let error_handle = tokio::spawn(error_loop::run(
            error_rx,
            signals.cancel.clone(),
            Arc::clone(&ignored),
        ));

        let (log_handle, log_tx) = if let Some(writer) = log_writer {
            let (log_tx, log_rx) = mpsc::channel::<LogRecord>(1);
            let reporter = reporter.clone();
            let handle = tokio::spawn(async move {
                if let Err(e) = logs::run_log_task(writer, log_rx).await {
                    reporter.report(&e);
                }
            });
            (Some(handle), Some(log_tx))
        } else {
            (None, None)
        };

        let work_rx = Arc::new(AsyncMutex::new(work_rx));
        let payload_template = Arc::new(payload_template);
        let worker_template = Arc::new(worker_template);
        let log_data = Arc::new(config.log_data.clone());
        let log_output = Arc::new(config.log_output.clone());

        let mut worker_handles = Vec::with_capacity(config.workers);
        for i in 0..config.workers {
            let worker_variant = config.worker_variants[i % config.worker_variants.len()].clone();
            let worker_instance = factory();
            let worker_template = Arc::clone(&worker_template);
            let payload_template = Arc::clone(&payload_template);
            let work_rx = Arc::clone(&work_rx);
            let log_tx = log_tx.clone();
            let log_data = Arc::clone(&log_data);
            let log_output = Arc::clone(&log_output);
            let metrics = Arc::clone(&metrics);
            let signals = signals.clone();
            let reporter = reporter.clone();
            let soft_timeout = config.soft_timeout();
            let hard_timeout = config.hard_timeout();

            worker_handles.push(tokio::spawn(async move {
                let result = worker_pool::run_worker(
                    worker_instance,
                    worker_variant,
                    worker_template,
                    payload_template,
                    soft_timeout,
                    hard_timeout,
                    work_rx,
                    log_tx,
                    log_data,
                    log_output,
                    metrics,
                    signals,
                )
                .await;
                if let Err(e) = result {
                    reporter.report(&e);
                }
            }));
        }
        drop(log_tx);

        let variants = config.payload_variants.clone();
        let resume = config.resume;
        let skip_set = Arc::new(skip_set);
        let main_metrics = Arc::clone(&metrics);
        let main_signals = signals.clone();
        let main_reporter = reporter.clone();
        let headers = config.headers.clone();
        let main_handle = tokio::spawn(async move {
            let result = main_loop::run(
                data_source,
                headers,
                variants,
                skip_set,
                resume,
                needs_hash,
                pacing_rx,
                work_tx,
                main_metrics,
                main_signals,
            )
            .await;
            if let Err(e) = result {
                main_reporter.report(&e);
            }
        });

        let variant_count = config.payload_variants.len().max(1);
        let ticker_metrics = Arc::clone(&metrics);
        let ticker_signals = signals.clone();
        let ticker_status_tx = status_tx.clone();
        let ticker_handle = tokio::spawn(ticker::run(
            config.rate,
            variant_count,
            pacing_tx,
            rate_rx,
            ticker_status_tx,
            ticker_metrics,
            ticker_signals,
        ));

        let rate_handle = rate_input.map(|input| {
            let reporter = reporter.clone();
            let signals = signals.clone();
            tokio::spawn(async move {
                if let Err(e) = rate_loop::run(input, rate_tx, status_tx, signals).await {
                    reporter.report(&e);
                }
            })
        });

        // Every remaining live `ErrorReporter` is now a clone owned by an
        // already-spawned task. Drop this one so the error loop's `recv()`
        // only stays pending while a task that might still report is alive.
        drop(reporter);

        let status_handle = if !config.quiet {
            output.map(|writer| {
                let metrics = Arc::clone(&metrics);
                let signals = signals.clone();
                tokio::spawn(status_loop::run(metrics, status_rx, writer, signals))
            })
        } else {
            None
        };

        let sigint_signals = signals.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("received interrupt signal, cancelling");
                sigint_signals.cancel.cancel();
            }
        });

        tokio::select! {
            _ = signals.cancel.cancelled() => {}
            _ = signals.data_finished.cancelled() => {}
        }
        let _ = main_handle.await;

        for handle in worker_handles {
            let _ = handle.await;
        }
        tracing::debug!("worker pool drained");

        // Now that every worker has drained, nothing is left to race against
        // a soft/hard timeout: unblock any still-running ticker/rate/status
        // tasks. Idempotent if an abort already cancelled everything.
        signals.cancel.cancel();
        signals.workers_finished.cancel();

        let _ = ticker_handle.await;
        if let Some(h) = rate_handle {
            let _ = h.await;
        }
        if let Some(h) = status_handle {
            let _ = h.await;
        }
        if let Some(h) = log_handle {
            let _ = h.await;
        }
        let fatal = error_handle.await.unwrap_or(None);

        let ignored_count = ignored.load(Ordering::Relaxed);
        if ignored_count > 0 {
            tracing::warn!(ignored_count, "suppressed additional fatal errors");
        }

        let stats = Stats::snapshot(&metrics);
        match fatal {
            // §7 "user-visible behavior": the first fatal error wins; the
            // count of every later one it suppressed rides along on the
            // same message so the CLI can print both without a second
            // return channel.
            Some(message) if ignored_count > 0 => Err(RatePipeError::Engine(format!(
                "{message} ({ignored_count} additional error(s) suppressed)"
            ))),
            Some(message) => Err(RatePipeError::Engine(message)),
            None => Ok(stats),
        }
    }
}
