//! `SimulatorWorker` — a `Starter`-only dummy worker for smoke-testing a
//! run without a real downstream target.
//!
//! Grounded in `dummyworker/dummyworker.go`: `start` records a `base`
//! overlay value (just to exercise the `Starter` hook), `send` sleeps a
//! random duration and fails a configurable fraction of the time.

use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::worker::{Payload, Worker};

pub struct SimulatorWorker {
    base: String,
    min_delay_ms: u64,
    max_delay_ms: u64,
    fail_fraction: f64,
}

impl SimulatorWorker {
    pub fn new(fail_fraction: f64) -> Self {
        SimulatorWorker {
            base: String::new(),
            min_delay_ms: 1000,
            max_delay_ms: 2000,
            fail_fraction,
        }
    }
}

impl Default for SimulatorWorker {
    fn default() -> Self {
        SimulatorWorker::new(0.1)
    }
}

#[async_trait]
impl Worker for SimulatorWorker {
    async fn start(&mut self, _ctx: CancellationToken, payload: Payload) -> Result<(), String> {
        if let Some(Value::String(base)) = payload.get("base") {
            self.base = base.clone();
        }
        tracing::debug!(base = %self.base, "simulator worker starting");
        Ok(())
    }

    async fn send(&self, ctx: CancellationToken, payload: Payload) -> Result<Payload, String> {
        let path = payload.get("path").and_then(|v| v.as_str()).unwrap_or("");
        tracing::debug!(base = %self.base, path, "simulator worker sending");

        let delay_ms = rand::thread_rng().gen_range(self.min_delay_ms..=self.max_delay_ms);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
            _ = ctx.cancelled() => return Err("cancelled while sleeping".to_string()),
        }

        if rand::thread_rng().gen::<f64>() < self.fail_fraction {
            return Err("simulated failure".to_string());
        }

        let mut out = Payload::new();
        out.insert("status".to_string(), Value::String("[success]".to_string()));
        Ok(out)
    }
}
