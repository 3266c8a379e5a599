//! `ratepipe-core` — the rate-paced, protocol-agnostic request dispatch
//! engine. See `engine` for the coordinator and its six cooperating tasks.

pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod hash;
pub mod logs;
pub mod metrics;
pub mod stats;
pub mod template;
pub mod worker;
pub mod workers;

pub use config::Config;
pub use engine::{Engine, Signals};
pub use error::RatePipeError;
pub use stats::Stats;
pub use worker::{Payload, Worker, WorkerFactory};
