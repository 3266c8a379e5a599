//! Bundled `Worker` implementations, registered by `ratepipe-cli` under the
//! `"http"` and `"simulator"` keys (§11 of `SPEC_FULL.md`).

pub mod http;
pub mod simulator;

pub use http::HttpWorker;
pub use simulator::SimulatorWorker;
