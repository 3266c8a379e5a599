//! The `Worker` capability contract (§6 of the specification).
//!
//! A worker is anything that can send a rendered payload and report back a
//! response map. `Starter`/`Stopper` are optional lifecycle hooks,
//! mirroring the Go interfaces `Worker`/`Starter`/`Stopper` in
//! `blaster/blaster.go` (`Send`, `Start`, `Stop`).

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

pub type Payload = Map<String, Value>;

/// The mandatory capability every worker implements: send one rendered
/// payload and produce a response map (or an error, which is counted as a
/// failed request rather than treated as fatal — see §7).
#[async_trait]
pub trait Worker: Send + Sync {
    async fn send(&self, ctx: CancellationToken, payload: Payload) -> Result<Payload, String>;

    /// Optional startup hook. A worker that needs no initialization simply
    /// does not override this; the default is a no-op.
    async fn start(&mut self, _ctx: CancellationToken, _payload: Payload) -> Result<(), String> {
        Ok(())
    }

    /// Optional symmetric shutdown hook, invoked when a worker task exits.
    async fn stop(&mut self, _ctx: CancellationToken, _payload: Payload) -> Result<(), String> {
        Ok(())
    }
}

/// A factory that builds a fresh worker instance for each pool slot, keyed
/// by the configured `worker_type` string (mirrors `RegisterWorkerType`).
pub type WorkerFactory = Box<dyn Fn() -> Box<dyn Worker> + Send + Sync>;

/// Coerce a response field into its log/metrics string form.
///
/// - An exact string is used as-is.
/// - Any other scalar (bool/number) is formatted textually.
/// - Any other JSON value (object/array) is canonically serialized.
/// - `None`/`Value::Null` become `"(none)"`.
pub fn stringify(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "(none)".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => other.to_string(),
    }
}

/// Look up and stringify the `"status"` field of a worker response, used
/// to group metrics by status (§4.3 step 7).
pub fn status_of(response: &Payload) -> String {
    stringify(response.get("status"))
}

/// Build a `RatePipeError`-free string-keyed lookup from `data`, used for
/// populating `LogRecord::data_fields`/`output_fields` (missing key ->
/// empty string per §4.3 step 9).
pub fn field_or_empty(map: &Payload, key: &str) -> String {
    map.get(key).map(|v| stringify(Some(v))).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(pairs: &[(&str, Value)]) -> Payload {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn stringify_string_is_as_is() {
        assert_eq!(stringify(Some(&Value::String("ok".into()))), "ok");
    }

    #[test]
    fn stringify_missing_is_none_marker() {
        assert_eq!(stringify(None), "(none)");
    }

    #[test]
    fn stringify_null_is_none_marker() {
        assert_eq!(stringify(Some(&Value::Null)), "(none)");
    }

    #[test]
    fn stringify_number_is_textual() {
        assert_eq!(stringify(Some(&Value::from(200))), "200");
    }

    #[test]
    fn stringify_bool_is_textual() {
        assert_eq!(stringify(Some(&Value::from(true))), "true");
    }

    #[test]
    fn stringify_object_is_canonical_json() {
        let v = serde_json::json!({"a": 1});
        assert_eq!(stringify(Some(&v)), "{\"a\":1}");
    }

    #[test]
    fn status_of_missing_is_none_marker() {
        let p = payload(&[]);
        assert_eq!(status_of(&p), "(none)");
    }

    #[test]
    fn status_of_present_string() {
        let p = payload(&[("status", Value::String("[success]".into()))]);
        assert_eq!(status_of(&p), "[success]");
    }

    #[test]
    fn field_or_empty_missing_key() {
        let p = payload(&[]);
        assert_eq!(field_or_empty(&p, "x"), "");
    }

    #[test]
    fn field_or_empty_present_key() {
        let p = payload(&[("x", Value::String("v".into()))]);
        assert_eq!(field_or_empty(&p, "x"), "v");
    }
}
