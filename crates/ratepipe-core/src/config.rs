//! The `Config` shape the engine is driven by (§6 "Configuration").
//!
//! Loading it (flags, env, file, precedence) is out of scope for this
//! crate — `ratepipe-cli` owns that — but the shape, defaults, and
//! validation live here so both the CLI and any embedder share one
//! contract.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RatePipeError;

fn default_rate() -> f64 {
    10.0
}

fn default_workers() -> usize {
    10
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_variants() -> Vec<BTreeMap<String, String>> {
    vec![BTreeMap::new()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub data: String,

    #[serde(default)]
    pub log: Option<String>,

    #[serde(default)]
    pub resume: bool,

    #[serde(default = "default_rate")]
    pub rate: f64,

    #[serde(default = "default_workers")]
    pub workers: usize,

    pub worker_type: String,

    #[serde(default)]
    pub payload_template: Value,

    #[serde(default)]
    pub worker_template: Value,

    #[serde(default = "default_variants")]
    pub payload_variants: Vec<BTreeMap<String, String>>,

    #[serde(default = "default_variants")]
    pub worker_variants: Vec<BTreeMap<String, String>>,

    #[serde(default)]
    pub log_data: Vec<String>,

    #[serde(default)]
    pub log_output: Vec<String>,

    #[serde(default)]
    pub headers: Option<Vec<String>>,

    #[serde(default = "default_timeout_ms")]
    pub timeout: u64,

    #[serde(default)]
    pub quiet: bool,
}

impl Config {
    /// Reject shapes the engine cannot run with — this must happen before
    /// dispatch starts (§7 "Configuration error").
    pub fn validate(&self) -> Result<(), RatePipeError> {
        if self.data.is_empty() {
            return Err(RatePipeError::Config("`data` must be set".to_string()));
        }
        if self.worker_type.is_empty() {
            return Err(RatePipeError::Config("`worker_type` must be set".to_string()));
        }
        if self.workers < 1 {
            return Err(RatePipeError::Config("`workers` must be >= 1".to_string()));
        }
        if self.payload_variants.is_empty() {
            return Err(RatePipeError::Config("`payload_variants` must have at least one entry".to_string()));
        }
        if self.worker_variants.is_empty() {
            return Err(RatePipeError::Config("`worker_variants` must have at least one entry".to_string()));
        }
        if self.rate < 0.0 {
            return Err(RatePipeError::Config("`rate` must be >= 0".to_string()));
        }
        Ok(())
    }

    pub fn soft_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout)
    }

    pub fn hard_timeout(&self) -> std::time::Duration {
        self.soft_timeout() + std::time::Duration::from_secs(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Config {
        Config {
            data: "a\nb\n".to_string(),
            log: None,
            resume: false,
            rate: 10.0,
            workers: 1,
            worker_type: "simulator".to_string(),
            payload_template: Value::Null,
            worker_template: Value::Null,
            payload_variants: default_variants(),
            worker_variants: default_variants(),
            log_data: vec![],
            log_output: vec![],
            headers: None,
            timeout: 1000,
            quiet: false,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(minimal().validate().is_ok());
    }

    #[test]
    fn empty_data_is_rejected() {
        let mut c = minimal();
        c.data = String::new();
        assert!(c.validate().is_err());
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut c = minimal();
        c.workers = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn missing_worker_type_is_rejected() {
        let mut c = minimal();
        c.worker_type = String::new();
        assert!(c.validate().is_err());
    }

    #[test]
    fn hard_timeout_is_soft_plus_one_second() {
        let c = minimal();
        assert_eq!(c.hard_timeout(), c.soft_timeout() + std::time::Duration::from_secs(1));
    }

    #[test]
    fn deserializes_from_minimal_json() {
        let json = serde_json::json!({
            "data": "a\nb\n",
            "worker_type": "simulator",
        });
        let c: Config = serde_json::from_value(json).unwrap();
        assert_eq!(c.rate, 10.0);
        assert_eq!(c.workers, 10);
        assert_eq!(c.timeout, 1000);
        assert_eq!(c.payload_variants.len(), 1);
    }
}
