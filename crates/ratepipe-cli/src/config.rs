//! Flag/env/file config loading, layered as flags > env > file > built-in
//! default (§10.3 of `SPEC_FULL.md`; mirrors the precedence `blast/config.go`
//! gets from `viper`'s flag/env/config-file binding, minus the `viper`
//! dependency itself).

use std::path::PathBuf;

use clap::Parser;
use ratepipe_core::Config;
use ratepipe_core::RatePipeError;
use serde_json::{Map, Value};

/// `ratepipe` — a rate-paced, protocol-agnostic request dispatcher.
///
/// Every option may also be set via a `RATEPIPE_<NAME>` environment
/// variable or a `--config` JSON file; flags win over env vars, which win
/// over the config file, which wins over the built-in default.
#[derive(Parser, Debug)]
#[command(name = "ratepipe", version, about)]
pub struct Cli {
    /// JSON file supplying any of the options below. Flags and env vars
    /// still take precedence over values from this file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// The data source: a file path, an http(s):// URL, or a raw CSV body
    /// (detected by an embedded newline).
    #[arg(long)]
    pub data: Option<String>,

    /// CSV log file to create or append to.
    #[arg(long)]
    pub log: Option<String>,

    /// Load the log file and skip fingerprints already marked successful.
    #[arg(long)]
    pub resume: bool,

    /// Initial dispatch rate in items per second (default 10).
    #[arg(long)]
    pub rate: Option<f64>,

    /// Number of worker tasks (default 10).
    #[arg(long)]
    pub workers: Option<usize>,

    /// Registered worker type to dispatch through (e.g. "http", "simulator").
    #[arg(long)]
    pub worker_type: Option<String>,

    /// Soft timeout in milliseconds handed to each worker (default 1000).
    #[arg(long)]
    pub timeout: Option<u64>,

    /// JSON object rendered per item and passed to `Worker::send`.
    #[arg(long)]
    pub payload_template: Option<String>,

    /// JSON object rendered per worker and passed to `start`/`stop`.
    #[arg(long)]
    pub worker_template: Option<String>,

    /// JSON array of `{key: value}` overlays, one request per entry per row.
    #[arg(long)]
    pub payload_variants: Option<String>,

    /// JSON array of `{key: value}` overlays, round-robined across workers.
    #[arg(long)]
    pub worker_variants: Option<String>,

    /// Data fields to emit as extra log columns.
    #[arg(long, value_delimiter = ',')]
    pub log_data: Vec<String>,

    /// Worker response fields to emit as extra log columns.
    #[arg(long, value_delimiter = ',')]
    pub log_output: Vec<String>,

    /// Column names for the data source; if unset, the first row is used.
    #[arg(long, value_delimiter = ',')]
    pub headers: Vec<String>,

    /// Suppress the interactive status display.
    #[arg(long)]
    pub quiet: bool,

    /// Print the fully resolved configuration as JSON and exit without
    /// dispatching.
    #[arg(long)]
    pub dry: bool,
}

/// `RATEPIPE_<FIELD>` environment variable names, in `Config` field order.
const ENV_FIELDS: &[&str] = &[
    "data",
    "log",
    "resume",
    "rate",
    "workers",
    "worker_type",
    "payload_template",
    "worker_template",
    "payload_variants",
    "worker_variants",
    "log_data",
    "log_output",
    "headers",
    "timeout",
    "quiet",
];

/// Parse one layer's raw string value into the `Value` shape `Config`
/// expects for that field. String-typed fields pass through as-is; the rest
/// are parsed as JSON (numbers, bools, and the template/variant/list
/// fields, which are always JSON on the wire — matching the original's
/// `BLAST_LOG_DATA`/`BLAST_PAYLOAD_TEMPLATE` env vars, which it also
/// documents as JSON-encoded).
fn coerce(field: &str, raw: &str) -> Result<Value, RatePipeError> {
    match field {
        "data" | "log" | "worker_type" => Ok(Value::String(raw.to_string())),
        _ => serde_json::from_str(raw)
            .map_err(|e| RatePipeError::Config(format!("invalid value for `{field}`: {e}"))),
    }
}

/// Read `RATEPIPE_<FIELD>` for every known field into a partial JSON object.
fn env_layer() -> Result<Map<String, Value>, RatePipeError> {
    let mut out = Map::new();
    for field in ENV_FIELDS {
        let var = format!("RATEPIPE_{}", field.to_uppercase());
        if let Ok(raw) = std::env::var(&var) {
            out.insert(field.to_string(), coerce(field, &raw)?);
        }
    }
    Ok(out)
}

/// Read the `--config` file (if any) as a partial JSON object.
fn file_layer(path: Option<&PathBuf>) -> Result<Map<String, Value>, RatePipeError> {
    match path {
        None => Ok(Map::new()),
        Some(path) => {
            let body = std::fs::read_to_string(path)?;
            match serde_json::from_str(&body)? {
                Value::Object(map) => Ok(map),
                _ => Err(RatePipeError::Config(format!(
                    "{}: top-level config must be a JSON object",
                    path.display()
                ))),
            }
        }
    }
}

/// Build this invocation's partial JSON object from only the flags the
/// caller actually set. `bool` flags here can only assert `true` — there is
/// no way to tell "not passed" from "passed as false" with a plain clap
/// flag — so a `false` boolean must come from the env or file layer.
fn flag_layer(cli: &Cli) -> Map<String, Value> {
    let mut out = Map::new();
    let mut set = |key: &str, value: Value| {
        out.insert(key.to_string(), value);
    };

    if let Some(v) = &cli.data {
        set("data", Value::String(v.clone()));
    }
    if let Some(v) = &cli.log {
        set("log", Value::String(v.clone()));
    }
    if cli.resume {
        set("resume", Value::Bool(true));
    }
    if let Some(v) = cli.rate {
        set("rate", Value::from(v));
    }
    if let Some(v) = cli.workers {
        set("workers", Value::from(v));
    }
    if let Some(v) = &cli.worker_type {
        set("worker_type", Value::String(v.clone()));
    }
    if let Some(v) = cli.timeout {
        set("timeout", Value::from(v));
    }
    if let Some(raw) = &cli.payload_template {
        if let Ok(v) = serde_json::from_str(raw) {
            set("payload_template", v);
        }
    }
    if let Some(raw) = &cli.worker_template {
        if let Ok(v) = serde_json::from_str(raw) {
            set("worker_template", v);
        }
    }
    if let Some(raw) = &cli.payload_variants {
        if let Ok(v) = serde_json::from_str(raw) {
            set("payload_variants", v);
        }
    }
    if let Some(raw) = &cli.worker_variants {
        if let Ok(v) = serde_json::from_str(raw) {
            set("worker_variants", v);
        }
    }
    if !cli.log_data.is_empty() {
        set("log_data", Value::from(cli.log_data.clone()));
    }
    if !cli.log_output.is_empty() {
        set("log_output", Value::from(cli.log_output.clone()));
    }
    if !cli.headers.is_empty() {
        set("headers", Value::from(cli.headers.clone()));
    }
    if cli.quiet {
        set("quiet", Value::Bool(true));
    }
    out
}

/// Merge `override_layer` on top of `base`, field by field.
fn merge(mut base: Map<String, Value>, override_layer: Map<String, Value>) -> Map<String, Value> {
    for (k, v) in override_layer {
        base.insert(k, v);
    }
    base
}

/// Resolve a [`Config`] from `cli` per the documented precedence: flags,
/// then environment, then `--config` file, then `Config`'s own
/// `#[serde(default)]`s.
pub fn resolve(cli: &Cli) -> Result<Config, RatePipeError> {
    let layered = merge(
        merge(file_layer(cli.config.as_ref())?, env_layer()?),
        flag_layer(cli),
    );
    let config: Config = serde_json::from_value(Value::Object(layered))
        .map_err(|e| RatePipeError::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}
