//! The payload/worker template engine.
//!
//! Config templates (`payload_template`, `worker_template`) are JSON-like
//! trees: maps, sequences, string templates, and literal scalars. Strings
//! are compiled once at startup into a small token list; non-string
//! scalars render to themselves unchanged. A [`Renderer`] is parsed from a
//! `serde_json::Value` and rendered per item against a
//! `data: BTreeMap<String, String>` context.
//!
//! Three helpers are available inside `{{ }}` blocks in addition to plain
//! `.name` variable references: `rand_int lo hi`, `rand_float lo hi`, and
//! `rand_string n`.

use std::collections::BTreeMap;

use rand::Rng;
use serde_json::Value;

use crate::error::RatePipeError;

/// A parsed renderer node. Mirrors the shape of the JSON value it was
/// parsed from: containers recurse, strings become compiled templates,
/// everything else is a literal passed through untouched.
#[derive(Debug, Clone)]
pub enum Renderer {
    Map(Vec<(String, Renderer)>),
    Seq(Vec<Renderer>),
    Template(CompiledTemplate),
    Native(Value),
    Null,
}

/// A compiled string template: an alternating sequence of literal text and
/// substitution segments.
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Var(String),
    RandInt(i64, i64),
    RandFloat(f64, f64),
    RandString(usize),
}

/// Parse a `serde_json::Value` (typically deserialized from a config's
/// `payload_template` / `worker_template` field) into a [`Renderer`] tree.
pub fn parse_renderer(value: &Value) -> Result<Renderer, RatePipeError> {
    match value {
        Value::Object(map) => {
            let mut out = Vec::with_capacity(map.len());
            for (k, v) in map {
                out.push((k.clone(), parse_renderer(v)?));
            }
            Ok(Renderer::Map(out))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for v in items {
                out.push(parse_renderer(v)?);
            }
            Ok(Renderer::Seq(out))
        }
        Value::String(s) => Ok(Renderer::Template(compile(s)?)),
        Value::Null => Ok(Renderer::Null),
        other => Ok(Renderer::Native(other.clone())),
    }
}

/// Compile a single template string into alternating literal/substitution
/// segments.
fn compile(input: &str) -> Result<CompiledTemplate, RatePipeError> {
    let mut segments = Vec::new();
    let mut rest = input;

    loop {
        match rest.find("{{") {
            None => {
                if !rest.is_empty() {
                    segments.push(Segment::Literal(rest.to_string()));
                }
                break;
            }
            Some(start) => {
                if start > 0 {
                    segments.push(Segment::Literal(rest[..start].to_string()));
                }
                let after_open = &rest[start + 2..];
                let end = after_open.find("}}").ok_or_else(|| {
                    RatePipeError::Template(format!("unterminated template block in {input:?}"))
                })?;
                let expr = after_open[..end].trim();
                segments.push(parse_expr(expr, input)?);
                rest = &after_open[end + 2..];
            }
        }
    }

    Ok(CompiledTemplate { segments })
}

fn parse_expr(expr: &str, whole: &str) -> Result<Segment, RatePipeError> {
    if let Some(name) = expr.strip_prefix('.') {
        return Ok(Segment::Var(name.trim().to_string()));
    }

    let mut parts = expr.split_whitespace();
    match parts.next() {
        Some("rand_int") => {
            let lo = next_i64(&mut parts, whole)?;
            let hi = next_i64(&mut parts, whole)?;
            Ok(Segment::RandInt(lo, hi))
        }
        Some("rand_float") => {
            let lo = next_f64(&mut parts, whole)?;
            let hi = next_f64(&mut parts, whole)?;
            Ok(Segment::RandFloat(lo, hi))
        }
        Some("rand_string") => {
            let n = next_i64(&mut parts, whole)?;
            Ok(Segment::RandString(n.max(0) as usize))
        }
        _ => Err(RatePipeError::Template(format!(
            "unrecognized template expression {expr:?} in {whole:?}"
        ))),
    }
}

fn next_i64<'a>(
    parts: &mut impl Iterator<Item = &'a str>,
    whole: &str,
) -> Result<i64, RatePipeError> {
    parts
        .next()
        .ok_or_else(|| RatePipeError::Template(format!("missing argument in {whole:?}")))?
        .parse::<i64>()
        .map_err(|e| RatePipeError::Template(format!("bad integer argument in {whole:?}: {e}")))
}

fn next_f64<'a>(
    parts: &mut impl Iterator<Item = &'a str>,
    whole: &str,
) -> Result<f64, RatePipeError> {
    parts
        .next()
        .ok_or_else(|| RatePipeError::Template(format!("missing argument in {whole:?}")))?
        .parse::<f64>()
        .map_err(|e| RatePipeError::Template(format!("bad float argument in {whole:?}: {e}")))
}

/// Render a [`Renderer`] tree against `data`, producing a `serde_json::Value`.
pub fn render(renderer: &Renderer, data: &BTreeMap<String, String>) -> Result<Value, RatePipeError> {
    match renderer {
        Renderer::Map(entries) => {
            let mut out = serde_json::Map::with_capacity(entries.len());
            for (k, v) in entries {
                out.insert(k.clone(), render(v, data)?);
            }
            Ok(Value::Object(out))
        }
        Renderer::Seq(items) => {
            let mut out = Vec::with_capacity(items.len());
            for v in items {
                out.push(render(v, data)?);
            }
            Ok(Value::Array(out))
        }
        Renderer::Template(t) => Ok(Value::String(render_template(t, data))),
        Renderer::Native(v) => Ok(v.clone()),
        Renderer::Null => Ok(Value::Null),
    }
}

/// Render a [`Renderer`] that is expected to be a top-level map (the shape
/// `payload_template`/`worker_template` must have), returning the rendered
/// object as a `serde_json::Map`.
pub fn render_map(
    renderer: &Renderer,
    data: &BTreeMap<String, String>,
) -> Result<serde_json::Map<String, Value>, RatePipeError> {
    match render(renderer, data)? {
        Value::Object(map) => Ok(map),
        _ => Err(RatePipeError::Template(
            "rendered template is not a map".to_string(),
        )),
    }
}

fn render_template(t: &CompiledTemplate, data: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    let mut rng = rand::thread_rng();
    for seg in &t.segments {
        match seg {
            Segment::Literal(s) => out.push_str(s),
            Segment::Var(name) => {
                if let Some(v) = data.get(name) {
                    out.push_str(v);
                }
            }
            Segment::RandInt(lo, hi) => out.push_str(&rng.gen_range(*lo..*hi).to_string()),
            Segment::RandFloat(lo, hi) => out.push_str(&rng.gen_range(*lo..*hi).to_string()),
            Segment::RandString(n) => out.push_str(&random_string(&mut rng, *n)),
        }
    }
    out
}

fn random_string(rng: &mut impl Rng, len: usize) -> String {
    const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
    (0..len)
        .map(|_| LETTERS[rng.gen_range(0..LETTERS.len())] as char)
        .collect()
}
