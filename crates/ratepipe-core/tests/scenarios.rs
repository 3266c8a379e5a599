//! End-to-end scenarios driven entirely through `ratepipe_core`'s public API
//! (`Engine::run` against an in-memory `Worker`), complementing the
//! per-module unit tests with full six-task wiring.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ratepipe_core::error::HARD_TIMEOUT_MESSAGE;
use ratepipe_core::hash::Hash128;
use ratepipe_core::{Config, Engine, Payload, Worker};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

fn minimal_config(data: &str, worker_type: &str) -> Config {
    Config {
        data: data.to_string(),
        log: None,
        resume: false,
        rate: 100.0,
        workers: 1,
        worker_type: worker_type.to_string(),
        payload_template: Value::Object(serde_json::Map::new()),
        worker_template: Value::Object(serde_json::Map::new()),
        payload_variants: vec![BTreeMap::new()],
        worker_variants: vec![BTreeMap::new()],
        log_data: vec![],
        log_output: vec![],
        headers: Some(vec!["head".to_string()]),
        timeout: 1000,
        quiet: true,
    }
}

struct AlwaysSucceeds;

#[async_trait]
impl Worker for AlwaysSucceeds {
    async fn send(&self, _ctx: CancellationToken, _payload: Payload) -> Result<Payload, String> {
        let mut out = Payload::new();
        out.insert("status".to_string(), Value::String("[success]".to_string()));
        Ok(out)
    }
}

#[tokio::test]
async fn three_item_success_logs_three_distinct_fingerprints() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("log.csv");

    let mut config = minimal_config("a\nb\nc\n", "scripted");
    config.log = Some(log_path.to_str().unwrap().to_string());
    config.log_output = vec!["status".to_string()];

    let mut engine = Engine::new();
    engine.register_worker_type("scripted", Box::new(|| Box::new(AlwaysSucceeds)));

    let stats = engine.run(config, None, None).await.unwrap();
    assert_eq!(stats.all.summary.success, 3);
    assert_eq!(stats.all.summary.fail, 0);
    assert_eq!(stats.all.status.len(), 1);
    assert_eq!(stats.all.status[0].status, "[success]");
    assert_eq!(stats.all.status[0].count, 3);

    let content = std::fs::read_to_string(&log_path).unwrap();
    let mut reader = csv::Reader::from_reader(content.as_bytes());
    let mut hashes = std::collections::HashSet::new();
    for record in reader.records() {
        let record = record.unwrap();
        assert_eq!(record.get(1).unwrap(), "true");
        hashes.insert(record.get(0).unwrap().to_string());
    }
    assert_eq!(hashes.len(), 3);
}

#[tokio::test]
async fn resume_skips_fingerprints_marked_successful_in_a_prior_run() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("log.csv");

    let mut map_a = BTreeMap::new();
    map_a.insert("head".to_string(), "a".to_string());
    let mut map_b = BTreeMap::new();
    map_b.insert("head".to_string(), "b".to_string());
    let hash_a = Hash128::of(&map_a);
    let hash_b = Hash128::of(&map_b);

    std::fs::write(&log_path, format!("hash,result\n{hash_a},true\n{hash_b},false\n")).unwrap();

    let mut config = minimal_config("a\nb\nc\nd\n", "scripted");
    config.resume = true;
    config.log = Some(log_path.to_str().unwrap().to_string());

    let mut engine = Engine::new();
    engine.register_worker_type("scripted", Box::new(|| Box::new(AlwaysSucceeds)));

    let stats = engine.run(config, None, None).await.unwrap();
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.all.summary.started, 3);

    let content = std::fs::read_to_string(&log_path).unwrap();
    let non_blank_lines = content.lines().filter(|l| !l.is_empty()).count();
    // header + 2 prior rows + 3 freshly dispatched rows
    assert_eq!(non_blank_lines, 1 + 2 + 3);
}

struct RecordingWorker {
    seen: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl Worker for RecordingWorker {
    async fn send(&self, _ctx: CancellationToken, payload: Payload) -> Result<Payload, String> {
        self.seen.lock().await.push(Value::Object(payload));
        let mut out = Payload::new();
        out.insert("status".to_string(), Value::String("[success]".to_string()));
        Ok(out)
    }
}

#[tokio::test]
async fn payload_variants_fan_out_to_distinct_renders() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_for_factory = Arc::clone(&seen);

    let mut config = minimal_config("a\nb\n", "recording");
    config.payload_template = json!({"v1": "{{.head}}-{{.p1}}", "v2": "{{.p2}}"});

    let mut variant_1 = BTreeMap::new();
    variant_1.insert("p1".to_string(), "p1v1".to_string());
    variant_1.insert("p2".to_string(), "p2v1".to_string());
    let mut variant_2 = BTreeMap::new();
    variant_2.insert("p1".to_string(), "p1v2".to_string());
    variant_2.insert("p2".to_string(), "p2v2".to_string());
    config.payload_variants = vec![variant_1, variant_2];

    let mut engine = Engine::new();
    engine.register_worker_type(
        "recording",
        Box::new(move || {
            Box::new(RecordingWorker { seen: Arc::clone(&seen_for_factory) }) as Box<dyn Worker>
        }),
    );

    let stats = engine.run(config, None, None).await.unwrap();
    assert_eq!(stats.all.summary.started, 4);

    let seen = seen.lock().await;
    assert_eq!(seen.len(), 4);
    let mut renders: Vec<String> = seen.iter().map(|v| v.to_string()).collect();
    renders.sort();
    renders.dedup();
    assert_eq!(renders.len(), 4, "all four rendered payloads should differ");
}

struct EternalSleeper;

#[async_trait]
impl Worker for EternalSleeper {
    async fn send(&self, _ctx: CancellationToken, _payload: Payload) -> Result<Payload, String> {
        loop {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }
}

#[tokio::test]
async fn hard_timeout_is_fatal_with_the_exact_diagnostic() {
    let mut config = minimal_config("a\n", "sleeper");
    config.timeout = 5;

    let mut engine = Engine::new();
    engine.register_worker_type("sleeper", Box::new(|| Box::new(EternalSleeper)));

    let result = tokio::time::timeout(Duration::from_secs(5), engine.run(config, None, None))
        .await
        .expect("engine should report the hard timeout well within soft_timeout + 1s + slack");
    let err = result.expect_err("a worker stuck past the hard timeout must be fatal");
    assert_eq!(err.to_string(), format!("Engine error: {HARD_TIMEOUT_MESSAGE}"));
}

#[tokio::test]
async fn rate_change_via_input_stream_opens_a_new_segment() {
    let mut config = minimal_config("a\nb\nc\nd\ne\n", "scripted");
    config.rate = 0.0;

    let mut engine = Engine::new();
    engine.register_worker_type("scripted", Box::new(|| Box::new(AlwaysSucceeds)));

    let rate_input: Box<dyn tokio::io::AsyncBufRead + Unpin + Send> =
        Box::new(std::io::Cursor::new(b"10\n".to_vec()));

    let stats = tokio::time::timeout(
        Duration::from_secs(5),
        engine.run(config, Some(rate_input), None),
    )
    .await
    .expect("rate change should unblock the zero-rate ticker promptly")
    .unwrap();

    assert!(stats.segments.len() >= 2);
    assert_eq!(stats.segments[0].desired_rate, 0.0);
    assert_eq!(stats.segments.last().unwrap().desired_rate, 10.0);
    assert_eq!(stats.all.summary.success, 5);
}
