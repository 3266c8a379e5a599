//! `HttpWorker` — issues one HTTP request per payload.
//!
//! Grounded in the original `httpworker/httpworker.go`: the rendered
//! payload carries `method`, `url`, an optional `body`, and an optional
//! `headers` map; any non-2xx response or transport error is a failed send
//! (not fatal — see `error.rs`/§7). All worker instances in the pool share
//! one `reqwest::Client` so connection pooling works across the pool
//! instead of per-worker.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::worker::{stringify, Payload, Worker};

pub struct HttpWorker {
    client: Client,
}

impl HttpWorker {
    pub fn new(client: Client) -> Self {
        HttpWorker { client }
    }
}

impl Default for HttpWorker {
    fn default() -> Self {
        HttpWorker::new(Client::new())
    }
}

fn field(payload: &Payload, key: &str) -> Option<String> {
    payload.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

#[async_trait]
impl Worker for HttpWorker {
    async fn send(&self, ctx: CancellationToken, payload: Payload) -> Result<Payload, String> {
        let method = field(&payload, "method").unwrap_or_else(|| "GET".to_string());
        let url = field(&payload, "url").ok_or_else(|| "missing `url` field in payload".to_string())?;
        let body = field(&payload, "body").unwrap_or_default();

        let method = method
            .parse::<reqwest::Method>()
            .map_err(|e| format!("invalid HTTP method {method:?}: {e}"))?;

        let mut request = self.client.request(method, &url).body(body);

        if let Some(Value::Object(headers)) = payload.get("headers") {
            for (name, value) in headers {
                request = request.header(name.as_str(), stringify(Some(value)));
            }
        }

        let response = tokio::select! {
            res = request.send() => res.map_err(|e| e.to_string())?,
            _ = ctx.cancelled() => return Err("cancelled before response received".to_string()),
        };

        let status = response.status();
        if !status.is_success() {
            return Err(format!("non-2xx status code: {}", status.as_u16()));
        }

        let mut out = Payload::new();
        out.insert("status".to_string(), Value::String(status.as_u16().to_string()));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_reads_string_values() {
        let mut p = Payload::new();
        p.insert("url".to_string(), Value::String("http://x".to_string()));
        assert_eq!(field(&p, "url"), Some("http://x".to_string()));
    }

    #[test]
    fn field_missing_key_is_none() {
        let p = Payload::new();
        assert_eq!(field(&p, "url"), None);
    }

    #[tokio::test]
    async fn send_without_url_is_an_error() {
        let worker = HttpWorker::default();
        let result = worker.send(CancellationToken::new(), Payload::new()).await;
        assert!(result.is_err());
    }
}
