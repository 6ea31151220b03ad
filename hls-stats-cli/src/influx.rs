//! InfluxDB v2 sink.
//!
//! Events are rendered to line protocol as they arrive and buffered in memory; a
//! background task posts the buffer to `/api/v2/write` every few seconds and the
//! command flushes once more on shutdown.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hls_stats_engine::{CORRELATION_HEADER, EventSink, FailureEvent, SuccessEvent};
use parking_lot::Mutex;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{AppError, Result};

pub const FLUSH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfluxConfig {
    pub endpoint: String,
    pub org: String,
    pub bucket: String,
    pub token: String,
}

impl InfluxConfig {
    pub fn write_url(&self) -> Result<Url> {
        let base = self.endpoint.trim_end_matches('/');
        let mut url = Url::parse(&format!("{base}/api/v2/write")).map_err(|e| {
            AppError::InvalidInput(format!("invalid influx endpoint `{}`: {e}", self.endpoint))
        })?;
        url.query_pairs_mut()
            .append_pair("org", &self.org)
            .append_pair("bucket", &self.bucket)
            .append_pair("precision", "ns");
        Ok(url)
    }
}

pub struct InfluxSink {
    client: Client,
    write_url: Url,
    token: String,
    session: String,
    buffer: Mutex<Vec<String>>,
}

impl InfluxSink {
    pub fn new(config: &InfluxConfig, client: Client, session: Uuid) -> Result<Self> {
        Ok(Self {
            client,
            write_url: config.write_url()?,
            token: config.token.clone(),
            session: session.to_string(),
            buffer: Mutex::new(Vec::new()),
        })
    }

    pub fn pending(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Posts every buffered point. Points of a failed write are dropped.
    pub async fn flush(&self) -> Result<usize> {
        let lines = std::mem::take(&mut *self.buffer.lock());
        if lines.is_empty() {
            return Ok(0);
        }

        let response = self
            .client
            .post(self.write_url.clone())
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(lines.join("\n"))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Influx(format!("{status} - {body}")));
        }

        debug!(points = lines.len(), "Influx write complete");
        Ok(lines.len())
    }

    /// Flushes on a fixed period until the task is aborted.
    pub fn spawn_flusher(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let sink = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = sink.flush().await {
                    warn!(error = %e, "Periodic influx flush failed");
                }
            }
        })
    }

    fn push(&self, line: String) {
        self.buffer.lock().push(line);
    }
}

impl EventSink for InfluxSink {
    fn on_success(&self, event: &SuccessEvent) {
        self.push(success_line(event, &self.session));
    }

    fn on_failure(&self, event: &FailureEvent) {
        self.push(failure_line(event, &self.session));
    }
}

pub fn success_line(event: &SuccessEvent, session: &str) -> String {
    let mut line = String::from("stats");
    push_tag(&mut line, "Host", &event.host);
    push_tag(&mut line, "Session", session);
    line.push(' ');
    push_field(&mut line, CORRELATION_HEADER, &quoted(&event.correlation_id.to_string()), true);
    push_field(
        &mut line,
        "Duration",
        &format!("{}i", event.duration.as_millis()),
        false,
    );
    push_field(&mut line, "Bytes", &format!("{}i", event.bytes), false);
    push_field(&mut line, "File", &quoted(&event.file), false);
    push_field(&mut line, "URL", &quoted(&event.url), false);
    push_timestamp(&mut line, &event.timestamp);
    line
}

pub fn failure_line(event: &FailureEvent, session: &str) -> String {
    let mut line = String::from("errors");
    push_tag(&mut line, "Host", &event.host);
    push_tag(&mut line, "File", &event.file);
    push_tag(&mut line, "Session", session);
    line.push(' ');
    push_field(&mut line, CORRELATION_HEADER, &quoted(&event.correlation_id.to_string()), true);
    push_field(&mut line, "URL", &quoted(&event.url), false);
    push_field(&mut line, "HTTPStatus", &format!("{}i", event.http_status), false);
    push_field(&mut line, "Message", &quoted(&event.message), false);
    push_timestamp(&mut line, &event.timestamp);
    line
}

// Empty tag values are rejected by the server, so they are left out.
fn push_tag(line: &mut String, key: &str, value: &str) {
    if value.is_empty() {
        return;
    }
    let _ = write!(line, ",{}={}", escape_key(key), escape_key(value));
}

fn push_field(line: &mut String, key: &str, value: &str, first: bool) {
    if !first {
        line.push(',');
    }
    let _ = write!(line, "{}={}", escape_key(key), value);
}

fn push_timestamp(line: &mut String, timestamp: &DateTime<Utc>) {
    let _ = write!(line, " {}", timestamp.timestamp_nanos_opt().unwrap_or_default());
}

/// Escapes tag keys, tag values and field keys.
pub fn escape_key(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | '=' | ' ') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Quotes a string field value.
pub fn quoted(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    escaped.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('"');
    escaped
}
