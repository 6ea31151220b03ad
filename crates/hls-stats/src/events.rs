use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use url::Url;
use uuid::Uuid;

use crate::resolver::split_url;

/// A completed download: status 200 and the whole body received.
#[derive(Debug, Clone, PartialEq)]
pub struct SuccessEvent {
    pub correlation_id: Uuid,
    /// When the exchange completed
    pub timestamp: DateTime<Utc>,
    pub url: String,
    pub host: String,
    pub file: String,
    /// Decoded payload size
    pub bytes: u64,
    /// Request start until the last body byte was read and decoded
    pub duration: Duration,
    /// Request start until the response headers arrived
    pub time_to_headers: Duration,
}

/// A download (or a playback step) that did not produce a usable segment.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureEvent {
    pub correlation_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub url: String,
    pub host: String,
    pub file: String,
    /// HTTP status of the response, 0 when no usable response was received
    pub http_status: u16,
    pub message: String,
}

impl FailureEvent {
    /// Builds a failure for `url` with a fresh correlation id, stamped now.
    pub fn new(url: &Url, http_status: u16, message: impl Into<String>) -> Self {
        let (host, file) = split_url(url);
        Self {
            correlation_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            url: url.to_string(),
            host,
            file,
            http_status,
            message: message.into(),
        }
    }

    pub fn is_network_level(&self) -> bool {
        self.http_status == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    Success(SuccessEvent),
    Failure(FailureEvent),
}

impl DownloadEvent {
    pub fn correlation_id(&self) -> Uuid {
        match self {
            Self::Success(event) => event.correlation_id,
            Self::Failure(event) => event.correlation_id,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Self::Success(event) => &event.url,
            Self::Failure(event) => &event.url,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Receives every event produced by the sessions.
///
/// Sessions call the sink from their own tasks without any coordination, so
/// implementations must be safe for concurrent use and must not block for long.
pub trait EventSink: Send + Sync {
    fn on_success(&self, event: &SuccessEvent);

    fn on_failure(&self, event: &FailureEvent);

    fn emit(&self, event: &DownloadEvent) {
        match event {
            DownloadEvent::Success(event) => self.on_success(event),
            DownloadEvent::Failure(event) => self.on_failure(event),
        }
    }
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn on_success(&self, event: &SuccessEvent) {
        (**self).on_success(event);
    }

    fn on_failure(&self, event: &FailureEvent) {
        (**self).on_failure(event);
    }
}

/// Delivers each event to every registered sink, in registration order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn on_success(&self, event: &SuccessEvent) {
        for sink in &self.sinks {
            sink.on_success(event);
        }
    }

    fn on_failure(&self, event: &FailureEvent) {
        for sink in &self.sinks {
            sink.on_failure(event);
        }
    }
}
