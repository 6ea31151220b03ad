// Instrumented HTTP GET: one request, one event.

use std::io::Read;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chrono::Utc;
use flate2::read::GzDecoder;
use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode};
use tracing::{debug, trace};
use url::Url;
use uuid::Uuid;

use crate::config::{CORRELATION_HEADER, ProbeConfig};
use crate::events::{EventSink, FailureEvent, SuccessEvent};
use crate::resolver::split_url;

/// Body of a successful exchange together with the event already sent to the sink.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub event: SuccessEvent,
    /// Decoded body
    pub body: Bytes,
}

/// Performs instrumented GETs and reports every outcome to the sink.
///
/// Cheap to clone: the reqwest client is reference counted and meant to be shared by
/// every session.
#[derive(Clone)]
pub struct Downloader {
    client: Client,
    user_agent: Arc<str>,
    accept_gzip: bool,
    sink: Arc<dyn EventSink>,
}

impl Downloader {
    pub fn new(client: Client, config: &ProbeConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            client,
            user_agent: Arc::from(config.user_agent.as_str()),
            accept_gzip: config.accept_gzip,
            sink,
        }
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    /// GETs `url` and emits exactly one event describing the outcome.
    ///
    /// The measured duration runs from sending the request until the body has been
    /// fully received and decoded; the header wait is reported separately as
    /// `time_to_headers`.
    pub async fn get(&self, url: &Url) -> Result<Fetched, FailureEvent> {
        let correlation_id = Uuid::new_v4();
        let mut request = self
            .client
            .get(url.clone())
            .header(USER_AGENT, &*self.user_agent)
            .header(CORRELATION_HEADER, correlation_id.to_string());
        if self.accept_gzip {
            request = request.header(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        }

        trace!(url = %url, %correlation_id, "Sending request");
        let started = Instant::now();
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                return Err(self.fail(
                    url,
                    correlation_id,
                    0,
                    format!("No connection made: {e}"),
                ));
            }
        };
        let time_to_headers = started.elapsed();

        let status = response.status();
        if status != StatusCode::OK {
            return Err(self.fail(
                url,
                correlation_id,
                status.as_u16(),
                format!("Connection made with HTTP error {}", status.as_u16()),
            ));
        }

        let gzipped = response
            .headers()
            .get(CONTENT_ENCODING)
            .is_some_and(|value| value.as_bytes().eq_ignore_ascii_case(b"gzip"));

        let raw = match response.bytes().await {
            Ok(raw) => raw,
            Err(e) => {
                return Err(self.fail(
                    url,
                    correlation_id,
                    0,
                    format!("Connection lost while reading body: {e}"),
                ));
            }
        };
        let wire_bytes = raw.len();

        let body = if gzipped {
            match decode_gzip(&raw) {
                Ok(decoded) => Bytes::from(decoded),
                Err(e) => {
                    return Err(self.fail(
                        url,
                        correlation_id,
                        0,
                        format!("Could not decode gzip body: {e}"),
                    ));
                }
            }
        } else {
            raw
        };
        let duration = started.elapsed();

        let (host, file) = split_url(url);
        let event = SuccessEvent {
            correlation_id,
            timestamp: Utc::now(),
            url: url.to_string(),
            host,
            file,
            bytes: body.len() as u64,
            duration,
            time_to_headers,
        };
        debug!(
            url = %url,
            %correlation_id,
            bytes = event.bytes,
            wire_bytes,
            latency_ms = duration.as_millis() as u64,
            "Download complete"
        );
        self.sink.on_success(&event);

        Ok(Fetched { event, body })
    }

    fn fail(
        &self,
        url: &Url,
        correlation_id: Uuid,
        http_status: u16,
        message: String,
    ) -> FailureEvent {
        let (host, file) = split_url(url);
        let event = FailureEvent {
            correlation_id,
            timestamp: Utc::now(),
            url: url.to_string(),
            host,
            file,
            http_status,
            message,
        };
        debug!(url = %url, %correlation_id, http_status, message = %event.message, "Download failed");
        self.sink.on_failure(&event);
        event
    }
}

fn decode_gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::DownloadEvent;
    use crate::test_support::{self, RecordingSink};
    use axum::Router;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode as AxumStatus, header};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use parking_lot::Mutex;
    use std::net::SocketAddr;

    #[derive(Clone, Default)]
    struct Seen {
        headers: Arc<Mutex<Vec<HeaderMap>>>,
    }

    async fn plain(State(seen): State<Seen>, headers: HeaderMap) -> impl IntoResponse {
        seen.headers.lock().push(headers);
        vec![7u8; 5_000]
    }

    async fn compressed(State(seen): State<Seen>, headers: HeaderMap) -> impl IntoResponse {
        seen.headers.lock().push(headers);
        (
            [(header::CONTENT_ENCODING, "gzip")],
            test_support::gzip(&vec![b'a'; 12_000]),
        )
    }

    async fn corrupt() -> impl IntoResponse {
        ([(header::CONTENT_ENCODING, "gzip")], b"definitely not gzip".to_vec())
    }

    async fn missing() -> impl IntoResponse {
        AxumStatus::NOT_FOUND
    }

    async fn server() -> (SocketAddr, Seen) {
        let seen = Seen::default();
        let app = Router::new()
            .route("/plain.ts", get(plain))
            .route("/gzip.ts", get(compressed))
            .route("/corrupt.ts", get(corrupt))
            .route("/missing.ts", get(missing))
            .with_state(seen.clone());
        (test_support::serve(app).await, seen)
    }

    fn downloader(config: &ProbeConfig, sink: Arc<RecordingSink>) -> Downloader {
        Downloader::new(test_support::client(), config, sink)
    }

    fn url(addr: SocketAddr, path: &str) -> Url {
        Url::parse(&format!("http://{addr}{path}")).unwrap()
    }

    #[tokio::test]
    async fn success_reports_size_and_sends_headers() {
        let (addr, seen) = server().await;
        let sink = Arc::new(RecordingSink::default());
        let config = ProbeConfig::default().with_user_agent("probe-test/1.0");

        let fetched = downloader(&config, sink.clone())
            .get(&url(addr, "/plain.ts"))
            .await
            .unwrap();

        assert_eq!(fetched.event.bytes, 5_000);
        assert_eq!(fetched.body.len(), 5_000);
        assert_eq!(fetched.event.file, "plain.ts");
        assert_eq!(fetched.event.host, addr.to_string());
        assert!(fetched.event.duration >= fetched.event.time_to_headers);
        assert_eq!(sink.events(), vec![DownloadEvent::Success(fetched.event.clone())]);

        let headers = seen.headers.lock();
        let sent = &headers[0];
        assert_eq!(sent.get(header::USER_AGENT).unwrap(), "probe-test/1.0");
        assert_eq!(sent.get(header::ACCEPT_ENCODING).unwrap(), "gzip");
        let correlation: Uuid = sent
            .get(CORRELATION_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(correlation, fetched.event.correlation_id);
        assert_eq!(correlation.get_version_num(), 4);
    }

    #[tokio::test]
    async fn gzip_body_is_counted_decoded() {
        let (addr, _) = server().await;
        let sink = Arc::new(RecordingSink::default());

        let fetched = downloader(&ProbeConfig::default(), sink.clone())
            .get(&url(addr, "/gzip.ts"))
            .await
            .unwrap();

        assert_eq!(fetched.event.bytes, 12_000);
        assert!(fetched.body.iter().all(|b| *b == b'a'));
        assert_eq!(sink.successes().len(), 1);
    }

    #[tokio::test]
    async fn gzip_not_advertised_when_disabled() {
        let (addr, seen) = server().await;
        let sink = Arc::new(RecordingSink::default());
        let config = ProbeConfig {
            accept_gzip: false,
            ..ProbeConfig::default()
        };

        downloader(&config, sink)
            .get(&url(addr, "/plain.ts"))
            .await
            .unwrap();

        assert!(seen.headers.lock()[0].get(header::ACCEPT_ENCODING).is_none());
    }

    #[tokio::test]
    async fn non_200_is_a_failure_with_status() {
        let (addr, _) = server().await;
        let sink = Arc::new(RecordingSink::default());

        let failure = downloader(&ProbeConfig::default(), sink.clone())
            .get(&url(addr, "/missing.ts"))
            .await
            .unwrap_err();

        assert_eq!(failure.http_status, 404);
        assert_eq!(failure.message, "Connection made with HTTP error 404");
        assert_eq!(sink.events(), vec![DownloadEvent::Failure(failure)]);
    }

    #[tokio::test]
    async fn refused_connection_is_network_level() {
        let addr = test_support::closed_port().await;
        let sink = Arc::new(RecordingSink::default());

        let failure = downloader(&ProbeConfig::default(), sink.clone())
            .get(&url(addr, "/seg1.ts"))
            .await
            .unwrap_err();

        assert!(failure.is_network_level());
        assert!(failure.message.starts_with("No connection made"));
        assert_eq!(sink.events().len(), 1);
    }

    #[tokio::test]
    async fn corrupt_gzip_is_a_single_failure() {
        let (addr, _) = server().await;
        let sink = Arc::new(RecordingSink::default());

        let failure = downloader(&ProbeConfig::default(), sink.clone())
            .get(&url(addr, "/corrupt.ts"))
            .await
            .unwrap_err();

        assert_eq!(failure.http_status, 0);
        assert_eq!(sink.events().len(), 1);
        assert!(sink.successes().is_empty());
    }

    #[tokio::test]
    async fn every_attempt_gets_a_fresh_correlation_id() {
        let (addr, _) = server().await;
        let sink = Arc::new(RecordingSink::default());
        let downloader = downloader(&ProbeConfig::default(), sink.clone());

        let _ = downloader.get(&url(addr, "/missing.ts")).await;
        let _ = downloader.get(&url(addr, "/missing.ts")).await;
        let _ = downloader.get(&url(addr, "/plain.ts")).await;

        let ids: Vec<Uuid> = sink.events().iter().map(DownloadEvent::correlation_id).collect();
        assert_eq!(ids.len(), 3);
        assert_ne!(ids[0], ids[1]);
        assert_ne!(ids[1], ids[2]);
        assert_ne!(ids[0], ids[2]);
    }
}
