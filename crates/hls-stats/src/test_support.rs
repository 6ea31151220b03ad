//! Fixtures shared by the unit tests: a recording sink, a pacer that never sleeps and a
//! scripted live channel served by axum on a loopback port.

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use flate2::Compression;
use flate2::write::GzEncoder;
use parking_lot::Mutex;
use reqwest::Client;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use url::Url;

use crate::config::{ProbeConfig, create_client};
use crate::events::{DownloadEvent, EventSink, FailureEvent, SuccessEvent};
use crate::session::Pacer;

/// Size of every segment served by [`LiveChannel`].
pub const SEGMENT_BYTES: usize = 1_024;

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<DownloadEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<DownloadEvent> {
        self.events.lock().clone()
    }

    pub fn successes(&self) -> Vec<SuccessEvent> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                DownloadEvent::Success(event) => Some(event.clone()),
                DownloadEvent::Failure(_) => None,
            })
            .collect()
    }

    pub fn failures(&self) -> Vec<FailureEvent> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                DownloadEvent::Failure(event) => Some(event.clone()),
                DownloadEvent::Success(_) => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn on_success(&self, event: &SuccessEvent) {
        self.events.lock().push(DownloadEvent::Success(event.clone()));
    }

    fn on_failure(&self, event: &FailureEvent) {
        self.events.lock().push(DownloadEvent::Failure(event.clone()));
    }
}

/// Records requested waits and returns immediately.
#[derive(Default)]
pub struct CountingPacer {
    waits: Mutex<Vec<Duration>>,
}

impl CountingPacer {
    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().clone()
    }
}

#[async_trait]
impl Pacer for CountingPacer {
    async fn wait(&self, interval: Duration) {
        self.waits.lock().push(interval);
        tokio::task::yield_now().await;
    }
}

/// Scripted answer to one playlist request.
#[derive(Debug, Clone)]
pub enum Reply {
    Status(u16),
    Body(String),
    Playlist { first: u64, count: u64, target: u64 },
}

#[derive(Default)]
struct ChannelState {
    replies: VecDeque<Reply>,
    failing_segments: HashMap<String, usize>,
    segment_requests: Vec<String>,
    playlist_requests: usize,
}

/// A live channel whose playlist answers follow a script; once the script is
/// exhausted the playlist returns 404. Segments are served with [`SEGMENT_BYTES`] bytes.
#[derive(Clone, Default)]
pub struct LiveChannel {
    state: Arc<Mutex<ChannelState>>,
}

impl LiveChannel {
    pub fn new(replies: Vec<Reply>) -> Self {
        let channel = Self::default();
        channel.state.lock().replies = replies.into();
        channel
    }

    /// Makes the next `times` requests for `seg{sequence_id}.ts` answer 404.
    pub fn fail_segment(self, sequence_id: u64, times: usize) -> Self {
        self.state
            .lock()
            .failing_segments
            .insert(format!("seg{sequence_id}.ts"), times);
        self
    }

    pub fn segment_requests(&self) -> Vec<String> {
        self.state.lock().segment_requests.clone()
    }

    pub fn playlist_requests(&self) -> usize {
        self.state.lock().playlist_requests
    }
}

async fn playlist(State(channel): State<LiveChannel>) -> Response {
    let reply = {
        let mut state = channel.state.lock();
        state.playlist_requests += 1;
        state.replies.pop_front()
    };
    match reply {
        Some(Reply::Status(code)) => StatusCode::from_u16(code)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
        Some(Reply::Body(body)) => body.into_response(),
        Some(Reply::Playlist {
            first,
            count,
            target,
        }) => media_playlist(first, count, target).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn segment(State(channel): State<LiveChannel>, Path(file): Path<String>) -> Response {
    let mut state = channel.state.lock();
    state.segment_requests.push(file.clone());
    if let Some(remaining) = state.failing_segments.get_mut(&file) {
        if *remaining > 0 {
            *remaining -= 1;
            return StatusCode::NOT_FOUND.into_response();
        }
    }
    vec![0x47u8; SEGMENT_BYTES].into_response()
}

fn channel_router(channel: LiveChannel) -> Router {
    Router::new()
        .route("/live/index.m3u8", get(playlist))
        .route("/live/{file}", get(segment))
        .with_state(channel)
}

pub async fn spawn_channel(channel: LiveChannel) -> SocketAddr {
    serve(channel_router(channel)).await
}

/// Like [`spawn_channel`]; aborting the returned task closes the listening socket.
pub async fn spawn_channel_with_handle(channel: LiveChannel) -> (SocketAddr, JoinHandle<()>) {
    serve_with_handle(channel_router(channel)).await
}

pub async fn serve(app: Router) -> SocketAddr {
    serve_with_handle(app).await.0
}

async fn serve_with_handle(app: Router) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, server)
}

/// A loopback address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

pub fn playlist_url(addr: SocketAddr) -> Url {
    Url::parse(&format!("http://{addr}/live/index.m3u8")).unwrap()
}

pub fn client() -> Client {
    create_client(&ProbeConfig::default()).unwrap()
}

/// A live media playlist with `count` segments `seg{n}.ts` starting at sequence `first`.
pub fn media_playlist(first: u64, count: u64, target: u64) -> String {
    let mut playlist = format!(
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:{target}\n#EXT-X-MEDIA-SEQUENCE:{first}\n"
    );
    for id in (0..count).map(|offset| first + offset) {
        playlist.push_str(&format!("#EXTINF:{target}.000,\nseg{id}.ts\n"));
    }
    playlist
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}
