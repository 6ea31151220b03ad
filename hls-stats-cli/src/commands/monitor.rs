use std::sync::Arc;

use hls_stats_engine::{
    Downloader, FanoutSink, HlsStatsError, ProbeConfig, Session, create_client,
};
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use super::{Outcome, shutdown_signal, supervise};
use crate::cli::MonitorArgs;
use crate::config::MonitorConfig;
use crate::error::Result;
use crate::influx::{FLUSH_INTERVAL, InfluxSink};
use crate::output::{ConsoleMode, ConsoleSink};

pub async fn run(args: MonitorArgs) -> Result<()> {
    let config = MonitorConfig::load(&args.config)?;
    run_with(&config, &args, shutdown_signal()).await
}

async fn run_with(
    config: &MonitorConfig,
    args: &MonitorArgs,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let playlists = config.playlist_urls()?;
    let probe = config.probe_config()?;
    let client = create_client(&probe)?;

    let session_id = Uuid::new_v4();
    println!("Starting session with ID: {session_id}");

    let mut sink = FanoutSink::new().with(Arc::new(ConsoleSink::new(
        ConsoleMode::Monitor,
        args.quiet,
    )));
    let influx = if args.influx {
        // Points go straight to the database, never through the probe proxy.
        let influx_client = create_client(&ProbeConfig::default())?;
        let influx = Arc::new(InfluxSink::new(&config.influx()?, influx_client, session_id)?);
        sink = sink.with(influx.clone());
        Some(influx)
    } else {
        None
    };
    let flusher = influx.as_ref().map(|influx| influx.spawn_flusher(FLUSH_INTERVAL));

    let downloader = Downloader::new(client, &probe, Arc::new(sink));
    let mut viewers = JoinSet::new();
    for playlist in playlists {
        let session = Session::new(playlist, config.buffer_segments, downloader.clone());
        viewers.spawn(async move {
            let url = session.playlist_url().clone();
            let report = session.run().await?;
            info!(
                url = %url,
                reason = %report.reason,
                segments = report.segments_fetched,
                "Viewer stopped"
            );
            Ok::<(), HlsStatsError>(())
        });
    }

    let outcome = supervise(viewers, shutdown).await;
    if matches!(outcome, Ok(Outcome::Interrupted)) {
        println!("Exiting...");
    }

    if let Some(flusher) = flusher {
        flusher.abort();
    }
    if let Some(influx) = &influx {
        match influx.flush().await {
            Ok(points) => info!(points, "Final influx flush"),
            Err(e) => warn!(error = %e, "Final influx flush failed"),
        }
    }

    outcome.map(|_| ())
}
