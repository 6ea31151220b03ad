use std::sync::Arc;
use std::time::Duration;

use clap::CommandFactory;
use hls_stats_engine::{
    Downloader, EventSink, HlsStatsError, ProbeConfig, ProxyConfig, SampleSink, Session,
    StatsAggregator, create_client,
};
use tokio::sync::mpsc::unbounded_channel;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use url::Url;

use super::{Outcome, shutdown_signal, supervise};
use crate::cli::{Args, LoadGenArgs};
use crate::config::parse_playlist_url;
use crate::error::{AppError, Result};
use crate::output::{ConsoleMode, ConsoleSink};

/// Delay between viewer starts.
const STAGGER: Duration = Duration::from_millis(100);

/// Pause before a respawned viewer retries a playlist that was unavailable.
const RESPAWN_RETRY: Duration = Duration::from_secs(1);

pub async fn run(args: LoadGenArgs) -> Result<()> {
    run_with(args, shutdown_signal()).await
}

async fn run_with(args: LoadGenArgs, shutdown: impl Future<Output = ()>) -> Result<()> {
    let Some(input) = args.url.as_deref() else {
        print_usage()?;
        return Ok(());
    };
    let playlist = parse_playlist_url(input)?;
    if args.instances == 0 {
        return Err(AppError::InvalidInput(
            "--instances must be at least 1".to_string(),
        ));
    }
    if args.print_interval == 0 {
        return Err(AppError::InvalidInput(
            "--print-interval must be at least 1 second".to_string(),
        ));
    }

    let mut probe = ProbeConfig::default().with_user_agent(&args.useragent);
    if let Some(proxy) = &args.proxy {
        probe = probe.with_proxy(ProxyConfig::from_url(proxy)?);
    }
    let client = create_client(&probe)?;

    println!(
        "Starting {} session(s) with User-Agent {}",
        args.instances, args.useragent
    );
    if args.quiet {
        println!("Will not print successful downloads, only statistics");
    }

    let (samples_tx, samples_rx) = unbounded_channel();
    let console = Arc::new(ConsoleSink::new(ConsoleMode::LoadGen, args.quiet));
    let sink: Arc<dyn EventSink> = Arc::new(SampleSink::new(console, samples_tx));
    let aggregator = tokio::spawn(
        StatsAggregator::new(Duration::from_secs(args.print_interval))
            .run(samples_rx, |summary| println!("{summary}")),
    );

    let downloader = Downloader::new(client, &probe, sink);
    let mut viewers = JoinSet::new();
    for index in 1..=args.instances {
        viewers.spawn(viewer(
            playlist.clone(),
            args.buffer,
            downloader.clone(),
            STAGGER.saturating_mul(u32::try_from(index).unwrap_or(u32::MAX)),
            args.respawn,
        ));
    }
    // Only the viewers keep the sample channel open from here on.
    drop(downloader);

    match supervise(viewers, shutdown).await? {
        Outcome::Interrupted => {
            aggregator.abort();
            println!("Exiting...");
        }
        Outcome::Finished => {
            if let Err(e) = aggregator.await {
                error!(error = %e, "Statistics task panicked");
            }
        }
    }
    Ok(())
}

/// One simulated viewer; with `respawn` a terminated session is replaced by a fresh one.
///
/// Only the first session treats an unreachable playlist as fatal. A respawned session
/// that cannot fetch it keeps retrying until the endpoint comes back.
async fn viewer(
    playlist: Url,
    buffer_offset: usize,
    downloader: Downloader,
    start_delay: Duration,
    respawn: bool,
) -> std::result::Result<(), HlsStatsError> {
    tokio::time::sleep(start_delay).await;
    let mut respawned = false;
    loop {
        let result = Session::new(playlist.clone(), buffer_offset, downloader.clone())
            .run()
            .await;
        let report = match result {
            Ok(report) => report,
            Err(HlsStatsError::StartupUnavailable { reason, .. }) if respawned => {
                warn!(url = %playlist, %reason, "Playlist unavailable, retrying");
                tokio::time::sleep(RESPAWN_RETRY).await;
                continue;
            }
            Err(e) => return Err(e),
        };
        info!(
            url = %playlist,
            reason = %report.reason,
            segments = report.segments_fetched,
            "Viewer stopped"
        );
        if !respawn {
            return Ok(());
        }
        debug!(url = %playlist, "Respawning viewer");
        respawned = true;
        tokio::time::sleep(STAGGER).await;
    }
}

fn print_usage() -> Result<()> {
    let mut command = Args::command();
    if let Some(load_gen) = command.find_subcommand_mut("load-gen") {
        load_gen.print_help()?;
    }
    println!();
    println!("URL must include the protocol and point to a media playlist");
    Ok(())
}
