use chrono::{DateTime, SecondsFormat, Utc};
use hls_stats_engine::{EventSink, FailureEvent, SuccessEvent, format_bytes};

/// Which success line layout to print.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleMode {
    /// `<ms> ms <time> <url>`
    Monitor,
    /// `<ms> ms <size> <time> <url>`
    LoadGen,
}

/// Prints one line per event on stdout. `quiet` only hides successes.
pub struct ConsoleSink {
    mode: ConsoleMode,
    quiet: bool,
}

impl ConsoleSink {
    pub fn new(mode: ConsoleMode, quiet: bool) -> Self {
        Self { mode, quiet }
    }
}

impl EventSink for ConsoleSink {
    fn on_success(&self, event: &SuccessEvent) {
        if !self.quiet {
            println!("{}", format_success(event, self.mode));
        }
    }

    fn on_failure(&self, event: &FailureEvent) {
        println!("{}", format_failure(event));
    }
}

fn rfc3339(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn format_success(event: &SuccessEvent, mode: ConsoleMode) -> String {
    let ms = event.duration.as_millis();
    match mode {
        ConsoleMode::Monitor => {
            format!("{:<4} ms {} {}", ms, rfc3339(&event.timestamp), event.url)
        }
        ConsoleMode::LoadGen => format!(
            "{:<4} ms {} {} {}",
            ms,
            format_bytes(event.bytes),
            rfc3339(&event.timestamp),
            event.url
        ),
    }
}

pub fn format_failure(event: &FailureEvent) -> String {
    format!(
        "{{correlation_id: {}, time: {}, url: {}, host: {}, file: {}, http_status: {}, message: {:?}}}",
        event.correlation_id,
        rfc3339(&event.timestamp),
        event.url,
        event.host,
        event.file,
        event.http_status,
        event.message
    )
}
