use hls_stats_engine::HlsStatsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Engine(#[from] HlsStatsError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Influx write failed: {0}")]
    Influx(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
