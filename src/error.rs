use thiserror::Error;

/// Application error types.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Malformed option symbol: {0}")]
    Parse(String),

    #[error("Data gap: {0}")]
    DataGap(String),

    #[error("Numerical failure: {0}")]
    Numerical(String),

    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    #[error("External API error: {0}")]
    Api(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    #[error(transparent)]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    #[error(transparent)]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
