use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("tipset not in cache: {0}")]
    NotInCache(String),
    #[error("invalid tipset: {0}")]
    InvalidTipSet(String),
    #[error("chain read failed: {0}")]
    ChainRead(String),
    #[error("head change rejected: {0}")]
    HeadChange(String),
    #[error("event subscription error: {0}")]
    Subscription(String),
    #[error("invalid submission: {0}")]
    InvalidCaller(String),
    #[error("gas estimation failed: {0}")]
    GasEstimation(String),
    #[error("wallet error: {0}")]
    Wallet(String),
    #[error("message pool error: {0}")]
    Pool(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("json encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("operation cancelled")]
    Cancelled,
}

pub type ChainResult<T> = Result<T, ChainError>;
