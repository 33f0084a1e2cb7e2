use thiserror::Error;

#[derive(Debug, Error)]
pub enum GridwatchError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Status store error: {0}")]
    Store(String),

    #[error("Policy evaluation error: {0}")]
    Policy(String),

    #[error("Job query error: {0}")]
    JobQuery(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, GridwatchError>;
