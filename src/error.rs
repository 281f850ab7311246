use thiserror::Error;

#[derive(Error, Debug)]
pub enum BeaconError {
    #[error("Missing required configuration: {0}")]
    MissingConfig(&'static str),

    #[error("Invalid value for {key}: {value}")]
    InvalidConfig { key: &'static str, value: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Notification decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Notification connection lost")]
    ListenerDisconnected,

    #[error("Unknown project type: {0}")]
    UnknownProjectType(String),
}

pub type Result<T> = std::result::Result<T, BeaconError>;
