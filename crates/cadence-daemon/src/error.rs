use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("webhook delivery failed: {0}")]
    Webhook(#[from] reqwest::Error),

    #[error("webhook rejected with status {0}")]
    WebhookStatus(u16),

    #[error("cannot sign webhook body: {0}")]
    Signing(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("task misconfigured: {0}")]
    TaskConfig(String),
}

pub type Result<T> = std::result::Result<T, DaemonError>;
