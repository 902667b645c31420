use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotifierError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server responded with {status} for {url}")]
    Status { status: u16, url: String },

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Event stream error: {message}")]
    EventStream { message: String },

    #[error("Notifier is no longer running")]
    Closed,
}

pub type Result<T> = std::result::Result<T, NotifierError>;
