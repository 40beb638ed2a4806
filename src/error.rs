//! Error type shared by the coordinator, the series checker and the tracker.

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("fetch of {url} timed out after {after_ms} ms")]
    Timeout { url: String, after_ms: u32 },

    #[error("malformed {kind} message: {reason}")]
    Malformed { kind: String, reason: String },

    #[error("Unknown message type")]
    UnknownMessage(String),

    #[error("coordinator is no longer running")]
    CoordinatorGone,

    #[error("series check already in progress")]
    CheckInProgress,

    #[error("browser api error: {0}")]
    Browser(String),
}

impl From<serde_json::Error> for TrackerError {
    fn from(e: serde_json::Error) -> Self {
        TrackerError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;
