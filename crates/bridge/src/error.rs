use kennel_runtime::RuntimeError;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The bridge answered with a 4xx. Never retried.
    #[error("bridge rejected {path} ({status}): {body}")]
    Rejected {
        path: String,
        status: u16,
        body: String,
    },

    /// Every HTTP candidate and the exec fallback failed.
    #[error("bridge unreachable for {path}: {last}")]
    Exhausted { path: String, last: String },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("command rejected: {0}")]
    InvalidCommand(String),

    #[error("invalid bridge response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Message(String),
}

impl BridgeError {
    /// The container itself is gone, as opposed to the bridge being down.
    pub fn container_missing(&self) -> bool {
        matches!(self, Self::Runtime(e) if e.is_not_found())
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. } | Self::InvalidCommand(_))
    }
}

impl kennel_common::FromMessage for BridgeError {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Error = BridgeError;
pub type Result<T> = std::result::Result<T, BridgeError>;

kennel_common::impl_context!();
