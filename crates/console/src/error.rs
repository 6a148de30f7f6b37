use kennel_runtime::RuntimeError;

#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// No candidate address accepted the connection.
    #[error("terminal server unreachable: {0}")]
    Unreachable(String),

    #[error("invalid terminal address: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("{0}")]
    Message(String),
}

impl kennel_common::FromMessage for ConsoleError {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Error = ConsoleError;
pub type Result<T> = std::result::Result<T, ConsoleError>;

kennel_common::impl_context!();
