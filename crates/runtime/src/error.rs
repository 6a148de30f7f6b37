use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The engine does not know this container (removed or never created).
    #[error("container not found: {0}")]
    NotFound(String),

    /// The engine could not be reached when the driver was built.
    #[error("container engine unavailable: {0}")]
    Unavailable(String),

    #[error("exec timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("container engine error: {0}")]
    Engine(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
