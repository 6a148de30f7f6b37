use kennel_common::FromMessage;

/// Local, I/O-free rejections of a desired document.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("credential for profile '{profile}' is shorter than {min} characters")]
    TokenTooShort { profile: String, min: usize },

    #[error("profile '{profile}' is keyed under a different provider than '{provider}'")]
    ProfileProviderMismatch { profile: String, provider: String },

    #[error("auth order for '{provider}' references missing profile '{profile}'")]
    DanglingOrder { provider: String, profile: String },

    #[error("channel '{channel}' has '{field}' at its root; credentials belong under accounts")]
    FlatChannelCredential { channel: String, field: String },

    #[error("invalid model reference '{0}', expected provider/model")]
    InvalidModel(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Message(String),
}

impl FromMessage for ReconcileError {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Error = ReconcileError;
pub type Result<T> = std::result::Result<T, ReconcileError>;

kennel_common::impl_context!();
