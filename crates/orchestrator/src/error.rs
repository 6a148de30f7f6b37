//! Errors surfaced to callers of the project service.
//!
//! Every message is scrubbed of credential-like substrings when the error
//! is built, so nothing downstream has to remember to do it.

use {
    kennel_agent_config::ReconcileError,
    kennel_bridge::BridgeError,
    kennel_common::scrub_secrets,
    kennel_projects::StoreError,
    kennel_runtime::RuntimeError,
    kennel_vault::VaultError,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Rejected before any I/O (bad plan, provider, token, command).
    #[error("{0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The project is mid-transition.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Retried and escalated without success; trying again later may work.
    #[error("temporarily unavailable: {0}")]
    Transient(String),

    /// The container engine could not be reached.
    #[error("container engine unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn validation(msg: impl AsRef<str>) -> Self {
        Self::Validation(scrub_secrets(msg.as_ref()))
    }

    pub fn internal(msg: impl AsRef<str>) -> Self {
        Self::Internal(scrub_secrets(msg.as_ref()))
    }

    pub fn transient(msg: impl AsRef<str>) -> Self {
        Self::Transient(scrub_secrets(msg.as_ref()))
    }
}

impl From<RuntimeError> for Error {
    fn from(e: RuntimeError) -> Self {
        let msg = scrub_secrets(&e.to_string());
        match e {
            RuntimeError::NotFound(_) => Self::NotFound(msg),
            RuntimeError::Unavailable(_) => Self::Unavailable(msg),
            RuntimeError::Timeout(_) => Self::Transient(msg),
            RuntimeError::Engine(_) | RuntimeError::Io(_) => Self::Internal(msg),
        }
    }
}

impl From<BridgeError> for Error {
    fn from(e: BridgeError) -> Self {
        match e {
            BridgeError::Runtime(inner) => inner.into(),
            BridgeError::Rejected { .. } | BridgeError::InvalidCommand(_) => {
                Self::validation(e.to_string())
            },
            BridgeError::Exhausted { .. } => Self::transient(e.to_string()),
            BridgeError::InvalidResponse(_) | BridgeError::Json(_) | BridgeError::Message(_) => {
                Self::internal(e.to_string())
            },
        }
    }
}

impl From<ReconcileError> for Error {
    fn from(e: ReconcileError) -> Self {
        match e {
            ReconcileError::Json(_) | ReconcileError::Message(_) => Self::internal(e.to_string()),
            _ => Self::validation(e.to_string()),
        }
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => Self::NotFound(format!("project {id}")),
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<VaultError> for Error {
    fn from(e: VaultError) -> Self {
        Self::internal(format!("config blob: {e}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::internal(e.to_string())
    }
}

impl kennel_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::internal(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

kennel_common::impl_context!();

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_rejection_is_validation_and_scrubbed() {
        let err: Error = BridgeError::Rejected {
            path: "/config/update".into(),
            status: 400,
            body: "invalid".into(),
        }
        .into();
        assert!(matches!(err, Error::Validation(_)));

        let err = Error::validation("bad key sk-ant-abcdef0123456789");
        assert_eq!(err.to_string(), "bad key sk-ant-[REDACTED]");
    }

    #[test]
    fn runtime_errors_map_by_kind() {
        assert!(matches!(
            Error::from(RuntimeError::NotFound("c1".into())),
            Error::NotFound(_)
        ));
        assert!(matches!(
            Error::from(RuntimeError::Unavailable("no socket".into())),
            Error::Unavailable(_)
        ));
        assert!(matches!(
            Error::from(BridgeError::Runtime(RuntimeError::Engine("x".into()))),
            Error::Internal(_)
        ));
    }
}
