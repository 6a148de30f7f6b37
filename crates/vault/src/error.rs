//! Vault error types.

/// Errors produced by vault operations.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// No key material configured.
    #[error("vault key is not configured")]
    NotConfigured,

    /// Key material present but unusable.
    #[error("invalid vault key: {0}")]
    InvalidKey(String),

    /// Encryption or decryption failed (tampered data, wrong key, wrong project).
    #[error("cipher error: {0}")]
    CipherError(String),

    /// The blob was produced by a cipher this build does not know.
    #[error("unsupported blob version {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
