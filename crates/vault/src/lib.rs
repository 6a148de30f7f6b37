//! Encryption service for per-project configuration blobs.
//!
//! Blobs are sealed with XChaCha20-Poly1305 under a single process key that
//! comes from config (raw base64 or Argon2id over a passphrase). The project
//! id is bound as associated data so a blob cannot be replayed onto another
//! project row.

pub mod cipher;
pub mod error;
pub mod kdf;
pub mod vault;

pub use {
    cipher::{Cipher, XChaCha20Poly1305Cipher},
    error::VaultError,
    vault::{ConfigVault, Encryptor},
};
