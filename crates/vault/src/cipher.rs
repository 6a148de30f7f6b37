//! AEAD cipher backends.

#[allow(deprecated)] // upstream generic-array 0.x deprecation
use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use rand::RngCore;

use crate::error::VaultError;

/// Authenticated encryption with associated data.
///
/// The blob layout is cipher-specific; the vault prefixes it with
/// [`version_tag`](Self::version_tag) so old blobs stay readable after a swap.
pub trait Cipher: Send + Sync {
    fn version_tag(&self) -> u8;

    fn seal(&self, key: &[u8; 32], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, VaultError>;

    fn open(&self, key: &[u8; 32], sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>, VaultError>;
}

const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;

/// XChaCha20-Poly1305. Layout: `[nonce: 24][ciphertext || tag: N + 16]`.
pub struct XChaCha20Poly1305Cipher;

impl Cipher for XChaCha20Poly1305Cipher {
    fn version_tag(&self) -> u8 {
        0x01
    }

    #[allow(deprecated)]
    fn seal(&self, key: &[u8; 32], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, VaultError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);

        let ciphertext = XChaCha20Poly1305::new(key.into())
            .encrypt(XNonce::from_slice(&nonce_bytes), Payload {
                msg: plaintext,
                aad,
            })
            .map_err(|e| VaultError::CipherError(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    #[allow(deprecated)]
    fn open(&self, key: &[u8; 32], sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>, VaultError> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(VaultError::CipherError("ciphertext too short".to_string()));
        }
        let (nonce, ct) = sealed.split_at(NONCE_LEN);
        XChaCha20Poly1305::new(key.into())
            .decrypt(XNonce::from_slice(nonce), Payload { msg: ct, aad })
            .map_err(|e| VaultError::CipherError(e.to_string()))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [0x5a; 32];

    #[test]
    fn seal_then_open_with_aad() {
        let c = XChaCha20Poly1305Cipher;
        let sealed = c.seal(&KEY, b"{\"auth\":{}}", b"project:p1").unwrap();
        assert_eq!(c.open(&KEY, &sealed, b"project:p1").unwrap(), b"{\"auth\":{}}");
    }

    #[test]
    fn other_project_aad_is_rejected() {
        let c = XChaCha20Poly1305Cipher;
        let sealed = c.seal(&KEY, b"secret", b"project:p1").unwrap();
        assert!(c.open(&KEY, &sealed, b"project:p2").is_err());
    }

    #[test]
    fn tampering_is_detected() {
        let c = XChaCha20Poly1305Cipher;
        let mut sealed = c.seal(&KEY, b"secret", b"").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(c.open(&KEY, &sealed, b"").is_err());
    }

    #[test]
    fn short_input_is_rejected() {
        let c = XChaCha20Poly1305Cipher;
        assert!(c.open(&KEY, &[0u8; 30], b"").is_err());
    }

    #[test]
    fn nonces_differ_between_seals() {
        let c = XChaCha20Poly1305Cipher;
        assert_ne!(
            c.seal(&KEY, b"same", b"").unwrap(),
            c.seal(&KEY, b"same", b"").unwrap()
        );
    }
}
