//! The encryption service handed to the project store and orchestrator.

use std::sync::Arc;

use {
    base64::Engine,
    kennel_config::VaultConfig,
    serde::{Serialize, de::DeserializeOwned},
    tracing::debug,
    zeroize::Zeroizing,
};

use crate::{
    cipher::{Cipher, XChaCha20Poly1305Cipher},
    error::VaultError,
    kdf,
};

/// Opaque bytes in, opaque bytes out. `context` is bound as associated data;
/// callers pass the owning project id.
pub trait Encryptor: Send + Sync {
    fn encrypt(&self, plaintext: &[u8], context: &str) -> Result<Vec<u8>, VaultError>;
    fn decrypt(&self, sealed: &[u8], context: &str) -> Result<Vec<u8>, VaultError>;
}

/// Process-wide key plus cipher. Blobs are `[version_tag][cipher payload]`.
pub struct ConfigVault {
    key: Zeroizing<[u8; 32]>,
    cipher: Arc<dyn Cipher>,
}

impl ConfigVault {
    pub fn new(key: Zeroizing<[u8; 32]>) -> Self {
        Self {
            key,
            cipher: Arc::new(XChaCha20Poly1305Cipher),
        }
    }

    /// Build from the `[vault]` config section. A raw key wins over a passphrase.
    pub fn from_config(config: &VaultConfig) -> Result<Self, VaultError> {
        if let Some(ref key) = config.key {
            debug!("vault keyed from raw key");
            return Ok(Self::new(kdf::decode_key(key)?));
        }
        match (&config.passphrase, &config.salt) {
            (Some(pass), Some(salt)) => {
                debug!("vault keyed from passphrase");
                Ok(Self::new(kdf::key_from_passphrase(pass, salt)?))
            },
            (Some(_), None) => Err(VaultError::InvalidKey(
                "passphrase requires a salt".into(),
            )),
            _ => Err(VaultError::NotConfigured),
        }
    }

    /// Serialize `value` to JSON and seal it, returning base64 for a TEXT column.
    pub fn seal_json<T: Serialize>(&self, value: &T, context: &str) -> Result<String, VaultError> {
        let plain = Zeroizing::new(serde_json::to_vec(value)?);
        let sealed = self.encrypt(&plain, context)?;
        Ok(base64::engine::general_purpose::STANDARD.encode(sealed))
    }

    /// Inverse of [`seal_json`](Self::seal_json).
    pub fn open_json<T: DeserializeOwned>(&self, b64: &str, context: &str) -> Result<T, VaultError> {
        let sealed = base64::engine::general_purpose::STANDARD.decode(b64)?;
        let plain = Zeroizing::new(self.decrypt(&sealed, context)?);
        Ok(serde_json::from_slice(&plain)?)
    }
}

impl Encryptor for ConfigVault {
    fn encrypt(&self, plaintext: &[u8], context: &str) -> Result<Vec<u8>, VaultError> {
        let body = self.cipher.seal(&self.key, plaintext, context.as_bytes())?;
        let mut out = Vec::with_capacity(1 + body.len());
        out.push(self.cipher.version_tag());
        out.extend_from_slice(&body);
        Ok(out)
    }

    fn decrypt(&self, sealed: &[u8], context: &str) -> Result<Vec<u8>, VaultError> {
        let Some((&tag, body)) = sealed.split_first() else {
            return Err(VaultError::CipherError("empty blob".into()));
        };
        if tag != self.cipher.version_tag() {
            return Err(VaultError::UnsupportedVersion(tag));
        }
        self.cipher.open(&self.key, body, context.as_bytes())
    }
}

impl std::fmt::Debug for ConfigVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigVault").finish_non_exhaustive()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    fn vault() -> ConfigVault {
        ConfigVault::new(Zeroizing::new([3u8; 32]))
    }

    #[test]
    fn json_blob_is_bound_to_project() {
        let v = vault();
        let doc = json!({ "gateway_token": "t0k", "document": { "auth": {} } });
        let blob = v.seal_json(&doc, "p1").unwrap();

        let back: serde_json::Value = v.open_json(&blob, "p1").unwrap();
        assert_eq!(back, doc);
        assert!(v.open_json::<serde_json::Value>(&blob, "p2").is_err());
    }

    #[test]
    fn unknown_version_is_reported() {
        let v = vault();
        let mut sealed = v.encrypt(b"x", "p").unwrap();
        sealed[0] = 0x7f;
        assert!(matches!(
            v.decrypt(&sealed, "p"),
            Err(VaultError::UnsupportedVersion(0x7f))
        ));
    }

    #[test]
    fn empty_blob_is_an_error() {
        assert!(vault().decrypt(&[], "p").is_err());
    }

    #[test]
    fn from_config_requires_material() {
        assert!(matches!(
            ConfigVault::from_config(&VaultConfig::default()),
            Err(VaultError::NotConfigured)
        ));
        let cfg = VaultConfig {
            passphrase: Some("pw".into()),
            ..Default::default()
        };
        assert!(matches!(
            ConfigVault::from_config(&cfg),
            Err(VaultError::InvalidKey(_))
        ));
    }

    #[test]
    fn from_config_raw_key() {
        let cfg = VaultConfig {
            key: Some(base64::engine::general_purpose::STANDARD.encode([9u8; 32])),
            ..Default::default()
        };
        let v = ConfigVault::from_config(&cfg).unwrap();
        let sealed = v.encrypt(b"hello", "p").unwrap();
        assert_eq!(v.decrypt(&sealed, "p").unwrap(), b"hello");
    }
}
