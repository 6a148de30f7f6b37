//! Key material resolution: raw base64 key or Argon2id over a passphrase.

use {argon2::Argon2, base64::Engine, zeroize::Zeroizing};

use crate::error::VaultError;

/// Argon2id cost parameters. 64 MiB, 3 passes, single lane.
const M_COST: u32 = 65536;
const T_COST: u32 = 3;
const P_COST: u32 = 1;

/// Derive a 256-bit key from `passphrase` and a base64 `salt` using Argon2id.
pub fn key_from_passphrase(
    passphrase: &str,
    salt_b64: &str,
) -> Result<Zeroizing<[u8; 32]>, VaultError> {
    let salt = base64::engine::general_purpose::STANDARD.decode(salt_b64)?;
    if salt.len() < 8 {
        return Err(VaultError::InvalidKey("salt must be at least 8 bytes".into()));
    }
    derive(passphrase.as_bytes(), &salt, M_COST)
}

fn derive(password: &[u8], salt: &[u8], m_cost: u32) -> Result<Zeroizing<[u8; 32]>, VaultError> {
    let params = argon2::Params::new(m_cost, T_COST, P_COST, Some(32))
        .map_err(|e| VaultError::InvalidKey(format!("invalid KDF params: {e}")))?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let mut output = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(password, salt, output.as_mut())
        .map_err(|e| VaultError::InvalidKey(format!("KDF failed: {e}")))?;
    Ok(output)
}

/// Decode a raw base64 key. Must be exactly 32 bytes.
pub fn decode_key(b64: &str) -> Result<Zeroizing<[u8; 32]>, VaultError> {
    let bytes = Zeroizing::new(base64::engine::general_purpose::STANDARD.decode(b64.trim())?);
    let key: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| VaultError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len())))?;
    Ok(Zeroizing::new(key))
}
