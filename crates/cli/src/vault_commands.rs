//! Vault key material: generation and the local key-file fallback.

use std::path::{Path, PathBuf};

use {
    anyhow::{Context, Result},
    base64::Engine,
    clap::Subcommand,
    kennel_config::VaultConfig,
    kennel_vault::{ConfigVault, VaultError, kdf},
    rand::Rng,
    tracing::{info, warn},
    zeroize::Zeroizing,
};

const KEY_FILE: &str = "vault.key";

#[derive(Subcommand)]
pub enum VaultAction {
    /// Print a fresh base64 key suitable for `[vault] key`.
    GenerateKey,
}

pub fn handle_vault(action: VaultAction) -> Result<()> {
    match action {
        VaultAction::GenerateKey => {
            println!("{}", *encode(&generate()));
            Ok(())
        },
    }
}

fn generate() -> Zeroizing<[u8; 32]> {
    Zeroizing::new(rand::rng().random())
}

fn encode(key: &[u8; 32]) -> Zeroizing<String> {
    Zeroizing::new(base64::engine::general_purpose::STANDARD.encode(key))
}

pub fn key_file(data_dir: &Path) -> PathBuf {
    data_dir.join(KEY_FILE)
}

/// Build the vault from config, or from `vault.key` in the data dir when no
/// key material is configured. The file is created on first use.
pub fn open_vault(config: &VaultConfig, data_dir: &Path) -> Result<ConfigVault> {
    match ConfigVault::from_config(config) {
        Ok(vault) => Ok(vault),
        Err(VaultError::NotConfigured) => {
            let path = key_file(data_dir);
            warn!(path = %path.display(), "no vault key configured, using local key file");
            Ok(ConfigVault::new(load_or_create_key(&path)?))
        },
        Err(e) => Err(e).context("invalid [vault] configuration"),
    }
}

fn load_or_create_key(path: &Path) -> Result<Zeroizing<[u8; 32]>> {
    if path.exists() {
        let raw = Zeroizing::new(
            std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?,
        );
        return kdf::decode_key(&raw).with_context(|| format!("bad key in {}", path.display()));
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let key = generate();
    std::fs::write(path, encode(&key).as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    info!(path = %path.display(), "generated vault key");
    Ok(key)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_file_is_created_once_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = key_file(dir.path());

        let first = load_or_create_key(&path).unwrap();
        let second = load_or_create_key(&path).unwrap();
        assert_eq!(*first, *second);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn configured_key_wins_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = VaultConfig {
            key: Some(encode(&[7u8; 32]).to_string()),
            ..Default::default()
        };
        open_vault(&config, dir.path()).unwrap();
        assert!(!key_file(dir.path()).exists());
    }

    #[test]
    fn broken_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = VaultConfig {
            key: Some("not-base64!".into()),
            ..Default::default()
        };
        assert!(open_vault(&config, dir.path()).is_err());
    }
}
