//! The project's durable configuration: everything needed to rebuild its
//! container from scratch, sealed into the project row.

use {
    base64::Engine,
    kennel_agent_config::ConfigDocument,
    kennel_vault::ConfigVault,
    rand::Rng,
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

use crate::error::{Error, Result};

#[derive(Clone)]
pub struct DurableConfig {
    /// Token for the agent's gateway; the bridge accepts it as bearer.
    pub gateway_token: Secret<String>,
    pub document: ConfigDocument,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Sealed {
    gateway_token: String,
    document: ConfigDocument,
}

impl DurableConfig {
    /// Fresh configuration with a newly generated gateway token.
    pub fn new(document: ConfigDocument) -> Self {
        let bytes: [u8; 32] = rand::rng().random();
        Self {
            gateway_token: Secret::new(
                base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes),
            ),
            document,
        }
    }

    pub fn seal(&self, vault: &ConfigVault, project_id: &str) -> Result<String> {
        let sealed = Sealed {
            gateway_token: self.gateway_token.expose_secret().clone(),
            document: self.document.clone(),
        };
        Ok(vault.seal_json(&sealed, project_id)?)
    }

    pub fn open(vault: &ConfigVault, blob: &str, project_id: &str) -> Result<Self> {
        let sealed: Sealed = vault.open_json(blob, project_id)?;
        Ok(Self {
            gateway_token: Secret::new(sealed.gateway_token),
            document: sealed.document,
        })
    }

    /// Open the blob stored on a project row.
    pub fn from_blob(vault: &ConfigVault, blob: Option<&str>, project_id: &str) -> Result<Self> {
        let blob = blob.ok_or_else(|| {
            Error::internal(format!("project {project_id} has no stored configuration"))
        })?;
        Self::open(vault, blob, project_id)
    }

    pub fn with_document(&self, document: ConfigDocument) -> Self {
        Self {
            gateway_token: self.gateway_token.clone(),
            document,
        }
    }
}

impl std::fmt::Debug for DurableConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableConfig")
            .field("document", &self.document.masked())
            .finish_non_exhaustive()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, kennel_agent_config::Provider, zeroize::Zeroizing};

    fn vault() -> ConfigVault {
        ConfigVault::new(Zeroizing::new([7u8; 32]))
    }

    #[test]
    fn seal_round_trip_bound_to_project() {
        let mut doc = ConfigDocument::default();
        doc.set_api_key(Provider::OpenAi, "sk-proj-0123456789abcdefghij");
        let durable = DurableConfig::new(doc);
        let blob = durable.seal(&vault(), "p1").unwrap();
        assert!(!blob.contains("sk-proj"));

        let opened = DurableConfig::open(&vault(), &blob, "p1").unwrap();
        assert_eq!(
            opened.gateway_token.expose_secret(),
            durable.gateway_token.expose_secret()
        );
        assert_eq!(opened.document, durable.document);

        assert!(DurableConfig::open(&vault(), &blob, "p2").is_err());
    }

    #[test]
    fn tokens_are_unique_and_debug_is_masked() {
        let a = DurableConfig::new(ConfigDocument::default());
        let b = DurableConfig::new(ConfigDocument::default());
        assert_ne!(a.gateway_token.expose_secret(), b.gateway_token.expose_secret());
        assert!(!format!("{a:?}").contains(a.gateway_token.expose_secret().as_str()));
    }
}
