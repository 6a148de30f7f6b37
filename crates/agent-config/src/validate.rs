//! Fast local pre-checks run before any container I/O.

use crate::{
    document::ConfigDocument,
    error::{ReconcileError, Result},
    provider::Provider,
};

/// Shortest credential accepted for a provider profile.
pub const MIN_TOKEN_LEN: usize = 20;

/// Root-level channel fields the agent silently ignores. Credentials there
/// never reach the running channel, so they are rejected outright.
const FLAT_CREDENTIAL_FIELDS: &[&str] = &["botToken", "appToken", "token", "tokenFile"];

pub fn validate(doc: &ConfigDocument) -> Result<()> {
    if let Some(ref auth) = doc.auth {
        for (name, profile) in &auth.profiles {
            let provider: Provider = profile.provider.parse()?;
            if let Some((prefix, _)) = name.split_once(':')
                && !prefix.eq_ignore_ascii_case(provider.as_str())
            {
                return Err(ReconcileError::ProfileProviderMismatch {
                    profile: name.clone(),
                    provider: profile.provider.clone(),
                });
            }
            if let Some(ref key) = profile.key
                && !key.is_empty()
                && key.trim().len() < MIN_TOKEN_LEN
            {
                return Err(ReconcileError::TokenTooShort {
                    profile: name.clone(),
                    min: MIN_TOKEN_LEN,
                });
            }
        }
        for (provider, keys) in &auth.order {
            provider.parse::<Provider>()?;
            if let Some(missing) = keys.iter().find(|k| !auth.profiles.contains_key(*k)) {
                return Err(ReconcileError::DanglingOrder {
                    provider: provider.clone(),
                    profile: missing.clone(),
                });
            }
        }
    }

    for (channel, cfg) in &doc.channels {
        if let Some(field) = FLAT_CREDENTIAL_FIELDS
            .iter()
            .find(|f| cfg.extra.contains_key(**f))
        {
            return Err(ReconcileError::FlatChannelCredential {
                channel: channel.clone(),
                field: (*field).to_string(),
            });
        }
    }

    if let Some(model) = doc.primary_model() {
        validate_model_ref(model)?;
    }
    Ok(())
}

/// `provider/model`, with the provider drawn from the closed set.
pub fn validate_model_ref(model: &str) -> Result<Provider> {
    let Some((provider, name)) = model.split_once('/') else {
        return Err(ReconcileError::InvalidModel(model.to_string()));
    };
    if name.trim().is_empty() {
        return Err(ReconcileError::InvalidModel(model.to_string()));
    }
    provider.parse()
}

/// Validate a bare token supplied outside a document (initial credentials).
pub fn validate_token(provider: &str, token: &str) -> Result<Provider> {
    let provider: Provider = provider.parse()?;
    if token.trim().len() < MIN_TOKEN_LEN {
        return Err(ReconcileError::TokenTooShort {
            profile: provider.default_profile(),
            min: MIN_TOKEN_LEN,
        });
    }
    Ok(provider)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest, serde_json::json};

    fn doc(v: serde_json::Value) -> ConfigDocument {
        ConfigDocument::from_value(v).unwrap()
    }

    #[test]
    fn accepts_well_formed() {
        let mut d = ConfigDocument::default();
        d.set_api_key(Provider::OpenRouter, "sk-or-v1-0123456789abcdef");
        d.set_primary_model("openrouter/meta-llama/llama-4");
        validate(&d).unwrap();
    }

    #[test]
    fn rejects_unknown_provider() {
        let d = doc(json!({ "auth": { "profiles": {
            "acme:default": { "provider": "acme", "key": "0123456789abcdefghijkl" }
        }}}));
        assert!(matches!(validate(&d), Err(ReconcileError::UnknownProvider(_))));
    }

    #[test]
    fn rejects_short_token() {
        let d = doc(json!({ "auth": { "profiles": {
            "openai:default": { "provider": "openai", "key": "sk-short" }
        }}}));
        assert!(matches!(validate(&d), Err(ReconcileError::TokenTooShort { .. })));
    }

    #[test]
    fn rejects_mismatched_profile_key() {
        let d = doc(json!({ "auth": { "profiles": {
            "openai:default": { "provider": "anthropic" }
        }}}));
        assert!(matches!(
            validate(&d),
            Err(ReconcileError::ProfileProviderMismatch { .. })
        ));
    }

    #[test]
    fn rejects_dangling_order() {
        let d = doc(json!({ "auth": {
            "profiles": {},
            "order": { "openai": ["openai:default"] }
        }}));
        assert!(matches!(validate(&d), Err(ReconcileError::DanglingOrder { .. })));
    }

    #[test]
    fn credential_less_profile_is_fine() {
        let d = doc(json!({ "auth": {
            "profiles": { "google:oauth": { "provider": "google", "mode": "oauth" } },
            "order": { "google": ["google:oauth"] }
        }}));
        validate(&d).unwrap();
    }

    #[test]
    fn rejects_flat_channel_credentials() {
        let d = doc(json!({ "channels": { "telegram": { "botToken": "1:abc" } } }));
        assert!(matches!(
            validate(&d),
            Err(ReconcileError::FlatChannelCredential { ref field, .. }) if field == "botToken"
        ));
    }

    #[rstest]
    #[case("gpt-4.1")]
    #[case("openai/")]
    #[case("acme/model")]
    fn rejects_bad_model_refs(#[case] model: &str) {
        assert!(validate_model_ref(model).is_err());
    }

    #[test]
    fn validate_token_checks_both() {
        assert_eq!(
            validate_token("anthropic", "sk-ant-REDACTED").unwrap(),
            Provider::Anthropic
        );
        assert!(validate_token("anthropic", "short").is_err());
        assert!(validate_token("nope", "sk-ant-REDACTED").is_err());
    }
}
