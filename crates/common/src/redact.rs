//! Scrubbing of credential-like substrings from messages that leave the
//! control plane (API errors, echoed stderr).

use {once_cell::sync::Lazy, regex::Regex};

const REDACTED: &str = "[REDACTED]";

/// Prefixes after which the rest of the token is treated as a secret.
/// Longer prefixes come first so `sk-ant-` wins over `sk-`.
static KEY_PREFIX_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)] // static pattern
    Regex::new(
        r"\b(sk-ant-|sk-or-|sk-proj-|sk-|xoxb-|xoxp-|xapp-|ghp_|gho_|gsk_|AIza|Bearer\s+)[A-Za-z0-9_\-\.=+/]{4,}",
    )
    .expect("valid key prefix regex")
});

/// Telegram bot tokens: `<bot id>:<35 char secret>`.
static BOT_TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"\b(\d{6,12}):[A-Za-z0-9_\-]{30,}").expect("valid bot token regex")
});

/// Replace anything that looks like a credential with `[REDACTED]`.
///
/// The recognizable prefix is kept so an operator can still tell which kind
/// of credential was involved.
pub fn scrub_secrets(input: &str) -> String {
    let pass = KEY_PREFIX_RE.replace_all(input, |caps: &regex::Captures<'_>| {
        format!("{}{REDACTED}", &caps[1])
    });
    BOT_TOKEN_RE
        .replace_all(&pass, |caps: &regex::Captures<'_>| {
            format!("{}:{REDACTED}", &caps[1])
        })
        .into_owned()
}

/// Mask a credential for display: bullets plus the last four characters.
pub fn mask_secret(secret: &str) -> String {
    let count = secret.chars().count();
    if count <= 8 {
        return "••••".to_string();
    }
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("••••{tail}")
}
