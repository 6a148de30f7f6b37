use {
    anyhow::Result,
    clap::Subcommand,
    kennel_common::mask_secret,
    kennel_config::KennelConfig,
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML, vault secrets masked.
    Show,
    /// Print the directory searched for `kennel.toml`.
    Path,
}

pub fn handle_config(action: ConfigAction, config: &KennelConfig) -> Result<()> {
    match action {
        ConfigAction::Show => {
            print!("{}", render(config)?);
            Ok(())
        },
        ConfigAction::Path => {
            match kennel_config::config_dir() {
                Some(dir) => println!("{}", dir.display()),
                None => eprintln!("no user config directory on this platform"),
            }
            Ok(())
        },
    }
}

fn render(config: &KennelConfig) -> Result<String> {
    let mut shown = config.clone();
    shown.vault.key = shown.vault.key.as_deref().map(mask_secret);
    shown.vault.passphrase = shown.vault.passphrase.as_deref().map(mask_secret);
    Ok(toml::to_string_pretty(&shown)?)
}
